//! Board binding of the control core
//!
//! Implements the core's collaborator traits on the real peripherals: the
//! TIM1 bridge, the three back-EMF comparator inputs (external comparators
//! against the star point), the DWT tick clock, the RPM output pin, the flash
//! parameter page and the values published by the RC and analog tasks.

use core::sync::atomic::Ordering;

use embassy_stm32::gpio::{Input, Output};
use esc_core::config::ParamRecord;
use esc_core::hal::{
    AnalogSensors, Beeper, CommTimer, CommandInput, Comparator, Fet, Leg, ParamStore,
    PowerStage, PwmMode, RpmOutput, StoreError, Tone,
};
use esc_core::rc_decoder::{ThrottleCommand, ThrottleRange};

use crate::clock::{self, Deadline};
use crate::config::pwm::BEEP_DUTY;
use crate::eeprom::FlashParamStore;
use crate::motor_driver::MotorDriver;
use crate::state;

/// One note: half period [ticks] and number of periods
type Note = (u16, u16);

fn melody(tone: Tone) -> &'static [Note] {
    match tone {
        Tone::PowerUp => &[(500, 120), (420, 140), (370, 160)],
        Tone::Armed => &[(370, 160), (370, 160)],
        Tone::Beacon(_) => &[(330, 180)],
        Tone::NoSignal => &[(700, 40)],
        Tone::Programming => &[(500, 120), (370, 160), (500, 120)],
        Tone::CalibrationStep => &[(420, 140)],
        Tone::CalibrationDone => &[(420, 140), (370, 160), (330, 180)],
    }
}

pub struct Board {
    driver: MotorDriver,
    comparators: [Input<'static>; 3],
    deadline: Deadline,
    rpm: Output<'static>,
    store: FlashParamStore,
}

impl Board {
    pub fn new(
        driver: MotorDriver,
        comparators: [Input<'static>; 3],
        rpm: Output<'static>,
        store: FlashParamStore,
    ) -> Self {
        Self {
            driver,
            comparators,
            deadline: Deadline::new(),
            rpm,
            store,
        }
    }
}

impl PowerStage for Board {
    fn switch(&mut self, fet: Fet, on: bool) {
        self.driver.switch(fet, on);
    }

    fn set_pwm_leg(&mut self, leg: Leg, mode: PwmMode) {
        self.driver.set_pwm_leg(leg, mode);
    }

    fn set_duty(&mut self, duty: u8) {
        self.driver.set_duty(duty);
    }

    fn all_off(&mut self) {
        self.driver.stop();
    }
}

impl Comparator for Board {
    fn is_high(&mut self, leg: Leg) -> bool {
        self.comparators[leg as usize].is_high()
    }
}

impl CommTimer for Board {
    fn now(&mut self) -> u32 {
        clock::ticks()
    }

    fn start(&mut self, ticks: u16) {
        self.deadline.start(ticks);
    }

    fn expired(&mut self) -> bool {
        self.deadline.expired()
    }
}

impl Beeper for Board {
    /// Beeps through the windings: A high side against a chopped B low side.
    fn beep(&mut self, tone: Tone) {
        let duty = match tone {
            Tone::Beacon(strength) => strength.min(BEEP_DUTY * 4),
            _ => BEEP_DUTY,
        };
        for &(half_period, periods) in melody(tone) {
            for _ in 0..periods {
                self.driver.switch(Fet::High(Leg::A), true);
                self.driver.set_pwm_leg(Leg::B, PwmMode::NonDamped);
                self.driver.set_duty(duty);
                self.wait(half_period);
                self.driver.stop();
                self.wait(half_period);
            }
        }
    }
}

impl RpmOutput for Board {
    fn toggle(&mut self) {
        self.rpm.toggle();
    }
}

impl AnalogSensors for Board {
    fn battery_millivolts(&mut self) -> u16 {
        state::BATTERY_MV.load(Ordering::Acquire)
    }

    fn temperature_celsius(&mut self) -> i16 {
        state::TEMPERATURE_C.load(Ordering::Acquire)
    }
}

impl CommandInput for Board {
    fn command(&mut self) -> ThrottleCommand {
        state::RC_DECODER.command()
    }

    fn take_raw_width(&mut self) -> Option<u16> {
        state::RC_DECODER.take_raw_width()
    }

    fn apply_throttle_range(&mut self, range: ThrottleRange) {
        state::RC_DECODER.set_range(range);
    }

    fn restart_detection(&mut self) {
        state::RC_DECODER.restart_detection();
    }

    fn take_housekeeping_ticks(&mut self) -> u8 {
        state::take_housekeeping_ticks()
    }
}

impl ParamStore for Board {
    fn load(&mut self) -> Result<ParamRecord, StoreError> {
        self.store.load()
    }

    fn save(&mut self, record: &ParamRecord) -> Result<(), StoreError> {
        self.store.save(record)
    }
}
