//! Six-step bridge driver
//!
//! Drives the three half bridges of TIM1 as six independent switches. A leg
//! whose high side is on runs at 100 % duty with only CHx enabled. The PWM leg
//! chops its low side (CHxN); in damped mode the complementary high side (CHx)
//! conducts during the off period. Every other output is disabled.

use embassy_stm32::pac;
use embassy_stm32::{
    peripherals,
    timer::{complementary_pwm::ComplementaryPwm, Channel},
};
use esc_core::hal::{Fet, Leg, PowerStage, PwmMode};

/// Three-phase bridge on TIM1
pub struct MotorDriver {
    pwm: ComplementaryPwm<'static, peripherals::TIM1>,
    max_duty: u16,
    high: [bool; 3],
    low: [bool; 3],
    pwm_leg: Option<Leg>,
    mode: PwmMode,
    duty: u8,
}

fn channel(leg: Leg) -> Channel {
    match leg {
        Leg::A => Channel::Ch1,
        Leg::B => Channel::Ch2,
        Leg::C => Channel::Ch3,
    }
}

impl MotorDriver {
    pub fn new(pwm: ComplementaryPwm<'static, peripherals::TIM1>) -> Self {
        let max_duty = pwm.get_max_duty();
        let mut driver = Self {
            pwm,
            max_duty,
            high: [false; 3],
            low: [false; 3],
            pwm_leg: None,
            mode: PwmMode::NonDamped,
            duty: 0,
        };
        driver.stop();
        driver
    }

    pub fn max_duty(&self) -> u16 {
        self.max_duty
    }

    /// All outputs off.
    pub fn stop(&mut self) {
        self.high = [false; 3];
        self.low = [false; 3];
        self.pwm_leg = None;
        self.duty = 0;
        for leg in [Leg::A, Leg::B, Leg::C] {
            self.update_leg(leg);
        }
    }

    fn scaled_duty(&self) -> u16 {
        (self.max_duty as u32 * self.duty as u32 / 255) as u16
    }

    /// Recomputes compare value and output enables of one leg.
    fn update_leg(&mut self, leg: Leg) {
        let i = leg as usize;
        let (compare, cc, ccn) = if self.high[i] {
            (self.max_duty, true, false)
        } else if self.pwm_leg == Some(leg) && self.duty > 0 {
            // CHxN is active while CHx is not
            let damped = self.mode == PwmMode::Damped;
            (self.max_duty - self.scaled_duty(), damped, true)
        } else if self.low[i] {
            (0, false, true)
        } else {
            (0, false, false)
        };

        self.pwm.set_duty(channel(leg), compare);
        pac::TIM1.ccer().modify(|w| {
            w.set_cce(i, cc);
            w.set_ccne(i, ccn);
        });
    }
}

impl PowerStage for MotorDriver {
    fn switch(&mut self, fet: Fet, on: bool) {
        match fet {
            Fet::High(leg) => {
                self.high[leg as usize] = on;
                self.update_leg(leg);
            }
            Fet::Low(leg) => {
                self.low[leg as usize] = on;
                if !on && self.pwm_leg == Some(leg) {
                    self.pwm_leg = None;
                }
                self.update_leg(leg);
            }
        }
    }

    fn set_pwm_leg(&mut self, leg: Leg, mode: PwmMode) {
        let previous = self.pwm_leg.replace(leg);
        self.mode = mode;
        if let Some(previous) = previous.filter(|&p| p != leg) {
            self.update_leg(previous);
        }
        self.update_leg(leg);
    }

    fn set_duty(&mut self, duty: u8) {
        self.duty = duty;
        if let Some(leg) = self.pwm_leg {
            self.update_leg(leg);
        }
    }
}
