//! Simulated board for the orchestrator tests
//!
//! Every comparator read and countdown poll advances time by one tick;
//! blocking waits jump. The motor turns one 60° sector per `step_ticks`
//! and follows the drive: while a phase is powered the rotor cannot pass
//! the sector that phase waits for.
//!
//! The command comes either from the `command` field or from a
//! [`SimTransmitter`] that feeds edges and ticks into a real decoder.

use std::collections::VecDeque;

use crate::config::ParamRecord;
use crate::hal::{
    AnalogSensors, Beeper, CommTimer, CommandInput, Comparator, Fet, Leg, ParamStore,
    PowerStage, PwmMode, RpmOutput, StoreError, Tone,
};
use crate::rc_decoder::{EdgeSample, RcConfig, SharedRcDecoder, ThrottleCommand, ThrottleRange};

/// 32 ms
const HOUSEKEEPING_TICKS: u32 = 64_000;

/// 128 µs
const FAST_TICK_TICKS: u32 = 256;

/// Pulse train on the RC input, decoded by a [`SharedRcDecoder`].
pub struct SimTransmitter {
    pub decoder: SharedRcDecoder,
    pub period: u32,
    pub width: u32,
    /// No pulses while `false`; the line stays low
    pub enabled: bool,
    /// Pulses left out entirely
    pub skip: u8,
    next_rise: u32,
    pending_fall: Option<u32>,
    next_fast_tick: u32,
    line_high: bool,
}

impl SimTransmitter {
    pub fn new(config: RcConfig, period: u32, width: u32) -> Self {
        Self {
            decoder: SharedRcDecoder::new(config),
            period,
            width,
            enabled: true,
            skip: 0,
            next_rise: 0,
            pending_fall: None,
            next_fast_tick: FAST_TICK_TICKS,
            line_high: false,
        }
    }

    /// Delivers every edge and fast tick up to `now`, in time order.
    fn run_until(&mut self, now: u32) {
        loop {
            let edge = self.pending_fall.unwrap_or(self.next_rise);
            if edge.min(self.next_fast_tick) > now {
                return;
            }
            if self.next_fast_tick < edge {
                self.decoder.on_fast_tick(self.line_high);
                self.next_fast_tick += FAST_TICK_TICKS;
                continue;
            }
            match self.pending_fall.take() {
                Some(timestamp) => {
                    self.line_high = false;
                    self.decoder.on_edge(EdgeSample {
                        timestamp,
                        rising: false,
                    });
                }
                None => {
                    if self.skip > 0 {
                        self.skip -= 1;
                    } else if self.enabled {
                        self.line_high = true;
                        self.decoder.on_edge(EdgeSample {
                            timestamp: self.next_rise,
                            rising: true,
                        });
                        self.pending_fall = Some(self.next_rise + self.width);
                    }
                    self.next_rise += self.period;
                }
            }
        }
    }
}

pub struct SimBoard {
    pub time: u32,
    deadline: u32,
    last_housekeeping: u32,
    /// Housekeeping ticks handed out on top of the elapsed ones
    pub extra_ticks: u8,

    sector: u8,
    progress: u32,
    pub step_ticks: u32,
    /// Rotor frozen
    pub stalled: bool,
    /// Rotor slows down while unpowered
    pub spin_down: bool,
    /// Comparators show the levels of the next sector, as while a winding
    /// is still demagnetizing
    pub demag: bool,

    fets: [bool; 6],
    pub pwm_leg: Option<Leg>,
    pub pwm_mode: Option<PwmMode>,
    pub duty: u8,
    pub duty_log: Vec<u8>,

    pub command: ThrottleCommand,
    pub transmitter: Option<SimTransmitter>,
    pub raw_widths: VecDeque<u16>,
    pub range: Option<ThrottleRange>,
    pub restarts: u32,

    pub tones: Vec<Tone>,
    pub rpm_toggles: u32,
    pub battery_mv: u16,
    pub temperature: i16,
    pub stored: Option<ParamRecord>,
}

impl SimBoard {
    pub fn new(step_ticks: u32) -> Self {
        Self {
            time: 0,
            deadline: 0,
            last_housekeeping: 0,
            extra_ticks: 0,
            // Just before the sector phase 1 waits for
            sector: 5,
            progress: 0,
            step_ticks,
            stalled: false,
            spin_down: false,
            demag: false,
            fets: [false; 6],
            pwm_leg: None,
            pwm_mode: None,
            duty: 0,
            duty_log: Vec::new(),
            command: ThrottleCommand::NONE,
            transmitter: None,
            raw_widths: VecDeque::new(),
            range: None,
            restarts: 0,
            tones: Vec::new(),
            rpm_toggles: 0,
            battery_mv: 12_400,
            temperature: 25,
            stored: None,
        }
    }

    fn fet_index(fet: Fet) -> usize {
        match fet {
            Fet::High(leg) => leg as usize,
            Fet::Low(leg) => 3 + leg as usize,
        }
    }

    pub fn fet(&self, fet: Fet) -> bool {
        self.fets[Self::fet_index(fet)]
    }

    pub fn all_fets_off(&self) -> bool {
        self.fets.iter().all(|on| !on) && self.duty == 0
    }

    /// Sector the powered phase pulls the rotor into.
    fn pull_sector(&self) -> Option<u8> {
        if self.duty == 0 {
            return None;
        }
        let high = [Leg::A, Leg::B, Leg::C]
            .into_iter()
            .find(|&leg| self.fet(Fet::High(leg)))?;
        let phase = match (high, self.pwm_leg?) {
            (Leg::B, Leg::C) => 1,
            (Leg::A, Leg::C) => 2,
            (Leg::A, Leg::B) => 3,
            (Leg::C, Leg::B) => 4,
            (Leg::C, Leg::A) => 5,
            (Leg::B, Leg::A) => 6,
            _ => return None,
        };
        Some((phase + 5) % 6)
    }

    /// Lets time pass without touching the rotor.
    pub fn idle(&mut self, ticks: u32) {
        self.time = self.time.wrapping_add(ticks);
        if let Some(tx) = self.transmitter.as_mut() {
            tx.run_until(self.time);
        }
    }

    fn advance(&mut self, ticks: u32) {
        self.idle(ticks);
        if self.stalled {
            return;
        }
        self.progress += ticks;
        while self.progress >= self.step_ticks {
            if self.pull_sector() == Some(self.sector) {
                self.progress = self.step_ticks;
                break;
            }
            self.progress -= self.step_ticks;
            self.sector = (self.sector + 1) % 6;
            if self.spin_down && self.duty == 0 {
                self.step_ticks += self.step_ticks / 16;
            }
        }
    }

    fn level(&self, leg: Leg) -> bool {
        let high_sectors = match leg {
            Leg::A => [0, 1, 2],
            Leg::B => [4, 5, 0],
            Leg::C => [2, 3, 4],
        };
        let sector = if self.demag {
            (self.sector + 1) % 6
        } else {
            self.sector
        };
        high_sectors.contains(&sector)
    }
}

impl PowerStage for SimBoard {
    fn switch(&mut self, fet: Fet, on: bool) {
        self.fets[Self::fet_index(fet)] = on;
        if let (Fet::Low(leg), false) = (fet, on) {
            if self.pwm_leg == Some(leg) {
                self.pwm_leg = None;
            }
        }
    }

    fn set_pwm_leg(&mut self, leg: Leg, mode: PwmMode) {
        self.pwm_leg = Some(leg);
        self.pwm_mode = Some(mode);
    }

    fn set_duty(&mut self, duty: u8) {
        self.duty = duty;
        self.duty_log.push(duty);
    }
}

impl Comparator for SimBoard {
    fn is_high(&mut self, leg: Leg) -> bool {
        self.advance(1);
        self.level(leg)
    }
}

impl CommTimer for SimBoard {
    fn now(&mut self) -> u32 {
        self.time
    }

    fn start(&mut self, ticks: u16) {
        self.deadline = self.time.wrapping_add(ticks as u32);
    }

    fn expired(&mut self) -> bool {
        self.advance(1);
        self.time.wrapping_sub(self.deadline) as i32 >= 0
    }

    fn wait(&mut self, ticks: u16) {
        self.advance(ticks as u32);
    }
}

impl Beeper for SimBoard {
    fn beep(&mut self, tone: Tone) {
        self.tones.push(tone);
    }
}

impl RpmOutput for SimBoard {
    fn toggle(&mut self) {
        self.rpm_toggles += 1;
    }
}

impl AnalogSensors for SimBoard {
    fn battery_millivolts(&mut self) -> u16 {
        self.battery_mv
    }

    fn temperature_celsius(&mut self) -> i16 {
        self.temperature
    }
}

impl CommandInput for SimBoard {
    fn command(&mut self) -> ThrottleCommand {
        match &self.transmitter {
            Some(tx) => tx.decoder.command(),
            None => self.command,
        }
    }

    fn take_raw_width(&mut self) -> Option<u16> {
        match &self.transmitter {
            Some(tx) => tx.decoder.take_raw_width(),
            None => self.raw_widths.pop_front(),
        }
    }

    fn apply_throttle_range(&mut self, range: ThrottleRange) {
        self.range = Some(range);
        if let Some(tx) = &self.transmitter {
            tx.decoder.set_range(range);
        }
    }

    fn restart_detection(&mut self) {
        self.restarts += 1;
        if let Some(tx) = &self.transmitter {
            tx.decoder.restart_detection();
        }
    }

    fn take_housekeeping_ticks(&mut self) -> u8 {
        let elapsed = self.time.wrapping_sub(self.last_housekeeping) / HOUSEKEEPING_TICKS;
        self.last_housekeeping = self
            .last_housekeeping
            .wrapping_add(elapsed * HOUSEKEEPING_TICKS);
        if let Some(tx) = &self.transmitter {
            for _ in 0..elapsed {
                tx.decoder.on_slow_tick();
            }
        }
        let ticks = (elapsed.min(255) as u8).saturating_add(self.extra_ticks);
        self.extra_ticks = 0;
        ticks
    }
}

impl ParamStore for SimBoard {
    fn load(&mut self) -> Result<ParamRecord, StoreError> {
        self.stored.ok_or(StoreError::Empty)
    }

    fn save(&mut self, record: &ParamRecord) -> Result<(), StoreError> {
        self.stored = Some(*record);
        Ok(())
    }
}
