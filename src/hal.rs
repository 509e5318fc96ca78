//! Collaborator interfaces
//!
//! Everything the core needs from the board. Implementations live in the
//! firmware crate (and in the simulated board used by the tests).
//!
//! All durations are timer ticks of 0.5 µs.

use crate::config::ParamRecord;
use crate::rc_decoder::{ThrottleCommand, ThrottleRange};

/// One bridge leg (motor phase).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Leg {
    A,
    B,
    C,
}

/// The six gate-drive signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fet {
    /// High side (p-FET position)
    High(Leg),
    /// Low side (n-FET position)
    Low(Leg),
}

impl Fet {
    pub const ALL: [Fet; 6] = [
        Fet::High(Leg::A),
        Fet::High(Leg::B),
        Fet::High(Leg::C),
        Fet::Low(Leg::A),
        Fet::Low(Leg::B),
        Fet::Low(Leg::C),
    ];
}

/// How the PWM leg behaves during the off part of the PWM cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PwmMode {
    /// Off period freewheels through the body diodes
    NonDamped,
    /// Off period turns the complementary high side on
    Damped,
}

/// Six-signal gate drive.
pub trait PowerStage {
    /// Turns a single FET on or off.
    fn switch(&mut self, fet: Fet, on: bool);

    /// Selects the low side that carries the PWM and how its off period is driven.
    fn set_pwm_leg(&mut self, leg: Leg, mode: PwmMode);

    /// Sets the PWM duty (0..=255) of the selected PWM leg.
    fn set_duty(&mut self, duty: u8);

    /// Forces all six outputs off.
    fn all_off(&mut self) {
        self.set_duty(0);
        for fet in Fet::ALL {
            self.switch(fet, false);
        }
    }
}

/// Back-EMF comparator.
pub trait Comparator {
    /// Returns `true` if the comparator for `leg` currently reads high.
    fn is_high(&mut self, leg: Leg) -> bool;
}

/// Monotonic tick counter plus a one-shot countdown.
///
/// `wait_until` is the only way the core blocks: every wait is bounded by a
/// countdown and reports whether it ended by timeout.
pub trait CommTimer {
    /// Current time in ticks. Wraps.
    fn now(&mut self) -> u32;

    /// Arms the one-shot countdown.
    fn start(&mut self, ticks: u16);

    /// Returns `true` once the countdown armed by `start` has elapsed.
    fn expired(&mut self) -> bool;

    /// Blocks for `ticks`.
    fn wait(&mut self, ticks: u16) {
        self.start(ticks);
        while !self.expired() {}
    }
}

/// Audible feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Tone {
    PowerUp,
    Armed,
    /// Beacon while waiting for power, with strength
    Beacon(u8),
    NoSignal,
    /// Entry into transmitter calibration
    Programming,
    CalibrationStep,
    CalibrationDone,
}

pub trait Beeper {
    fn beep(&mut self, tone: Tone);
}

/// RPM pulse output, toggled once per commutation.
pub trait RpmOutput {
    fn toggle(&mut self);
}

/// Analog front end.
pub trait AnalogSensors {
    /// Battery voltage [mV].
    fn battery_millivolts(&mut self) -> u16;

    /// Power stage temperature [°C].
    fn temperature_celsius(&mut self) -> i16;
}

/// Decoded RC command source.
///
/// The decoder itself runs in capture and tick context; this is the main
/// loop's view of it.
pub trait CommandInput {
    /// Latest decoded command.
    fn command(&mut self) -> ThrottleCommand;

    /// Takes the latest raw PPM/OneShot width in 4 µs units, if a new one
    /// arrived since the last call.
    fn take_raw_width(&mut self) -> Option<u16>;

    /// Installs a new calibrated throttle range.
    fn apply_throttle_range(&mut self, range: ThrottleRange);

    /// Drops the locked carrier and starts frequency measurement again.
    fn restart_detection(&mut self);

    /// Number of 32 ms housekeeping ticks elapsed since the last call.
    fn take_housekeeping_ticks(&mut self) -> u8;
}

/// Storage error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// Nothing stored yet
    Empty,
    /// Integrity check (magic number or checksum) failed
    Corrupt,
    /// Underlying read failed
    Read,
    /// Underlying erase or write failed
    Write,
}

/// Persisted parameter record storage.
pub trait ParamStore {
    fn load(&mut self) -> Result<ParamRecord, StoreError>;
    fn save(&mut self, record: &ParamRecord) -> Result<(), StoreError>;
}

/// Everything the orchestrator drives.
pub trait EscHardware:
    PowerStage + Comparator + CommTimer + Beeper + RpmOutput + AnalogSensors + CommandInput + ParamStore
{
}

impl<T> EscHardware for T where
    T: PowerStage
        + Comparator
        + CommTimer
        + Beeper
        + RpmOutput
        + AnalogSensors
        + CommandInput
        + ParamStore
{
}
