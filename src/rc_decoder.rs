//! RC command decoder
//!
//! Turns timestamped edges of the RC input pin into a normalized 0..=255
//! throttle command. The carrier (PWM at one of five frequencies, PPM or
//! OneShot125) is detected from the rising-edge period and must be seen
//! consistently before it is trusted.
//!
//! All times are 0.5 µs ticks.

pub mod calibration;
pub mod carrier;
pub mod shared;

pub use calibration::{CalibrationError, SampleCollector, ThrottleCalibration, ThrottleRange};
pub use carrier::{Carrier, PwmFrequency};
pub use shared::SharedRcDecoder;

use crate::config::rc;

/// One captured edge of the RC input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EdgeSample {
    /// Capture time [ticks], wraps
    pub timestamp: u32,
    pub rising: bool,
}

/// Locked input protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RcProtocol {
    Pwm(PwmFrequency),
    Ppm,
    OneShot125,
}

impl RcProtocol {
    fn from_carrier(carrier: Carrier) -> Self {
        match carrier {
            Carrier::Pwm(freq) => Self::Pwm(freq),
            Carrier::Ppm => Self::Ppm,
        }
    }

    /// Whether a measured carrier still belongs to this protocol.
    /// OneShot125 has no fixed frame rate.
    fn accepts(self, carrier: Carrier) -> bool {
        match self {
            Self::Pwm(freq) => carrier == Carrier::Pwm(freq),
            Self::Ppm => carrier == Carrier::Ppm,
            Self::OneShot125 => true,
        }
    }

    /// PPM and OneShot125 carry calibrated pulse widths.
    pub fn is_ppm(self) -> bool {
        matches!(self, Self::Ppm | Self::OneShot125)
    }

    fn timeout_reload(self) -> u8 {
        if self.is_ppm() {
            rc::TIMEOUT_PPM_TICKS
        } else {
            rc::TIMEOUT_PWM_TICKS
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Self::Forward => Self::Reverse,
            Self::Reverse => Self::Forward,
        }
    }
}

/// Decoded command as seen by the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ThrottleCommand {
    pub value: u8,
    /// `false` once the loss timeout expired; `value` then reflects the
    /// static line level only
    pub live: bool,
    pub protocol: Option<RcProtocol>,
    pub direction: Direction,
}

impl ThrottleCommand {
    pub const NONE: Self = Self {
        value: 0,
        live: false,
        protocol: None,
        direction: Direction::Forward,
    };

    /// Above the stop threshold.
    pub fn above_stop(&self) -> bool {
        self.value >= crate::config::RCP_STOP
    }
}

/// Decoder settings taken from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RcConfig {
    pub range: ThrottleRange,
    pub bidirectional: bool,
    /// Ignore the calibrated range and use 1000..2020 µs
    pub full_throttle_range: bool,
}

impl RcConfig {
    pub const DEFAULT: Self = Self {
        range: ThrottleRange::DEFAULT,
        bidirectional: false,
        full_throttle_range: false,
    };

    fn effective_range(&self) -> ThrottleRange {
        if self.full_throttle_range {
            ThrottleRange::FULL
        } else {
            self.range
        }
    }
}

/// Carrier measurement in progress.
#[derive(Debug, Clone, Copy)]
struct Measurement {
    candidate: Option<Carrier>,
    run: u8,
    attempts: u8,
}

impl Measurement {
    const IDLE: Self = Self {
        candidate: None,
        run: 0,
        attempts: 0,
    };
}

pub struct RcDecoder {
    config: RcConfig,
    gain: u16,
    last_rise: Option<u32>,
    /// A rising edge is waiting for its falling edge
    pulse_open: bool,
    last_period: Option<u32>,
    measurement: Measurement,
    protocol: Option<RcProtocol>,
    outside_range: u8,
    timeout: u8,
    value: u8,
    live: bool,
    direction: Direction,
    raw_width: Option<u16>,
    /// Two most recent line levels sampled on the fast tick
    line_history: [bool; 2],
}

impl RcDecoder {
    pub const fn new(config: RcConfig) -> Self {
        let range = if config.full_throttle_range {
            ThrottleRange::FULL
        } else {
            config.range
        };
        Self {
            config,
            gain: range.gain(),
            last_rise: None,
            pulse_open: false,
            last_period: None,
            measurement: Measurement::IDLE,
            protocol: None,
            outside_range: 0,
            timeout: 0,
            value: 0,
            live: false,
            direction: Direction::Forward,
            raw_width: None,
            line_history: [false; 2],
        }
    }

    /// Replaces the decoder settings without dropping the locked carrier.
    pub fn configure(&mut self, config: RcConfig) {
        self.config = config;
        self.gain = config.effective_range().gain();
    }

    /// Installs a new calibrated range.
    pub fn set_range(&mut self, range: ThrottleRange) {
        self.configure(RcConfig { range, ..self.config });
    }

    pub fn protocol(&self) -> Option<RcProtocol> {
        self.protocol
    }

    pub fn command(&self) -> ThrottleCommand {
        ThrottleCommand {
            value: self.value,
            live: self.live,
            protocol: self.protocol,
            direction: self.direction,
        }
    }

    /// Takes the last in-range PPM/OneShot width in 4 µs units.
    pub fn take_raw_width(&mut self) -> Option<u16> {
        self.raw_width.take()
    }

    /// Forgets the carrier and measures it again from scratch.
    pub fn restart_detection(&mut self) {
        self.protocol = None;
        self.last_rise = None;
        self.pulse_open = false;
        self.measurement = Measurement::IDLE;
        self.last_period = None;
        self.outside_range = 0;
        self.timeout = 0;
        self.value = 0;
        self.live = false;
        self.raw_width = None;
    }

    pub fn on_edge(&mut self, edge: EdgeSample) {
        if edge.rising {
            let Some(previous) = self.last_rise else {
                self.last_rise = Some(edge.timestamp);
                self.pulse_open = true;
                return;
            };
            let elapsed = edge.timestamp.wrapping_sub(previous);
            // Noise leaves every piece of state alone, including the last rise.
            let Some(carrier) = Carrier::classify(elapsed) else {
                return;
            };
            self.last_rise = Some(edge.timestamp);
            self.pulse_open = true;
            self.on_period(carrier, elapsed);
        } else if let Some(rise) = self.last_rise.filter(|_| self.pulse_open) {
            // One width per rising edge; a fall after a missed rise is dropped
            self.pulse_open = false;
            self.on_width(edge.timestamp.wrapping_sub(rise));
        }
    }

    /// 128 µs tick. Samples the line level and runs the PWM loss timeout.
    pub fn on_fast_tick(&mut self, line_high: bool) {
        self.line_history = [self.line_history[1], line_high];
        if matches!(self.protocol, Some(RcProtocol::Pwm(_))) {
            self.count_down();
        }
    }

    /// 32 ms tick. Runs the PPM/OneShot loss timeout.
    pub fn on_slow_tick(&mut self) {
        if self.protocol.is_some_and(RcProtocol::is_ppm) {
            self.count_down();
        }
    }

    fn count_down(&mut self) {
        if self.timeout == 0 {
            return;
        }
        self.timeout -= 1;
        if self.timeout == 0 {
            self.live = false;
            // The gap to the next rise is not a carrier period
            self.last_rise = None;
            self.pulse_open = false;
            self.value = if self.line_history == [true, true] { 255 } else { 0 };
            warn!("RC signal timeout, line level -> {}", self.value);
        }
    }

    fn on_period(&mut self, carrier: Carrier, period: u32) {
        let consistent = self
            .last_period
            .is_some_and(|last| last.abs_diff(period) < carrier.tolerance());
        self.last_period = Some(period);

        // A locked carrier is only measured again after restart_detection.
        // Periods of another class, such as a missed edge or full duty, are dropped.
        match self.protocol {
            Some(protocol) if !protocol.accepts(carrier) => {
                trace!("RC period {} outside {:?}, ignored", period, protocol);
            }
            Some(_) => {}
            None => self.measure(carrier, consistent),
        }
    }

    fn measure(&mut self, carrier: Carrier, consistent: bool) {
        let m = &mut self.measurement;
        if m.candidate != Some(carrier) {
            m.candidate = Some(carrier);
            m.run = 1;
            m.attempts += 1;
            if m.attempts > rc::MEASURE_ATTEMPTS {
                debug!("RC carrier unstable, back to signal detection");
                *m = Measurement::IDLE;
            }
            return;
        }

        if !consistent {
            m.run = 1;
            return;
        }

        m.run += 1;
        if m.run >= rc::VALIDATE_PULSES {
            let protocol = RcProtocol::from_carrier(carrier);
            info!("RC carrier locked: {:?}", protocol);
            self.measurement = Measurement::IDLE;
            self.protocol = Some(protocol);
            self.outside_range = 0;
        }
    }

    fn on_width(&mut self, width: u32) {
        let Some(protocol) = self.protocol else {
            return;
        };

        let raw = match protocol {
            RcProtocol::Pwm(freq) => {
                self.accept(freq.scale(width), Direction::Forward);
                return;
            }
            RcProtocol::Ppm => width / 8,
            RcProtocol::OneShot125 => width,
        };
        let raw = raw.min(u16::MAX as u32) as u16;

        if !(rc::PPM_RANGE_LOW..rc::PPM_RANGE_HIGH).contains(&raw) {
            self.outside_range = self.outside_range.saturating_add(1);
            if self.outside_range >= rc::OUTSIDE_RANGE_LIMIT {
                if protocol == RcProtocol::Ppm
                    && (rc::ONESHOT_RANGE_LOW..rc::ONESHOT_RANGE_HIGH).contains(&width)
                {
                    info!("RC protocol switched to OneShot125");
                    self.protocol = Some(RcProtocol::OneShot125);
                    self.outside_range = 0;
                    return;
                }
                self.accept(0, self.direction);
            }
            return;
        }

        self.outside_range = self.outside_range.saturating_sub(1);
        self.raw_width = Some(raw);
        let (value, direction) = self.normalize(raw);
        self.accept(value, direction);
    }

    /// Maps a raw width in 4 µs units onto 0..=255 using the calibrated range.
    fn normalize(&self, raw: u16) -> (u8, Direction) {
        let range = self.config.effective_range();
        let reference = if self.config.bidirectional {
            range.center
        } else {
            range.min
        };
        let base = reference as u16 + rc::PPM_OFFSET;

        let (magnitude, direction) = if raw >= base {
            (raw - base, Direction::Forward)
        } else if self.config.bidirectional {
            (base - raw, Direction::Reverse)
        } else {
            (0, Direction::Forward)
        };

        let magnitude = if self.config.bidirectional {
            (magnitude * 2).saturating_sub(rc::BIDIR_DEADBAND)
        } else {
            magnitude
        };

        let scaled = (magnitude.min(255) as u32 * self.gain as u32) >> 7;
        (scaled.min(255) as u8, direction)
    }

    fn accept(&mut self, value: u8, direction: Direction) {
        if let Some(protocol) = self.protocol {
            self.timeout = protocol.timeout_reload();
        }
        self.value = value;
        self.direction = direction;
        self.live = true;
    }
}
