//! Throttle range and transmitter calibration

use crate::config::{calibration, rc};

/// Calibrated PPM range, in 4 µs units above 1000 µs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ThrottleRange {
    pub min: u8,
    pub max: u8,
    /// Neutral point for bidirectional operation
    pub center: u8,
}

impl ThrottleRange {
    pub const DEFAULT: Self = Self {
        min: rc::DEFAULT_PPM_MIN,
        max: rc::DEFAULT_PPM_MAX,
        center: rc::DEFAULT_PPM_CENTER,
    };

    /// 1000 µs .. 2020 µs
    pub const FULL: Self = Self {
        min: 0,
        max: 255,
        center: 127,
    };

    /// Smallest gain `g` (in 1/128 units) with `span * g >= 32768`.
    pub const fn gain(&self) -> u16 {
        let mut span = self.max.saturating_sub(self.min) as u32;
        if span < rc::MIN_THROTTLE_SPAN as u32 {
            span = rc::MIN_THROTTLE_SPAN as u32;
        }
        ((32768 + span - 1) / span) as u16
    }

    /// Builds a range from the averaged raw widths at both stick extremes.
    ///
    /// Each extreme is pulled inward by a small margin and the max side is
    /// widened if the span is too small.
    pub fn from_extremes(max_avg: u16, min_avg: u16, center: u8) -> Self {
        let max = max_endpoint(max_avg);
        let min = (min_avg.saturating_sub(rc::PPM_OFFSET) + calibration::MARGIN).min(255) as u8;
        let max = max.max(min.saturating_add(rc::MIN_THROTTLE_SPAN));
        Self {
            min,
            max,
            center: center.clamp(min, max),
        }
    }
}

fn max_endpoint(max_avg: u16) -> u8 {
    max_avg
        .saturating_sub(rc::PPM_OFFSET + calibration::MARGIN)
        .min(255) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationError {
    /// No raw sample arrived within the wait limit
    NoSignal,
}

/// Averages a fixed number of raw samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleCollector {
    sum: u32,
    count: u8,
}

impl SampleCollector {
    pub const fn new() -> Self {
        Self { sum: 0, count: 0 }
    }

    /// Adds a sample and returns the average once enough were collected.
    pub fn push(&mut self, raw: u16) -> Option<u16> {
        self.sum += raw as u32;
        self.count += 1;
        if (self.count as usize) < calibration::SAMPLES {
            return None;
        }
        let average = (self.sum / self.count as u32) as u16;
        *self = Self::new();
        Some(average)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Max,
    /// Max captured; waiting for the stick to settle at the low end
    AwaitMin { max_avg: u16, low_ticks: Option<u8> },
    Min { max_avg: u16 },
}

/// Progress of a calibration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationStep {
    Collecting,
    /// Max endpoint captured (calibrated value)
    MaxCaptured(u8),
    Done(ThrottleRange),
}

/// Two-point throttle calibration: full stick, then zero stick.
pub struct ThrottleCalibration {
    stage: Stage,
    collector: SampleCollector,
    center: u8,
    idle_ticks: u16,
}

impl ThrottleCalibration {
    pub fn new(center: u8) -> Self {
        Self {
            stage: Stage::Max,
            collector: SampleCollector::new(),
            center,
            idle_ticks: 0,
        }
    }

    /// `true` while the max endpoint is still being measured.
    pub fn capturing_max(&self) -> bool {
        self.stage == Stage::Max
    }

    /// Feeds one raw PPM width in 4 µs units.
    pub fn on_sample(&mut self, raw: u16) -> CalibrationStep {
        self.idle_ticks = 0;
        match self.stage {
            Stage::Max => {
                if let Some(max_avg) = self.collector.push(raw) {
                    self.stage = Stage::AwaitMin {
                        max_avg,
                        low_ticks: None,
                    };
                    return CalibrationStep::MaxCaptured(max_endpoint(max_avg));
                }
            }
            Stage::AwaitMin { max_avg, low_ticks } => {
                let low = raw.saturating_add(rc::MIN_THROTTLE_SPAN as u16 / 2) < max_avg;
                self.stage = Stage::AwaitMin {
                    max_avg,
                    low_ticks: if low { Some(low_ticks.unwrap_or(0)) } else { None },
                };
            }
            Stage::Min { max_avg } => {
                if let Some(min_avg) = self.collector.push(raw) {
                    let range = ThrottleRange::from_extremes(max_avg, min_avg, self.center);
                    return CalibrationStep::Done(range);
                }
            }
        }
        CalibrationStep::Collecting
    }

    /// Advances by elapsed housekeeping ticks.
    pub fn on_ticks(&mut self, ticks: u8) -> Result<(), CalibrationError> {
        self.idle_ticks = self.idle_ticks.saturating_add(ticks as u16);
        if self.idle_ticks > calibration::SAMPLE_TIMEOUT_TICKS {
            return Err(CalibrationError::NoSignal);
        }

        if let Stage::AwaitMin {
            max_avg,
            low_ticks: Some(n),
        } = self.stage
        {
            let n = n.saturating_add(ticks);
            self.stage = if n >= calibration::SETTLE_TICKS {
                self.collector = SampleCollector::new();
                Stage::Min { max_avg }
            } else {
                Stage::AwaitMin {
                    max_avg,
                    low_ticks: Some(n),
                }
            };
        }
        Ok(())
    }
}
