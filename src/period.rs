//! Commutation period estimator
//!
//! Keeps a smoothed estimate of four commutation periods ("period 4x") from
//! the commutation timestamps. The filter window adapts to the speed.

use crate::config::timing::INITIAL_PERIOD4X;

/// Four commutation periods [ticks].
pub type CommPeriod = u16;

pub struct PeriodEstimator {
    period4x: CommPeriod,
    last_commutation: Option<u32>,
}

impl PeriodEstimator {
    pub const fn new() -> Self {
        Self {
            period4x: INITIAL_PERIOD4X,
            last_commutation: None,
        }
    }

    /// Restores the initial (slow) estimate and forgets the last timestamp.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn period(&self) -> CommPeriod {
        self.period4x
    }

    /// Folds in the commutation at `timestamp`.
    ///
    /// `new = old - (old >> a) + (elapsed >> b)`, with `(a, b)` chosen by the
    /// current estimate so the filter stays responsive at speed.
    pub fn on_commutation(&mut self, timestamp: u32) {
        let Some(last) = self.last_commutation.replace(timestamp) else {
            return;
        };
        let elapsed = timestamp.wrapping_sub(last).min(u16::MAX as u32);

        let old = self.period4x as u32;
        let (a, b) = if old >= 0x0800 {
            (4, 2)
        } else if old >= 0x0400 {
            (3, 1)
        } else {
            (2, 0)
        };

        let new = old - (old >> a) + (elapsed >> b);
        self.period4x = new.min(u16::MAX as u32) as u16;
    }
}

impl Default for PeriodEstimator {
    fn default() -> Self {
        Self::new()
    }
}
