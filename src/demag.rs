//! Demagnetization detector
//!
//! A winding that is still demagnetizing when the zero-cross scan starts
//! makes the comparator read the wrong level. The detector keeps a filtered
//! metric of how often the first comparator read of a scan is wrong and
//! cuts power for the rest of the electrical cycle when the metric gets too
//! high.

use crate::config::demag::{CUTOFF_DISABLED, METRIC_FLOOR};
use crate::config::DemagCompensation;

/// Filtered demag metric, always within `[120, 255]`.
pub type DemagMetric = u8;

pub struct DemagDetector {
    metric: DemagMetric,
    cutoff: u8,
    enabled: bool,
    power_cut: bool,
}

impl DemagDetector {
    pub fn new(compensation: DemagCompensation) -> Self {
        Self {
            metric: METRIC_FLOOR,
            cutoff: compensation.cutoff(),
            enabled: false,
            power_cut: false,
        }
    }

    pub fn metric(&self) -> DemagMetric {
        self.metric
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Enables or disables protection. Disabling also drops a pending cut.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.power_cut = false;
        }
    }

    /// `true` while power must stay off until the next commutation.
    pub fn power_cut(&self) -> bool {
        self.power_cut
    }

    /// Called at every commutation.
    pub fn clear_cut(&mut self) {
        self.power_cut = false;
    }

    /// Puts the metric back to its floor (new startup).
    pub fn reset(&mut self) {
        self.metric = METRIC_FLOOR;
        self.power_cut = false;
    }

    /// Folds in the outcome of the first comparator read of a zero-cross scan.
    ///
    /// Returns `true` if this update raised the power cut.
    pub fn update(&mut self, first_read_ok: bool) -> bool {
        if !self.enabled {
            return false;
        }

        let sample: u16 = if first_read_ok { 0 } else { 255 };
        let metric = (self.metric as u16 * 7 + sample) / 8;
        self.metric = (metric as u8).max(METRIC_FLOOR);

        // Cutoff 255 means compensation is off.
        if self.cutoff != CUTOFF_DISABLED && self.metric >= self.cutoff {
            if !self.power_cut {
                debug!("Demag power cut, metric {}", self.metric);
            }
            self.power_cut = true;
            return true;
        }
        false
    }
}
