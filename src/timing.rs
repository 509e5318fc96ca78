//! Commutation timing scheduler
//!
//! Derives the four waits of one commutation step from a single period
//! snapshot:
//!
//! ```text
//!  zero-cross ── wait_comm ──> commutate ── wait_advance ──> ── wait_zc_scan ──> scan
//! ```
//!
//! The scan then gives up after `wait_zc_timeout`.

use crate::config::timing::{COMM_TIME_MIN, COMM_TIME_RED, DEMAG_TIMING_STEP1, DEMAG_TIMING_STEP2};
use crate::config::CommTiming;
use crate::demag::DemagMetric;
use crate::period::CommPeriod;

/// Waits of one commutation step [ticks].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimingSchedule {
    /// Zero-cross to commutation
    pub wait_comm: u16,
    /// Commutation to the start of the blanking window
    pub wait_advance: u16,
    /// Blanking before the comparator is scanned
    pub wait_zc_scan: u16,
    /// Scan timeout
    pub wait_zc_timeout: u16,
}

/// How many comparator reads confirm a zero-cross.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ZeroCrossFilter {
    pub windows: u8,
    pub reads: u8,
}

impl ZeroCrossFilter {
    /// More reads at low speed where the back-EMF slope is shallow.
    pub fn for_period(period4x: CommPeriod) -> Self {
        let (windows, reads) = if period4x > 0x0F00 {
            (3, 3)
        } else if period4x > 0x0A00 {
            (3, 2)
        } else if period4x > 0x0500 {
            (2, 2)
        } else {
            (1, 1)
        };
        Self { windows, reads }
    }

    /// Consecutive correct reads needed. A wrong read starts over.
    pub fn required_reads(&self) -> u8 {
        self.windows * self.reads
    }
}

pub struct TimingScheduler {
    timing: CommTiming,
    damped: bool,
}

impl TimingScheduler {
    pub fn new(timing: CommTiming, damped: bool) -> Self {
        Self { timing, damped }
    }

    pub fn set_damped(&mut self, damped: bool) {
        self.damped = damped;
    }

    /// Configured timing, advanced one step per demag level.
    pub fn effective_timing(&self, metric: DemagMetric) -> CommTiming {
        let mut step = self.timing.step();
        if metric >= DEMAG_TIMING_STEP1 {
            step += 1;
        }
        if metric >= DEMAG_TIMING_STEP2 {
            step += 1;
        }
        CommTiming::from_step(step.min(CommTiming::High.step())).unwrap_or(CommTiming::High)
    }

    pub fn schedule(&self, period4x: CommPeriod, metric: DemagMetric) -> TimingSchedule {
        let damped = self.damped as u16;

        // Fixed latency in the commutation path matters more at high speed
        let mut reduction = COMM_TIME_RED + damped;
        if period4x < 0x0300 {
            reduction += 2 + damped;
        }
        if period4x < 0x0200 {
            reduction += 2 + damped;
        }

        let quarter = (period4x / 16).saturating_sub(reduction).max(COMM_TIME_MIN);
        let half = quarter / 2;

        let timing = self.effective_timing(metric);
        let (long, short) = match timing {
            CommTiming::MediumLow | CommTiming::MediumHigh => (quarter + half, half),
            CommTiming::Low | CommTiming::High => (2 * quarter - COMM_TIME_MIN, COMM_TIME_MIN),
            CommTiming::Medium => (quarter, quarter),
        };
        let (wait_comm, wait_advance) = if timing > CommTiming::Medium {
            (short, long)
        } else {
            (long, short)
        };

        // Advance and blanking stay within one commutation step even where
        // the floors above exceed it (period4x below about 0x40)
        let step = period4x / 4;
        let wait_advance = wait_advance.min(step);
        let wait_zc_scan = half.min(step - wait_advance);
        debug_assert!(wait_advance + wait_zc_scan <= step);

        TimingSchedule {
            wait_comm,
            wait_advance,
            wait_zc_scan,
            wait_zc_timeout: quarter,
        }
    }
}
