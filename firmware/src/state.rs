//! State shared between tasks
//!
//! The RC tasks run on the interrupt executor and the motor loop in thread
//! mode, so everything here is either atomic or behind a critical section.

use core::sync::atomic::{AtomicBool, AtomicI16, AtomicU16, AtomicU8, Ordering};

use esc_core::rc_decoder::{RcConfig, SharedRcDecoder};

/// RC command decoder, fed by the capture and tick tasks
pub static RC_DECODER: SharedRcDecoder = SharedRcDecoder::new(RcConfig::DEFAULT);

/// Last level seen on the RC input
pub static RC_LINE_HIGH: AtomicBool = AtomicBool::new(false);

/// 32 ms housekeeping ticks not yet taken by the motor loop
pub static HOUSEKEEPING_TICKS: AtomicU8 = AtomicU8::new(0);

/// Filtered battery voltage [mV]
pub static BATTERY_MV: AtomicU16 = AtomicU16::new(0);

/// Power stage temperature [°C]
pub static TEMPERATURE_C: AtomicI16 = AtomicI16::new(25);

/// Counts one housekeeping tick, saturating.
pub fn add_housekeeping_tick() {
    let _ = HOUSEKEEPING_TICKS.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
        n.checked_add(1)
    });
}

pub fn take_housekeeping_ticks() -> u8 {
    HOUSEKEEPING_TICKS.swap(0, Ordering::AcqRel)
}
