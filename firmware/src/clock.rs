//! 0.5 µs tick clock on the DWT cycle counter
//!
//! The cycle counter wraps every 25 s at 170 MHz; the clock keeps its own
//! 32-bit tick count and carries the sub-tick remainder between reads. It
//! must be read at least once per wrap, which the RC tick task guarantees.

use core::cell::Cell;

use cortex_m::peripheral::DWT;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::config::CYCLES_PER_TICK;

struct TickState {
    last_cycles: Cell<u32>,
    remainder: Cell<u32>,
    ticks: Cell<u32>,
}

static STATE: Mutex<CriticalSectionRawMutex, TickState> = Mutex::new(TickState {
    last_cycles: Cell::new(0),
    remainder: Cell::new(0),
    ticks: Cell::new(0),
});

/// Enables the DWT cycle counter.
///
/// # Safety
/// Steals the core peripherals; call once during init.
pub unsafe fn enable_cycle_counter() {
    let mut cp = cortex_m::Peripherals::steal();
    cp.DCB.enable_trace();
    cp.DWT.enable_cycle_counter();
    STATE.lock(|s| s.last_cycles.set(DWT::cycle_count()));
}

/// Current time in 0.5 µs ticks. Wraps.
pub fn ticks() -> u32 {
    STATE.lock(|s| {
        let now = DWT::cycle_count();
        let elapsed = now
            .wrapping_sub(s.last_cycles.get())
            .wrapping_add(s.remainder.get());
        s.last_cycles.set(now);
        s.remainder.set(elapsed % CYCLES_PER_TICK);
        let ticks = s.ticks.get().wrapping_add(elapsed / CYCLES_PER_TICK);
        s.ticks.set(ticks);
        ticks
    })
}

/// Countdown on top of [`ticks`].
pub struct Deadline {
    at: u32,
}

impl Deadline {
    pub const fn new() -> Self {
        Self { at: 0 }
    }

    pub fn start(&mut self, duration: u16) {
        self.at = ticks().wrapping_add(duration as u32);
    }

    pub fn expired(&self) -> bool {
        ticks().wrapping_sub(self.at) as i32 >= 0
    }
}
