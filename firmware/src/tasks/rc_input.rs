//! RC input tasks
//!
//! Both run on the high-priority executor so edge timestamps are not delayed
//! by the motor loop's busy waits.

use core::sync::atomic::Ordering;

use embassy_stm32::exti::ExtiInput;
use embassy_time::{Duration, Ticker};
use esc_core::rc_decoder::EdgeSample;

use crate::clock;
use crate::config::rc::{FAST_TICKS_PER_HOUSEKEEPING, FAST_TICK_US};
use crate::fmt::*;
use crate::state::{self, RC_DECODER, RC_LINE_HIGH};

/// Timestamps every edge of the RC input.
#[embassy_executor::task]
pub async fn rc_capture_task(mut input: ExtiInput<'static>) {
    info!("RC capture task started");
    RC_LINE_HIGH.store(input.is_high(), Ordering::Release);

    loop {
        input.wait_for_any_edge().await;
        let timestamp = clock::ticks();
        let rising = input.is_high();
        RC_LINE_HIGH.store(rising, Ordering::Release);
        RC_DECODER.on_edge(EdgeSample { timestamp, rising });
    }
}

/// 128 µs decoder tick; every 250th is also the 32 ms housekeeping tick.
#[embassy_executor::task]
pub async fn rc_tick_task() {
    let mut ticker = Ticker::every(Duration::from_micros(FAST_TICK_US));
    let mut fast_ticks = 0u16;

    loop {
        ticker.next().await;
        // Keeps the tick clock ahead of the cycle counter wrap
        clock::ticks();

        RC_DECODER.on_fast_tick(RC_LINE_HIGH.load(Ordering::Acquire));

        fast_ticks += 1;
        if fast_ticks >= FAST_TICKS_PER_HOUSEKEEPING {
            fast_ticks = 0;
            RC_DECODER.on_slow_tick();
            state::add_housekeeping_tick();
        }
    }
}
