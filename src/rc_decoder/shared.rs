//! Decoder shared between interrupt-level producers and the main loop

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use super::{EdgeSample, RcConfig, RcDecoder, ThrottleCommand, ThrottleRange};

/// [`RcDecoder`] behind a critical-section mutex.
///
/// Edge capture and the periodic ticks run in other tasks; every access
/// holds the critical section for the duration of one decoder call.
pub struct SharedRcDecoder {
    inner: Mutex<CriticalSectionRawMutex, RefCell<RcDecoder>>,
}

impl SharedRcDecoder {
    pub const fn new(config: RcConfig) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(RcDecoder::new(config))),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut RcDecoder) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }

    pub fn configure(&self, config: RcConfig) {
        self.with(|d| d.configure(config));
    }

    pub fn on_edge(&self, edge: EdgeSample) {
        self.with(|d| d.on_edge(edge));
    }

    pub fn on_fast_tick(&self, line_high: bool) {
        self.with(|d| d.on_fast_tick(line_high));
    }

    pub fn on_slow_tick(&self) {
        self.with(|d| d.on_slow_tick());
    }

    pub fn command(&self) -> ThrottleCommand {
        self.with(|d| d.command())
    }

    pub fn take_raw_width(&self) -> Option<u16> {
        self.with(|d| d.take_raw_width())
    }

    pub fn set_range(&self, range: ThrottleRange) {
        self.with(|d| d.set_range(range));
    }

    pub fn restart_detection(&self) {
        self.with(|d| d.restart_detection());
    }
}
