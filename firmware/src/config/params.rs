//! Board parameters

use esc_core::Deployment;

/// Deployment this binary is built for
#[cfg(feature = "tail")]
pub const DEPLOYMENT: Deployment = Deployment::Tail;
#[cfg(all(feature = "multi", not(feature = "tail")))]
pub const DEPLOYMENT: Deployment = Deployment::Multi;
#[cfg(not(any(feature = "tail", feature = "multi")))]
pub const DEPLOYMENT: Deployment = Deployment::Main;

/// Core clock [Hz]
pub const SYSCLK_HZ: u32 = 170_000_000;

/// Core cycles per 0.5 µs timer tick
pub const CYCLES_PER_TICK: u32 = SYSCLK_HZ / 2_000_000;

/// RC decoder timing
pub mod rc {
    /// Fast tick period [µs]
    pub const FAST_TICK_US: u64 = 128;

    /// Fast ticks per 32 ms housekeeping tick
    pub const FAST_TICKS_PER_HOUSEKEEPING: u16 = 250;
}

/// PWM settings
pub mod pwm {
    use embassy_stm32::time::Hertz;

    /// Bridge PWM frequency (24 kHz, above audible range)
    pub const DEFAULT_FREQUENCY: Hertz = Hertz(24_000);

    /// Dead time [timer clocks]
    pub const DEFAULT_DEAD_TIME: u16 = 50;

    /// Duty used while beeping
    pub const BEEP_DUTY: u8 = 24;
}

/// Analog front end
pub mod analog {
    /// Bus voltage divider: 33.3 kΩ over 3.3 kΩ
    pub const R_UPPER_OHM: u32 = 33_300;
    pub const R_LOWER_OHM: u32 = 3_300;

    /// ADC full scale
    pub const ADC_MAX: u32 = 4096;

    /// ADC reference [mV]
    pub const VREF_MV: u32 = 3300;

    /// Sampling period [ms]
    pub const SAMPLE_PERIOD_MS: u64 = 100;

    /// Filter weight of a new sample, in 1/16
    pub const FILTER_WEIGHT: u32 = 2;
}
