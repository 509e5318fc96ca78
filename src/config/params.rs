//! Default parameters and fixed constants of the controller.
//!
//! Time values are in timer ticks of 0.5 µs unless the name says otherwise.
//! Housekeeping ticks are 32 ms, fast ticks are 128 µs.

/// Parameter record layout revision. Bumped whenever the stored layout changes.
pub const LAYOUT_REVISION: u8 = 19;

/// Nominal startup power before the startup power table is applied.
pub const PWM_START: u8 = 50;

/// RC command full scale.
pub const RCP_MAX: u8 = 255;

/// Commands below this value count as "stop".
pub const RCP_STOP: u8 = 1;

/// Midstick value used to detect calibration requests and governor minimum.
pub const RCP_MIDSTICK: u8 = 127;

/// Startup power table (64 = 1.0x of `PWM_START`).
pub const STARTUP_POWER_TABLE: [u8; 13] = [4, 6, 8, 12, 16, 24, 32, 48, 64, 96, 128, 160, 192];

/// Governor gain table in 1/16 units (0.13x .. 8.0x).
pub const GOV_GAIN_TABLE: [u8; 13] = [2, 3, 4, 6, 8, 12, 16, 24, 32, 48, 64, 96, 128];

/// RC input decoding
pub mod rc {
    /// Periods shorter than this are noise (70 µs).
    pub const NOISE_LIMIT: u32 = 140;

    /// Upper bounds of the carrier buckets, highest frequency first.
    pub const PWM_12KHZ_LIMIT: u32 = 200;
    pub const PWM_8KHZ_LIMIT: u32 = 360;
    pub const PWM_4KHZ_LIMIT: u32 = 720;
    pub const PWM_2KHZ_LIMIT: u32 = 1440;
    pub const PWM_1KHZ_LIMIT: u32 = 2200;

    /// Consecutive consistent periods needed to lock a carrier.
    pub const VALIDATE_PULSES: u8 = 12;

    /// Measurement restarts before falling back to no-signal detection.
    pub const MEASURE_ATTEMPTS: u8 = 3;

    /// Legal PPM window in 4 µs units (800 µs .. 2160 µs).
    pub const PPM_RANGE_LOW: u16 = 200;
    pub const PPM_RANGE_HIGH: u16 = 540;

    /// OneShot125 window in 0.5 µs ticks (125 µs .. 270 µs).
    pub const ONESHOT_RANGE_LOW: u32 = 250;
    pub const ONESHOT_RANGE_HIGH: u32 = 540;

    /// Consecutive out of range pulses that force the command to zero.
    pub const OUTSIDE_RANGE_LIMIT: u8 = 10;

    /// Offset between calibration values and raw PPM widths (1000 µs in 4 µs units).
    pub const PPM_OFFSET: u16 = 250;

    /// Bidirectional deadband around center.
    pub const BIDIR_DEADBAND: u16 = 10;

    /// Minimum span between calibrated min and max (520 µs).
    pub const MIN_THROTTLE_SPAN: u8 = 130;

    /// Loss timeout for PWM carriers, in fast ticks.
    pub const TIMEOUT_PWM_TICKS: u8 = 24;

    /// Loss timeout for PPM and OneShot125, in housekeeping ticks.
    pub const TIMEOUT_PPM_TICKS: u8 = 10;

    /// Housekeeping ticks below stop before a running motor is stopped.
    pub const STOP_LIMIT: u8 = 250;

    /// Tail motors give up earlier.
    pub const STOP_LIMIT_TAIL: u8 = 130;

    /// Power-on hysteresis added to `RCP_STOP` for PWM carriers.
    pub const POWER_ON_HYSTERESIS_PWM: u8 = 5;

    /// Arm exit margin added to `RCP_STOP` for bidirectional setups.
    pub const ARM_BIDIR_MARGIN: u8 = 4;

    /// Defaults in 4 µs units above 1000 µs.
    pub const DEFAULT_PPM_MIN: u8 = 37; // 1148 µs
    pub const DEFAULT_PPM_MAX: u8 = 208; // 1832 µs
    pub const DEFAULT_PPM_CENTER: u8 = 122; // 1488 µs
}

/// Throttle calibration
pub mod calibration {
    /// Samples averaged per extreme.
    pub const SAMPLES: usize = 16;

    /// Margin pulled inside each measured extreme.
    pub const MARGIN: u16 = 5;

    /// Housekeeping ticks to wait for a single sample before giving up.
    pub const SAMPLE_TIMEOUT_TICKS: u16 = 100;

    /// Housekeeping ticks the stick must stay at an extreme before sampling.
    pub const SETTLE_TICKS: u8 = 32;
}

/// Commutation timing
pub mod timing {
    /// Initial commutation period (4x scaled).
    pub const INITIAL_PERIOD4X: u16 = 0x7F00;

    /// Minimum wait time.
    pub const COMM_TIME_MIN: u16 = 2;

    /// Base reduction subtracted from the quarter period.
    pub const COMM_TIME_RED: u16 = 1;

    /// Demag metric levels that push the timing up one step each.
    pub const DEMAG_TIMING_STEP1: u8 = 130;
    pub const DEMAG_TIMING_STEP2: u8 = 160;

    /// Slowest commutation period tolerated in run.
    pub const MAX_RUN_PERIOD4X: u16 = 0xF000;

    /// Slowest commutation period tolerated while braking for a reversal.
    pub const MAX_BRAKE_PERIOD4X: u16 = 0x6000;
}

/// Demagnetization
pub mod demag {
    /// Lower bound of the demag metric.
    pub const METRIC_FLOOR: u8 = 120;

    /// Power cut thresholds per compensation setting.
    pub const CUTOFF_DISABLED: u8 = 255;
    pub const CUTOFF_LOW: u8 = 160;
    pub const CUTOFF_HIGH: u8 = 130;

    /// Low-RPM power ceiling slope per compensation setting.
    pub const LOW_RPM_SLOPE_DISABLED: u8 = 12;
    pub const LOW_RPM_SLOPE_LOW: u8 = 10;
    pub const LOW_RPM_SLOPE_HIGH: u8 = 5;

    /// Power above which demag protection is always enabled (25%).
    pub const ENABLE_POWER: u8 = 0x40;
}

/// Startup
pub mod startup {
    /// Good commutations needed to leave direct startup.
    pub const OK_REQUIRED: u8 = 24;

    /// Good commutations below which the scan timeout is randomized.
    pub const DEADLOCK_BREAK_OK: u8 = 8;

    /// Default maximum rotations allowed for direct startup.
    pub const DEFAULT_ROTATIONS: u8 = 20;

    /// Rotations of the initial run phase after startup.
    pub const INITIAL_RUN_ROTATIONS: u8 = 12;

    /// Restarts after a stall before waiting for a new power-on.
    pub const MAX_RETRIES: u8 = 3;

    /// Extra power boost for multi rotor startup.
    pub const MULTI_BOOST: u8 = 8;

    /// Output settle time after switching power off (1 ms).
    pub const STOP_SETTLE_TICKS: u16 = 2000;
}

/// Governor
pub mod governor {
    /// Governor requested power slew steps per housekeeping tick.
    pub const SPOOLRATE: u8 = 2;

    /// Activation limits (CommPeriod) per range.
    pub const ACTIVATION_HIGH: u16 = 0x0500;
    pub const ACTIVATION_MIDDLE: u16 = 0x0A00;
    pub const ACTIVATION_LOW: u16 = 0x1200;

    /// Integral and correction clamp.
    pub const CLAMP: i16 = 127;

    /// Reciprocal constant of the multi rotor speed mapping.
    pub const MULTI_RECIPROCAL: u32 = 102_000;

    /// Requested power at which arm/setup targets take over.
    pub const TARGET_OVERRIDE_MIN: u8 = 50;

    /// Requested governor power after a spoolup ceiling reset.
    pub const SPOOLUP_RESET_REQ: u8 = 60;

    pub const DEFAULT_SETUP_TARGET: u8 = 180;
    pub const DEFAULT_SPOOLUP_TIME: u8 = 10;

    /// Table indices (1-based) of the default gains.
    pub const DEFAULT_P_GAIN_MAIN: u8 = 7;
    pub const DEFAULT_I_GAIN_MAIN: u8 = 7;
    pub const DEFAULT_P_GAIN_MULTI: u8 = 9;
    pub const DEFAULT_I_GAIN_MULTI: u8 = 9;
}

/// Protection
pub mod protection {
    /// Temperature where power limiting starts [°C].
    pub const TEMP_LIMIT_C: i16 = 120;

    /// Temperature step between power limit levels [°C].
    pub const TEMP_STEP_C: i16 = 10;

    /// Power ceilings above the limit, one per step.
    pub const TEMP_CEILINGS: [u8; 4] = [192, 128, 64, 0];

    /// Cell voltage used to estimate the cell count [mV].
    pub const CELL_MAX_MV: u16 = 4300;

    /// Lowest ceiling the under-voltage limiter goes down to.
    pub const VOLTAGE_CEILING_FLOOR: u8 = 32;
}

/// Beacon
pub mod beacon {
    /// Housekeeping ticks per minute.
    pub const TICKS_PER_MINUTE: u32 = 1875;

    /// Ticks between beacon tones (about 3 s).
    pub const INTERVAL_TICKS: u32 = 94;
}
