//! Configuration
//!
//! Typed controller settings, the flat record they are persisted as, and the
//! load policy that falls back to defaults whenever the stored record cannot
//! be trusted.

pub mod params;
pub mod record;

pub use params::*;
pub use record::ParamRecord;

use crate::hal::ParamStore;
use crate::rc_decoder::{RcConfig, ThrottleRange};

/// Which rotor the controller is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Deployment {
    /// Single main rotor: speed-target governor, spoolup and bailout
    Main,
    /// Tail rotor: no governor, idle power floor
    Tail,
    /// Multi rotor: proportional governor, startup boost
    Multi,
}

/// Commutation timing setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommTiming {
    Low = 1,
    MediumLow = 2,
    Medium = 3,
    MediumHigh = 4,
    High = 5,
}

impl CommTiming {
    pub fn from_step(step: u8) -> Option<Self> {
        match step {
            1 => Some(Self::Low),
            2 => Some(Self::MediumLow),
            3 => Some(Self::Medium),
            4 => Some(Self::MediumHigh),
            5 => Some(Self::High),
            _ => None,
        }
    }

    pub fn step(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DemagCompensation {
    Off = 1,
    Low = 2,
    High = 3,
}

impl DemagCompensation {
    /// Demag metric at which power is cut.
    pub fn cutoff(self) -> u8 {
        match self {
            Self::Off => demag::CUTOFF_DISABLED,
            Self::Low => demag::CUTOFF_LOW,
            Self::High => demag::CUTOFF_HIGH,
        }
    }

    /// Slope of the low-RPM power ceiling.
    pub fn low_rpm_slope(self) -> u8 {
        match self {
            Self::Off => demag::LOW_RPM_SLOPE_DISABLED,
            Self::Low => demag::LOW_RPM_SLOPE_LOW,
            Self::High => demag::LOW_RPM_SLOPE_HIGH,
        }
    }
}

/// Governor mode. The first three are main rotor modes, `Proportional` is
/// the multi rotor mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GovernorMode {
    /// Target follows the transmitter
    Transmitter,
    /// Target is the highest command seen while arming
    ArmTarget,
    /// Target is the configured setup target
    SetupTarget,
    /// Multi rotor closed loop
    Proportional,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GovernorRange {
    High = 1,
    Middle = 2,
    Low = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotorDirection {
    Normal = 1,
    Reversed = 2,
    Bidirectional = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BeaconDelay {
    OneMinute = 1,
    TwoMinutes = 2,
    FiveMinutes = 3,
    TenMinutes = 4,
    Never = 5,
}

impl BeaconDelay {
    /// Delay in housekeeping ticks, `None` when the beacon is disabled.
    pub fn ticks(self) -> Option<u32> {
        let minutes = match self {
            Self::OneMinute => 1,
            Self::TwoMinutes => 2,
            Self::FiveMinutes => 5,
            Self::TenMinutes => 10,
            Self::Never => return None,
        };
        Some(minutes * beacon::TICKS_PER_MINUTE)
    }
}

/// Errors found while decoding a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Layout revision differs from `LAYOUT_REVISION`
    RevisionMismatch(u8),
    /// Record was written for another rotor type
    DeploymentMismatch,
    /// A field holds a value outside its legal range
    InvalidField(&'static str),
}

/// Decoded controller configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EscConfig {
    pub deployment: Deployment,
    pub comm_timing: CommTiming,
    pub demag_compensation: DemagCompensation,
    pub governor_mode: GovernorMode,
    pub governor_range: GovernorRange,
    /// Proportional gain in 1/16 units (table value)
    pub gov_p_gain: u8,
    /// Integral gain in 1/16 units (table value)
    pub gov_i_gain: u8,
    pub gov_setup_target: u8,
    /// Startup power table value (64 = 1.0x)
    pub startup_power: u8,
    pub startup_rotations: u8,
    /// Motor gain setting 1..5 (3 = 1.0x)
    pub motor_gain: u8,
    pub direction: MotorDirection,
    pub throttle: ThrottleRange,
    pub full_throttle_range: bool,
    /// Damped (complementary) PWM in run
    pub damped: bool,
    pub beacon_delay: BeaconDelay,
    pub beacon_strength: u8,
    pub temperature_protection: bool,
    /// Per cell cut-in voltage [mV], `None` when disabled
    pub low_voltage_limit_mv: Option<u16>,
    pub spoolup_time: u8,
    pub motor_idle: u8,
    pub throttle_calibration: bool,
}

impl EscConfig {
    /// Factory defaults for a deployment.
    pub const fn defaults(deployment: Deployment) -> Self {
        let (governor_mode, p_gain, i_gain) = match deployment {
            Deployment::Main => (
                GovernorMode::Transmitter,
                GOV_GAIN_TABLE[governor::DEFAULT_P_GAIN_MAIN as usize - 1],
                GOV_GAIN_TABLE[governor::DEFAULT_I_GAIN_MAIN as usize - 1],
            ),
            Deployment::Tail => (
                GovernorMode::Off,
                GOV_GAIN_TABLE[governor::DEFAULT_P_GAIN_MAIN as usize - 1],
                GOV_GAIN_TABLE[governor::DEFAULT_I_GAIN_MAIN as usize - 1],
            ),
            Deployment::Multi => (
                GovernorMode::Off,
                GOV_GAIN_TABLE[governor::DEFAULT_P_GAIN_MULTI as usize - 1],
                GOV_GAIN_TABLE[governor::DEFAULT_I_GAIN_MULTI as usize - 1],
            ),
        };
        Self {
            deployment,
            comm_timing: CommTiming::Medium,
            demag_compensation: DemagCompensation::Low,
            governor_mode,
            governor_range: GovernorRange::High,
            gov_p_gain: p_gain,
            gov_i_gain: i_gain,
            gov_setup_target: governor::DEFAULT_SETUP_TARGET,
            startup_power: STARTUP_POWER_TABLE[8],
            startup_rotations: startup::DEFAULT_ROTATIONS,
            motor_gain: 3,
            direction: MotorDirection::Normal,
            throttle: ThrottleRange::DEFAULT,
            full_throttle_range: false,
            damped: true,
            beacon_delay: BeaconDelay::TenMinutes,
            beacon_strength: 80,
            temperature_protection: true,
            low_voltage_limit_mv: None,
            spoolup_time: governor::DEFAULT_SPOOLUP_TIME,
            motor_idle: 0,
            throttle_calibration: true,
        }
    }

    pub fn bidirectional(&self) -> bool {
        self.direction == MotorDirection::Bidirectional
    }

    /// Decoder settings for this configuration.
    pub fn rc_config(&self) -> RcConfig {
        RcConfig {
            range: self.throttle,
            bidirectional: self.bidirectional(),
            full_throttle_range: self.full_throttle_range,
        }
    }

    /// Decodes a stored record. The revision is checked before any other field.
    pub fn from_record(record: &ParamRecord, expected: Deployment) -> Result<Self, ConfigError> {
        if record.revision != LAYOUT_REVISION {
            return Err(ConfigError::RevisionMismatch(record.revision));
        }

        let deployment = match record.deployment {
            1 => Deployment::Main,
            2 => Deployment::Tail,
            3 => Deployment::Multi,
            _ => return Err(ConfigError::InvalidField("deployment")),
        };
        if deployment != expected {
            return Err(ConfigError::DeploymentMismatch);
        }

        let comm_timing =
            CommTiming::from_step(record.comm_timing).ok_or(ConfigError::InvalidField("comm_timing"))?;

        let demag_compensation = match record.demag_compensation {
            1 => DemagCompensation::Off,
            2 => DemagCompensation::Low,
            3 => DemagCompensation::High,
            _ => return Err(ConfigError::InvalidField("demag_compensation")),
        };

        let governor_mode = match (deployment, record.governor_mode) {
            (Deployment::Main, 1) => GovernorMode::Transmitter,
            (Deployment::Main, 2) => GovernorMode::ArmTarget,
            (Deployment::Main, 3) => GovernorMode::SetupTarget,
            (Deployment::Multi, 1..=3) => GovernorMode::Proportional,
            (_, 4) => GovernorMode::Off,
            (Deployment::Tail, _) => GovernorMode::Off,
            _ => return Err(ConfigError::InvalidField("governor_mode")),
        };

        let governor_range = match record.governor_range {
            1 => GovernorRange::High,
            2 => GovernorRange::Middle,
            3 => GovernorRange::Low,
            _ => return Err(ConfigError::InvalidField("governor_range")),
        };

        let gov_p_gain = table_lookup(&GOV_GAIN_TABLE, record.gov_p_gain)
            .ok_or(ConfigError::InvalidField("gov_p_gain"))?;
        let gov_i_gain = table_lookup(&GOV_GAIN_TABLE, record.gov_i_gain)
            .ok_or(ConfigError::InvalidField("gov_i_gain"))?;
        let startup_power = table_lookup(&STARTUP_POWER_TABLE, record.startup_power)
            .ok_or(ConfigError::InvalidField("startup_power"))?;

        if record.startup_rotations == 0 {
            return Err(ConfigError::InvalidField("startup_rotations"));
        }
        if !(1..=5).contains(&record.motor_gain) {
            return Err(ConfigError::InvalidField("motor_gain"));
        }

        let direction = match record.direction {
            1 => MotorDirection::Normal,
            2 => MotorDirection::Reversed,
            3 => MotorDirection::Bidirectional,
            _ => return Err(ConfigError::InvalidField("direction")),
        };

        let beacon_delay = match record.beacon_delay {
            1 => BeaconDelay::OneMinute,
            2 => BeaconDelay::TwoMinutes,
            3 => BeaconDelay::FiveMinutes,
            4 => BeaconDelay::TenMinutes,
            5 => BeaconDelay::Never,
            _ => return Err(ConfigError::InvalidField("beacon_delay")),
        };

        // 1 = off, 2..6 = 3.0 V .. 3.4 V per cell
        let low_voltage_limit_mv = match record.low_voltage_limit {
            1 => None,
            n @ 2..=6 => Some(3000 + (n as u16 - 2) * 100),
            _ => return Err(ConfigError::InvalidField("low_voltage_limit")),
        };

        let throttle = ThrottleRange {
            min: record.ppm_min,
            max: record.ppm_max,
            center: record.ppm_center,
        };
        if throttle.max <= throttle.min {
            return Err(ConfigError::InvalidField("ppm_range"));
        }

        Ok(Self {
            deployment,
            comm_timing,
            demag_compensation,
            governor_mode,
            governor_range,
            gov_p_gain,
            gov_i_gain,
            gov_setup_target: record.gov_setup_target,
            startup_power,
            startup_rotations: record.startup_rotations,
            motor_gain: record.motor_gain,
            direction,
            throttle,
            full_throttle_range: record.full_throttle_range != 0,
            damped: record.pwm_damped != 0,
            beacon_delay,
            beacon_strength: record.beacon_strength,
            temperature_protection: record.temperature_protection != 0,
            low_voltage_limit_mv,
            spoolup_time: record.spoolup_time,
            motor_idle: record.motor_idle,
            throttle_calibration: record.throttle_calibration != 0,
        })
    }

    /// Encodes the configuration as a record with the current layout revision.
    pub fn to_record(&self) -> ParamRecord {
        let governor_mode = match self.governor_mode {
            GovernorMode::Transmitter | GovernorMode::Proportional => 1,
            GovernorMode::ArmTarget => 2,
            GovernorMode::SetupTarget => 3,
            GovernorMode::Off => 4,
        };
        ParamRecord {
            revision: LAYOUT_REVISION,
            deployment: match self.deployment {
                Deployment::Main => 1,
                Deployment::Tail => 2,
                Deployment::Multi => 3,
            },
            comm_timing: self.comm_timing.step(),
            demag_compensation: self.demag_compensation as u8,
            governor_mode,
            governor_range: self.governor_range as u8,
            gov_p_gain: table_index(&GOV_GAIN_TABLE, self.gov_p_gain),
            gov_i_gain: table_index(&GOV_GAIN_TABLE, self.gov_i_gain),
            gov_setup_target: self.gov_setup_target,
            startup_power: table_index(&STARTUP_POWER_TABLE, self.startup_power),
            startup_rotations: self.startup_rotations,
            motor_gain: self.motor_gain,
            direction: self.direction as u8,
            ppm_min: self.throttle.min,
            ppm_max: self.throttle.max,
            ppm_center: self.throttle.center,
            full_throttle_range: self.full_throttle_range as u8,
            pwm_damped: self.damped as u8,
            beacon_delay: self.beacon_delay as u8,
            beacon_strength: self.beacon_strength,
            temperature_protection: self.temperature_protection as u8,
            low_voltage_limit: match self.low_voltage_limit_mv {
                None => 1,
                Some(mv) => (mv.saturating_sub(3000) / 100).min(4) as u8 + 2,
            },
            spoolup_time: self.spoolup_time,
            motor_idle: self.motor_idle,
            throttle_calibration: self.throttle_calibration as u8,
        }
    }
}

/// Looks up a 1-based table setting.
fn table_lookup(table: &[u8; 13], setting: u8) -> Option<u8> {
    table.get((setting as usize).checked_sub(1)?).copied()
}

/// Finds the 1-based setting of a table value, rounding up to the next entry.
fn table_index(table: &[u8; 13], value: u8) -> u8 {
    table
        .iter()
        .position(|&v| v >= value)
        .map_or(table.len() as u8, |i| i as u8 + 1)
}

/// Loads the configuration, falling back to (and storing) defaults when the
/// stored record is unreadable or invalid.
pub fn load_config<S: ParamStore>(store: &mut S, deployment: Deployment) -> EscConfig {
    let result = match store.load() {
        Ok(record) => EscConfig::from_record(&record, deployment),
        Err(e) => {
            error!("Failed to read parameters: {:?}", e);
            return initialize_defaults(store, deployment);
        }
    };

    match result {
        Ok(config) => {
            info!("Parameters loaded (revision {})", LAYOUT_REVISION);
            config
        }
        Err(e) => {
            error!("Stored parameters rejected: {:?}, using defaults", e);
            initialize_defaults(store, deployment)
        }
    }
}

fn initialize_defaults<S: ParamStore>(store: &mut S, deployment: Deployment) -> EscConfig {
    let config = EscConfig::defaults(deployment);
    if let Err(e) = store.save(&config.to_record()) {
        error!("Failed to store default parameters: {:?}", e);
    }
    config
}
