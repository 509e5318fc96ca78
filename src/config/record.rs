//! Persisted parameter record
//!
//! A flat byte record. The layout revision is always the first byte so it can
//! be checked before any other field is interpreted.

/// Size of the encoded record in bytes.
pub const RECORD_LEN: usize = 25;

/// Stored parameters, one byte per setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ParamRecord {
    pub revision: u8,
    pub deployment: u8,
    pub comm_timing: u8,
    pub demag_compensation: u8,
    pub governor_mode: u8,
    pub governor_range: u8,
    pub gov_p_gain: u8,
    pub gov_i_gain: u8,
    pub gov_setup_target: u8,
    pub startup_power: u8,
    pub startup_rotations: u8,
    pub motor_gain: u8,
    pub direction: u8,
    pub ppm_min: u8,
    pub ppm_max: u8,
    pub ppm_center: u8,
    pub full_throttle_range: u8,
    pub pwm_damped: u8,
    pub beacon_delay: u8,
    pub beacon_strength: u8,
    pub temperature_protection: u8,
    pub low_voltage_limit: u8,
    pub spoolup_time: u8,
    pub motor_idle: u8,
    pub throttle_calibration: u8,
}

impl ParamRecord {
    /// Encodes the record in field order.
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        [
            self.revision,
            self.deployment,
            self.comm_timing,
            self.demag_compensation,
            self.governor_mode,
            self.governor_range,
            self.gov_p_gain,
            self.gov_i_gain,
            self.gov_setup_target,
            self.startup_power,
            self.startup_rotations,
            self.motor_gain,
            self.direction,
            self.ppm_min,
            self.ppm_max,
            self.ppm_center,
            self.full_throttle_range,
            self.pwm_damped,
            self.beacon_delay,
            self.beacon_strength,
            self.temperature_protection,
            self.low_voltage_limit,
            self.spoolup_time,
            self.motor_idle,
            self.throttle_calibration,
        ]
    }

    /// Decodes a record. Returns `None` if `bytes` is too short.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let b: &[u8; RECORD_LEN] = bytes.get(..RECORD_LEN)?.try_into().ok()?;
        Some(Self {
            revision: b[0],
            deployment: b[1],
            comm_timing: b[2],
            demag_compensation: b[3],
            governor_mode: b[4],
            governor_range: b[5],
            gov_p_gain: b[6],
            gov_i_gain: b[7],
            gov_setup_target: b[8],
            startup_power: b[9],
            startup_rotations: b[10],
            motor_gain: b[11],
            direction: b[12],
            ppm_min: b[13],
            ppm_max: b[14],
            ppm_center: b[15],
            full_throttle_range: b[16],
            pwm_damped: b[17],
            beacon_delay: b[18],
            beacon_strength: b[19],
            temperature_protection: b[20],
            low_voltage_limit: b[21],
            spoolup_time: b[22],
            motor_idle: b[23],
            throttle_calibration: b[24],
        })
    }
}
