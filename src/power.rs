//! Power shaping and protection ceilings
//!
//! The power that reaches the bridge is the governor (or requested) power
//! clipped by every active ceiling:
//!
//! * `pwm_limit`: startup power during startup, full power afterwards
//! * spoolup ceiling (main rotor)
//! * low-RPM ceiling
//! * temperature ceiling
//! * under-voltage ceiling
//!
//! and forced to zero while a demag power cut is active.

use crate::config::demag::ENABLE_POWER;
use crate::config::protection::{
    CELL_MAX_MV, TEMP_CEILINGS, TEMP_LIMIT_C, TEMP_STEP_C, VOLTAGE_CEILING_FLOOR,
};
use crate::config::startup::MULTI_BOOST;
use crate::config::{Deployment, EscConfig, GovernorMode, PWM_START, STARTUP_POWER_TABLE};
use crate::period::CommPeriod;
use crate::rc_decoder::{RcProtocol, ThrottleCommand};

/// Motor gain settings 1..5 in 1/64 units (0.75x .. 1.25x).
const MOTOR_GAIN: [u16; 5] = [48, 56, 64, 72, 80];

/// Requested power from the decoded command.
///
/// PWM inputs without closed loop get a 1.0625x gain (full scale of a PWM
/// carrier is about 240) and then the motor gain. Tail motors never drop
/// below `idle`.
pub fn requested_power(command: &ThrottleCommand, config: &EscConfig, idle: u8) -> u8 {
    let pwm_input = matches!(command.protocol, Some(RcProtocol::Pwm(_)));
    let open_loop = match config.deployment {
        Deployment::Main => false,
        Deployment::Tail => true,
        Deployment::Multi => config.governor_mode == GovernorMode::Off,
    };

    let mut power = command.value;
    if pwm_input && open_loop {
        let clipped = power.min(240);
        power = clipped + clipped / 16;
        power = apply_motor_gain(power, config.motor_gain);
    }
    if config.deployment == Deployment::Tail {
        power = power.max(idle);
    }
    power
}

fn apply_motor_gain(power: u8, setting: u8) -> u8 {
    let gain = MOTOR_GAIN
        .get((setting as usize).wrapping_sub(1))
        .copied()
        .unwrap_or(64);
    (power as u16 * gain / 64).min(255) as u8
}

/// Startup power limit for the given restart attempt.
///
/// Every retry steps one entry further up the startup power table.
pub fn startup_power(config: &EscConfig, retry: u8) -> u8 {
    let base = STARTUP_POWER_TABLE
        .iter()
        .position(|&v| v >= config.startup_power)
        .unwrap_or(STARTUP_POWER_TABLE.len() - 1);
    let index = (base + retry as usize).min(STARTUP_POWER_TABLE.len() - 1);
    let power = PWM_START as u16 * STARTUP_POWER_TABLE[index] as u16 / 64;
    power.min(255) as u8
}

/// Requested power while in startup. Multi rotors get a small boost, then
/// everything is capped at the startup limit.
pub fn startup_requested(requested: u8, deployment: Deployment, pwm_limit: u8) -> u8 {
    let boosted = match deployment {
        Deployment::Multi => requested.saturating_add(MULTI_BOOST),
        Deployment::Main | Deployment::Tail => requested,
    };
    boosted.min(pwm_limit)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LowRpmLimit {
    pub ceiling: u8,
    pub demag_enabled: bool,
}

/// Power ceiling at low speed, where a stalled or desynced motor would
/// otherwise draw full current. Also decides whether demag protection runs.
///
/// `power` is the currently limited power and `floor` the spoolup start power.
pub fn low_rpm_limit(
    period4x: CommPeriod,
    power: u8,
    startup: bool,
    slope: u8,
    floor: u8,
) -> LowRpmLimit {
    if startup {
        return LowRpmLimit {
            ceiling: 255,
            demag_enabled: false,
        };
    }

    let demag_enabled = power >= ENABLE_POWER || period4x < 0x0A00;

    let high = period4x >> 8;
    let ceiling = if high == 0 {
        255
    } else {
        ((255 / high) * slope as u16).min(255) as u8
    };

    LowRpmLimit {
        ceiling: ceiling.max(floor),
        demag_enabled,
    }
}

/// Temperature ceiling [°C in, power out].
pub fn temperature_ceiling(celsius: i16) -> u8 {
    if celsius < TEMP_LIMIT_C {
        return 255;
    }
    let step = ((celsius - TEMP_LIMIT_C) / TEMP_STEP_C) as usize;
    TEMP_CEILINGS[step.min(TEMP_CEILINGS.len() - 1)]
}

/// Under-voltage limiter.
///
/// The cell count is estimated once, from the first non-zero voltage after
/// power-up. Below the cut-in voltage the ceiling steps down one per check,
/// otherwise it recovers one per check.
pub struct VoltageGuard {
    limit_per_cell_mv: Option<u16>,
    cells: Option<u8>,
    ceiling: u8,
}

impl VoltageGuard {
    pub fn new(limit_per_cell_mv: Option<u16>) -> Self {
        Self {
            limit_per_cell_mv,
            cells: None,
            ceiling: 255,
        }
    }

    /// Estimates the cell count. A zero reading means no sample yet and
    /// leaves the count unknown.
    pub fn measure_cells(&mut self, battery_mv: u16) -> Option<u8> {
        if battery_mv == 0 {
            return None;
        }
        let cells = (battery_mv as u32).div_ceil(CELL_MAX_MV as u32) as u8;
        info!("Battery {} mV, {} cells", battery_mv, cells);
        self.cells = Some(cells);
        self.cells
    }

    pub fn cells(&self) -> Option<u8> {
        self.cells
    }

    /// Cell count known, or no cut-in configured.
    pub fn ready(&self) -> bool {
        self.limit_per_cell_mv.is_none() || self.cells.is_some()
    }

    pub fn ceiling(&self) -> u8 {
        self.ceiling
    }

    pub fn check(&mut self, battery_mv: u16) -> u8 {
        let (Some(limit), Some(cells)) = (self.limit_per_cell_mv, self.cells) else {
            return self.ceiling;
        };
        if (battery_mv as u32) < cells as u32 * limit as u32 {
            if self.ceiling > VOLTAGE_CEILING_FLOOR {
                self.ceiling -= 1;
            }
        } else {
            self.ceiling = self.ceiling.saturating_add(1);
        }
        self.ceiling
    }
}

/// All ceilings applied to the current power.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PowerCeilings {
    pub pwm_limit: u8,
    pub spoolup: u8,
    pub low_rpm: u8,
    pub temperature: u8,
    pub voltage: u8,
}

impl PowerCeilings {
    pub const NONE: Self = Self {
        pwm_limit: 255,
        spoolup: 255,
        low_rpm: 255,
        temperature: 255,
        voltage: 255,
    };

    pub fn limit(&self) -> u8 {
        self.pwm_limit
            .min(self.spoolup)
            .min(self.low_rpm)
            .min(self.temperature)
            .min(self.voltage)
    }

    /// Power for the bridge.
    pub fn apply(&self, current: u8, demag_cut: bool) -> u8 {
        if demag_cut {
            0
        } else {
            current.min(self.limit())
        }
    }
}
