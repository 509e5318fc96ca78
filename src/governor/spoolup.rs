//! Main rotor spoolup ceiling and auto-bailout
//!
//! Runs once per housekeeping tick. The ceiling rises slowly at first, then
//! faster, and is pulled back down to the consumed power whenever the power
//! catches up with it, so a sudden load drop cannot overshoot. Once the
//! ceiling reaches full power the bailout is armed: a later spoolup (after
//! an autorotation) starts at the fast ramp.

use crate::config::governor::{SPOOLRATE, SPOOLUP_RESET_REQ, TARGET_OVERRIDE_MIN};
use crate::config::{Deployment, EscConfig, GovernorMode, RCP_STOP};

#[derive(Debug, Clone, Copy)]
pub struct SpoolupInput {
    pub command: u8,
    pub requested: u8,
    /// Power currently applied before ceilings
    pub current: u8,
    pub governor_active: bool,
}

pub struct Spoolup {
    /// Only main rotors ramp; the others keep the ceiling at full power
    enabled: bool,
    mode: GovernorMode,
    setup_target: u8,
    arm_target: u8,
    time_3x: u8,
    time_10x: u8,
    time_15x: u8,
    limit: u8,
    start_power: u8,
    count: u8,
    skip: u8,
    bailout_armed: bool,
    governor_requested: u8,
    stop_count: u8,
}

impl Spoolup {
    pub fn new(config: &EscConfig) -> Self {
        let t = config.spoolup_time;
        Self {
            enabled: config.deployment == Deployment::Main,
            mode: config.governor_mode,
            setup_target: config.gov_setup_target,
            arm_target: 0,
            time_3x: t.saturating_mul(3),
            time_10x: t.saturating_mul(10),
            time_15x: t.saturating_mul(15),
            limit: 255,
            start_power: 0,
            count: 0,
            skip: 1,
            bailout_armed: false,
            governor_requested: 0,
            stop_count: 0,
        }
    }

    /// Spoolup power ceiling.
    pub fn limit(&self) -> u8 {
        if self.enabled {
            self.limit
        } else {
            255
        }
    }

    pub fn governor_requested(&self) -> u8 {
        self.governor_requested
    }

    /// Housekeeping ticks the command has been below stop.
    pub fn stop_count(&self) -> u8 {
        self.stop_count
    }

    pub fn bailout_armed(&self) -> bool {
        self.bailout_armed
    }

    pub fn start_power(&self) -> u8 {
        self.start_power
    }

    /// Highest command seen while arming.
    pub fn set_arm_target(&mut self, target: u8) {
        self.arm_target = target;
    }

    /// Records the startup power; the ceiling starts from it.
    pub fn set_start_power(&mut self, power: u8) {
        self.start_power = power;
    }

    /// Restarts the ramp from the startup power. A bailout ramp starts at the
    /// fast end of the sequence.
    pub fn rearm(&mut self) {
        self.limit = self.start_power;
        self.count = if self.bailout_armed { 255 } else { 0 };
        self.skip = 1;
    }

    /// Restarts the ramp at its fast end when the governor drops out.
    pub fn on_governor_deactivated(&mut self) {
        self.limit = self.start_power;
        self.count = 255;
        self.skip = 1;
    }

    /// Clears the stop counter (new power-on).
    pub fn reset_stop_count(&mut self) {
        self.stop_count = 0;
    }

    pub fn tick(&mut self, input: &SpoolupInput) {
        if input.command < RCP_STOP {
            self.bailout_armed = false;
            self.count = 0;
            self.stop_count = self.stop_count.saturating_add(1);
        } else {
            self.stop_count = 0;
        }

        if !self.enabled {
            self.governor_requested = input.requested;
            return;
        }

        let mut requested = input.requested;
        if input.governor_active && requested >= TARGET_OVERRIDE_MIN {
            match self.mode {
                GovernorMode::ArmTarget => requested = self.arm_target,
                GovernorMode::SetupTarget => requested = self.setup_target,
                _ => {}
            }
        }
        for _ in 0..SPOOLRATE {
            if self.governor_requested < requested {
                self.governor_requested += 1;
            } else if self.governor_requested > requested {
                self.governor_requested -= 1;
            }
        }

        self.count = self.count.saturating_add(1);
        self.skip = self.skip.saturating_sub(1);
        if self.skip > 0 {
            return;
        }
        self.skip = 1;

        if self.count < self.time_3x {
            return;
        }
        let step = if self.count < self.time_10x {
            self.skip = 3;
            1
        } else if self.count < self.time_15x {
            1
        } else {
            5
        };

        if input.current <= self.limit && !input.governor_active {
            if self.mode != GovernorMode::Off {
                // Power caught up with the ceiling: hold the ceiling there
                self.limit = input.current;
                if self.count != 255 {
                    self.count = self.time_3x;
                }
                self.skip = 1;
                self.governor_requested = SPOOLUP_RESET_REQ;
                return;
            }
        } else {
            self.limit = self.limit.saturating_add(step);
        }

        if self.limit == 255 && !self.bailout_armed {
            debug!("Spoolup complete, bailout armed");
            self.bailout_armed = true;
            self.count = 255;
        }
    }
}
