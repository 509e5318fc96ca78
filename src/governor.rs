//! Speed governor
//!
//! Closed loop that holds the rotor speed instead of an open-loop power
//! level. The work is split into five sub-steps, one per commutation phase,
//! so no single phase carries the whole computation:
//!
//! 1. [`Governor::calc_target`]
//! 2. [`Governor::calc_proportional_error`]
//! 3. [`Governor::calc_integral_error`]
//! 4. [`Governor::calc_proportional_correction`]
//! 5. [`Governor::calc_integral_correction`]
//!
//! Main rotors run the speed-target variant (target is a commutation period
//! derived from the requested power). Multi rotors run the proportional
//! variant (target is the power equivalent of the measured speed).

pub mod spoolup;

pub use spoolup::{Spoolup, SpoolupInput};

use crate::config::governor::{
    ACTIVATION_HIGH, ACTIVATION_LOW, ACTIVATION_MIDDLE, CLAMP, MULTI_RECIPROCAL,
};
use crate::config::{Deployment, EscConfig, GovernorMode, GovernorRange, RCP_MAX, RCP_STOP};
use crate::period::CommPeriod;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GovernorState {
    /// Target commutation period (speed-target) or target power (proportional)
    pub target: u16,
    /// Integral correction
    pub integral_error: i16,
    /// Accumulated proportional error, clamped to ±127
    pub integral_error_ext: i16,
    pub proportional_error: i16,
    pub proportional_correction: i16,
    pub active: bool,
    pub mode: GovernorMode,
}

impl GovernorState {
    const fn idle(mode: GovernorMode) -> Self {
        Self {
            target: 0,
            integral_error: 0,
            integral_error_ext: 0,
            proportional_error: 0,
            proportional_correction: 0,
            active: false,
            mode,
        }
    }
}

/// Outcome of the target sub-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Activation {
    Active,
    Inactive,
    /// Was active until this call. The caller re-arms the spoolup ceiling.
    JustDeactivated,
}

/// Inputs of the target sub-step.
#[derive(Debug, Clone, Copy)]
pub struct GovernorInput {
    pub period4x: CommPeriod,
    /// Decoded command
    pub command: u8,
    /// Requested power before the governor
    pub requested: u8,
    /// Governor requested power (slewed)
    pub governor_requested: u8,
    /// Startup or initial run phase
    pub startup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    SpeedTarget(GovernorRange),
    Proportional,
}

pub struct Governor {
    state: GovernorState,
    variant: Variant,
    p_gain: u8,
    i_gain: u8,
}

impl Governor {
    pub fn new(config: &EscConfig) -> Self {
        let variant = match config.deployment {
            Deployment::Multi => Variant::Proportional,
            Deployment::Main | Deployment::Tail => Variant::SpeedTarget(config.governor_range),
        };
        Self {
            state: GovernorState::idle(config.governor_mode),
            variant,
            p_gain: config.gov_p_gain,
            i_gain: config.gov_i_gain,
        }
    }

    pub fn state(&self) -> &GovernorState {
        &self.state
    }

    pub fn active(&self) -> bool {
        self.state.active
    }

    /// Drops out of closed loop. Both integral terms are cleared.
    ///
    /// Returns `true` if the governor was active.
    pub fn deactivate(&mut self) -> bool {
        let was_active = self.state.active;
        self.state = GovernorState::idle(self.state.mode);
        was_active
    }

    /// Sub-step 1: activation and target.
    pub fn calc_target(&mut self, input: &GovernorInput) -> Activation {
        match self.variant {
            Variant::SpeedTarget(range) => self.calc_speed_target(range, input),
            Variant::Proportional => self.calc_power_target(input),
        }
    }

    fn calc_speed_target(&mut self, range: GovernorRange, input: &GovernorInput) -> Activation {
        let limit = match range {
            GovernorRange::High => ACTIVATION_HIGH,
            GovernorRange::Middle => ACTIVATION_MIDDLE,
            GovernorRange::Low => ACTIVATION_LOW,
        };
        let enabled = self.state.mode != GovernorMode::Off
            && !input.startup
            && input.requested >= RCP_MAX / 10;
        let activate = enabled && (self.state.active || input.period4x < limit);

        if !activate {
            return self.deactivate_with_outcome();
        }
        if !self.state.active {
            debug!("Governor active, period4x {}", input.period4x);
        }
        self.state.active = true;

        // Period target in 1/256 units: (1 + 2x), (1 + 4x) or (2 + 8x) with
        // x = (255 - power) / 256, high and low shifted down by 0.25.
        let inverted = (255 - input.governor_requested) as u16;
        self.state.target = match range {
            GovernorRange::High => 256 + 2 * inverted - 64,
            GovernorRange::Middle => 256 + 4 * inverted,
            GovernorRange::Low => 512 + 8 * inverted - 64,
        };
        Activation::Active
    }

    fn calc_power_target(&mut self, input: &GovernorInput) -> Activation {
        if self.state.mode == GovernorMode::Off || input.command < RCP_STOP || input.startup {
            return self.deactivate_with_outcome();
        }
        self.state.active = true;
        let target = MULTI_RECIPROCAL / input.period4x.max(1) as u32;
        self.state.target = target.min(255) as u16;
        Activation::Active
    }

    fn deactivate_with_outcome(&mut self) -> Activation {
        if self.deactivate() {
            debug!("Governor deactivated");
            Activation::JustDeactivated
        } else {
            Activation::Inactive
        }
    }

    /// Sub-step 2: proportional error.
    pub fn calc_proportional_error(&mut self, period4x: CommPeriod, governor_requested: u8) {
        if !self.state.active {
            return;
        }
        let error = match self.variant {
            Variant::SpeedTarget(_) => (period4x / 2) as i32 - self.state.target as i32,
            Variant::Proportional => governor_requested as i32 - self.state.target as i32,
        };
        self.state.proportional_error = error.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    }

    /// Sub-step 3: integral error.
    pub fn calc_integral_error(&mut self) {
        if !self.state.active {
            return;
        }
        let sum = self.state.integral_error_ext as i32 + self.state.proportional_error as i32;
        self.state.integral_error_ext = clamp_correction(sum);
    }

    /// Sub-step 4: proportional correction.
    pub fn calc_proportional_correction(&mut self) {
        if !self.state.active {
            return;
        }
        let correction = self.p_gain as i32 * self.state.proportional_error as i32 / 16;
        self.state.proportional_correction = clamp_correction(correction);
    }

    /// Sub-step 5: integral correction.
    pub fn calc_integral_correction(&mut self) {
        if !self.state.active {
            return;
        }
        let correction = self.i_gain as i32 * self.state.integral_error_ext as i32 / 16;
        self.state.integral_error = clamp_correction(correction);
    }

    /// Corrected power: `base + proportional + integral`, clamped to 0..=255.
    pub fn output(&self, base: u8) -> u8 {
        let power = base as i32
            + self.state.proportional_correction as i32
            + self.state.integral_error as i32;
        power.clamp(0, 255) as u8
    }
}

fn clamp_correction(value: i32) -> i16 {
    value.clamp(-(CLAMP as i32), CLAMP as i32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_governor(range: GovernorRange) -> Governor {
        let mut config = EscConfig::defaults(Deployment::Main);
        config.governor_range = range;
        Governor::new(&config)
    }

    fn input(period4x: CommPeriod, requested: u8) -> GovernorInput {
        GovernorInput {
            period4x,
            command: requested,
            requested,
            governor_requested: requested,
            startup: false,
        }
    }

    fn full_cycle(governor: &mut Governor, input: &GovernorInput) -> Activation {
        let activation = governor.calc_target(input);
        governor.calc_proportional_error(input.period4x, input.governor_requested);
        governor.calc_integral_error();
        governor.calc_proportional_correction();
        governor.calc_integral_correction();
        activation
    }

    #[test]
    fn test_speed_targets() {
        let mut governor = main_governor(GovernorRange::High);
        governor.calc_target(&input(0x0400, 200));
        assert_eq!(governor.state().target, 256 + 2 * 55 - 64);

        let mut governor = main_governor(GovernorRange::Middle);
        governor.calc_target(&input(0x0400, 200));
        assert_eq!(governor.state().target, 256 + 4 * 55);

        let mut governor = main_governor(GovernorRange::Low);
        governor.calc_target(&input(0x0400, 200));
        assert_eq!(governor.state().target, 512 + 8 * 55 - 64);
    }

    #[test]
    fn test_activation_hysteresis() {
        let mut governor = main_governor(GovernorRange::High);
        assert_eq!(governor.calc_target(&input(0x0600, 200)), Activation::Inactive);
        assert_eq!(governor.calc_target(&input(0x0400, 200)), Activation::Active);
        // Already active: stays active below the activation speed
        assert_eq!(governor.calc_target(&input(0x0600, 200)), Activation::Active);
        // Throttle below 10%
        assert_eq!(governor.calc_target(&input(0x0400, 20)), Activation::JustDeactivated);
        assert_eq!(governor.calc_target(&input(0x0400, 20)), Activation::Inactive);
    }

    #[test]
    fn test_startup_blocks_activation() {
        let mut governor = main_governor(GovernorRange::Low);
        let mut i = input(0x0400, 200);
        i.startup = true;
        assert_eq!(governor.calc_target(&i), Activation::Inactive);
        assert!(!governor.active());
    }

    #[test]
    fn test_mode_off_never_activates() {
        let mut config = EscConfig::defaults(Deployment::Main);
        config.governor_mode = GovernorMode::Off;
        let mut governor = Governor::new(&config);
        assert_eq!(governor.calc_target(&input(0x0100, 255)), Activation::Inactive);
    }

    #[test]
    fn test_too_slow_adds_power() {
        let mut governor = main_governor(GovernorRange::High);
        let i = input(0x0400, 200);
        full_cycle(&mut governor, &i);
        // period4x / 2 = 512 > target 302: too slow
        assert!(governor.state().proportional_error > 0);
        assert!(governor.output(200) > 200);
        assert_eq!(governor.state().integral_error_ext, 127);
        assert_eq!(governor.state().proportional_correction, 127);
    }

    #[test]
    fn test_integrals_reset_on_deactivation() {
        for seed in [-500i32, -3, 1, 90, 4000] {
            let mut governor = main_governor(GovernorRange::Middle);
            let target_period = (256 + 4 * 55) * 2;
            let period = (target_period + seed).clamp(0x100, 0x09FF) as u16;
            let i = input(period, 200);
            for _ in 0..20 {
                full_cycle(&mut governor, &i);
            }
            assert!(governor.active());

            assert_eq!(
                governor.calc_target(&input(period, 0)),
                Activation::JustDeactivated
            );
            let state = governor.state();
            assert_eq!(state.integral_error, 0);
            assert_eq!(state.integral_error_ext, 0);
            assert_eq!(governor.output(150), 150);
        }
    }

    #[test]
    fn test_output_clamped() {
        let mut governor = main_governor(GovernorRange::High);
        let i = input(0x0400, 250);
        for _ in 0..10 {
            full_cycle(&mut governor, &i);
        }
        assert_eq!(governor.output(250), 255);

        let i = input(0x0010, 250);
        for _ in 0..10 {
            full_cycle(&mut governor, &i);
        }
        assert_eq!(governor.output(10), 0);
    }

    #[test]
    fn test_proportional_variant() {
        let mut config = EscConfig::defaults(Deployment::Multi);
        config.governor_mode = GovernorMode::Proportional;
        let mut governor = Governor::new(&config);

        // Speed equivalent to the requested power: no error
        let requested = 120u8;
        let period = (51_000 / requested as u16) * 2;
        let i = input(period, requested);
        assert_eq!(full_cycle(&mut governor, &i), Activation::Active);
        assert_eq!(governor.state().target, 120);
        assert_eq!(governor.state().proportional_error, 0);
        assert_eq!(governor.output(requested), requested);

        // Slower than requested: more power
        let i = input(period * 2, requested);
        full_cycle(&mut governor, &i);
        assert!(governor.output(requested) > requested);

        // Stop command deactivates
        let mut stop = input(period, 0);
        stop.command = 0;
        assert_eq!(governor.calc_target(&stop), Activation::JustDeactivated);
        assert_eq!(governor.state().integral_error_ext, 0);
    }
}
