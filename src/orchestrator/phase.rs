//! Six-step commutation table

use crate::hal::{Fet, Leg, PowerStage, PwmMode};
use crate::rc_decoder::Direction;

/// Commutation phase 1..=6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommutationPhase(u8);

/// Bridge state of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhaseDrive {
    /// Leg whose high side is on
    pub high: Leg,
    /// Leg whose low side carries the PWM
    pub pwm: Leg,
    /// Floating leg watched by the comparator
    pub sense: Leg,
    /// Comparator goes high at this phase's zero-cross
    pub rising: bool,
}

impl CommutationPhase {
    pub const FIRST: Self = Self(1);
    pub const LAST: Self = Self(6);

    pub fn number(self) -> u8 {
        self.0
    }

    pub fn next(self) -> Self {
        if self.0 >= 6 {
            Self(1)
        } else {
            Self(self.0 + 1)
        }
    }

    /// Bridge state for this phase. Reverse rotation swaps legs A and C.
    pub fn drive(self, direction: Direction) -> PhaseDrive {
        use Leg::{A, B, C};
        let (high, pwm, sense, rising) = match self.0 {
            1 => (B, C, A, true),
            2 => (A, C, B, false),
            3 => (A, B, C, true),
            4 => (C, B, A, false),
            5 => (C, A, B, true),
            _ => (B, A, C, false),
        };
        let map = |leg: Leg| match (direction, leg) {
            (Direction::Reverse, A) => C,
            (Direction::Reverse, C) => A,
            _ => leg,
        };
        PhaseDrive {
            high: map(high),
            pwm: map(pwm),
            sense: map(sense),
            rising,
        }
    }
}

impl PhaseDrive {
    /// Switches the bridge to this phase. High sides are turned off before
    /// the new one is turned on.
    pub fn apply<P: PowerStage>(&self, stage: &mut P, mode: PwmMode) {
        for leg in [Leg::A, Leg::B, Leg::C] {
            if leg != self.high {
                stage.switch(Fet::High(leg), false);
            }
            if leg != self.pwm {
                stage.switch(Fet::Low(leg), false);
            }
        }
        stage.set_pwm_leg(self.pwm, mode);
        stage.switch(Fet::High(self.high), true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycles_one_to_six() {
        let mut phase = CommutationPhase::FIRST;
        let mut seen = [0u8; 6];
        for i in 0..12 {
            seen[i % 6] = phase.number();
            phase = phase.next();
        }
        assert_eq!(seen, [1, 2, 3, 4, 5, 6]);
        assert_eq!(phase, CommutationPhase::FIRST);
        assert_eq!(CommutationPhase::LAST.next(), CommutationPhase::FIRST);
    }

    #[test]
    fn test_each_phase_uses_three_legs() {
        let mut phase = CommutationPhase::FIRST;
        for _ in 0..6 {
            for direction in [Direction::Forward, Direction::Reverse] {
                let d = phase.drive(direction);
                assert_ne!(d.high, d.pwm);
                assert_ne!(d.high, d.sense);
                assert_ne!(d.pwm, d.sense);
            }
            phase = phase.next();
        }
    }

    #[test]
    fn test_sense_alternates() {
        let mut phase = CommutationPhase::FIRST;
        let mut rising = Vec::new();
        let mut sense = Vec::new();
        for _ in 0..6 {
            let d = phase.drive(Direction::Forward);
            rising.push(d.rising);
            sense.push(d.sense);
            phase = phase.next();
        }
        assert_eq!(rising, [true, false, true, false, true, false]);
        assert_eq!(sense, [Leg::A, Leg::B, Leg::C, Leg::A, Leg::B, Leg::C]);
    }

    #[test]
    fn test_reverse_swaps_a_and_c() {
        let d = CommutationPhase::FIRST.drive(Direction::Reverse);
        assert_eq!((d.high, d.pwm, d.sense), (Leg::B, Leg::A, Leg::C));
    }
}
