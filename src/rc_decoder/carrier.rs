//! RC carrier classification

use crate::config::rc;

/// Fixed-frequency PWM carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PwmFrequency {
    Khz12,
    Khz8,
    Khz4,
    Khz2,
    Khz1,
}

impl PwmFrequency {
    /// Scales a pulse width in ticks to a 0..=255 command.
    ///
    /// Each carrier's full period lands at about 250 after scaling.
    pub fn scale(self, width: u32) -> u8 {
        let value = match self {
            Self::Khz12 => width.min(170) * 3 / 2,
            Self::Khz8 => width,
            Self::Khz4 => width / 2,
            Self::Khz2 => width / 4,
            Self::Khz1 => width / 8,
        };
        value.min(255) as u8
    }
}

/// Class of a measured edge-to-edge period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Carrier {
    Pwm(PwmFrequency),
    Ppm,
}

impl Carrier {
    /// Classifies the elapsed ticks between two rising edges, highest
    /// frequency first. Returns `None` for noise.
    pub fn classify(elapsed: u32) -> Option<Self> {
        let carrier = if elapsed < rc::NOISE_LIMIT {
            return None;
        } else if elapsed < rc::PWM_12KHZ_LIMIT {
            Self::Pwm(PwmFrequency::Khz12)
        } else if elapsed < rc::PWM_8KHZ_LIMIT {
            Self::Pwm(PwmFrequency::Khz8)
        } else if elapsed < rc::PWM_4KHZ_LIMIT {
            Self::Pwm(PwmFrequency::Khz4)
        } else if elapsed < rc::PWM_2KHZ_LIMIT {
            Self::Pwm(PwmFrequency::Khz2)
        } else if elapsed < rc::PWM_1KHZ_LIMIT {
            Self::Pwm(PwmFrequency::Khz1)
        } else {
            Self::Ppm
        };
        Some(carrier)
    }

    /// Largest period change still counted as the same carrier.
    pub fn tolerance(self) -> u32 {
        match self {
            Self::Pwm(PwmFrequency::Khz12) => 10,
            Self::Pwm(PwmFrequency::Khz8) => 15,
            Self::Pwm(PwmFrequency::Khz4) => 30,
            Self::Pwm(PwmFrequency::Khz2) => 60,
            Self::Pwm(PwmFrequency::Khz1) => 120,
            Self::Ppm => 512,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_rejected() {
        assert_eq!(Carrier::classify(0), None);
        assert_eq!(Carrier::classify(139), None);
        assert_eq!(Carrier::classify(140), Some(Carrier::Pwm(PwmFrequency::Khz12)));
    }

    #[test]
    fn test_bucket_boundaries() {
        let cases = [
            (199, Carrier::Pwm(PwmFrequency::Khz12)),
            (200, Carrier::Pwm(PwmFrequency::Khz8)),
            (359, Carrier::Pwm(PwmFrequency::Khz8)),
            (360, Carrier::Pwm(PwmFrequency::Khz4)),
            (719, Carrier::Pwm(PwmFrequency::Khz4)),
            (720, Carrier::Pwm(PwmFrequency::Khz2)),
            (1439, Carrier::Pwm(PwmFrequency::Khz2)),
            (1440, Carrier::Pwm(PwmFrequency::Khz1)),
            (2199, Carrier::Pwm(PwmFrequency::Khz1)),
            (2200, Carrier::Ppm),
        ];
        for (elapsed, expected) in cases {
            assert_eq!(Carrier::classify(elapsed), Some(expected), "elapsed={}", elapsed);
        }
    }

    #[test]
    fn test_classification_monotonic() {
        let rank = |c: Carrier| match c {
            Carrier::Pwm(PwmFrequency::Khz12) => 0,
            Carrier::Pwm(PwmFrequency::Khz8) => 1,
            Carrier::Pwm(PwmFrequency::Khz4) => 2,
            Carrier::Pwm(PwmFrequency::Khz2) => 3,
            Carrier::Pwm(PwmFrequency::Khz1) => 4,
            Carrier::Ppm => 5,
        };
        let mut last = 0;
        for elapsed in 140..5000 {
            let r = rank(Carrier::classify(elapsed).unwrap());
            assert!(r == last || r == last + 1);
            last = r;
        }
        assert_eq!(last, 5);
    }

    #[test]
    fn test_pwm_scaling_full_period() {
        assert_eq!(PwmFrequency::Khz12.scale(166), 249);
        assert_eq!(PwmFrequency::Khz12.scale(400), 255);
        assert_eq!(PwmFrequency::Khz8.scale(250), 250);
        assert_eq!(PwmFrequency::Khz4.scale(500), 250);
        assert_eq!(PwmFrequency::Khz2.scale(1000), 250);
        assert_eq!(PwmFrequency::Khz1.scale(2000), 250);
        assert_eq!(PwmFrequency::Khz1.scale(4000), 255);
    }
}
