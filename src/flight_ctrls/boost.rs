//! Nonlinear boost on the error and D terms, and D-term feathering.
//!
//! The boost grows with the square of its input, so it adds authority as a tracking error
//! develops, but it's capped at a fixed fraction of the input, so it never dominates the
//! linear term.

use num_traits::Float; // abs on float.

use crate::util::pct;

// Maps the stored boost weight to a gain on `x * |x|`.
pub const BOOST_SCALE: f32 = 0.000_1;

/// One boost stage. Error boost (roll/pitch and yaw) and D boost each have their own instance,
/// with no shared state.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoostShaper {
    weight: f32,
    /// Fraction of the input the boost may add.
    limit: f32,
}

impl BoostShaper {
    /// `weight` and `limit_percent` as stored in the profile.
    pub fn new(weight: u16, limit_percent: u8) -> Self {
        Self {
            weight: weight as f32 * BOOST_SCALE,
            limit: pct(limit_percent),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.weight > 0. && self.limit > 0.
    }

    /// The boosted value: `x + clamp(weight * x * |x|, ±limit * |x|)`.
    pub fn apply(&self, x: f32) -> f32 {
        if !self.is_enabled() {
            return x;
        }
        let cap = self.limit * x.abs();
        let boost = (self.weight * x * x.abs()).clamp(-cap, cap);

        x + boost
    }
}

/// Blends D on measurement with D on error. Feathering at 100% ignores setpoint steps
/// entirely; at 0% D follows the full error derivative.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Feathering {
    ratio: f32,
}

impl Default for Feathering {
    fn default() -> Self {
        Self { ratio: 1. }
    }
}

impl Feathering {
    pub fn new(feathered_pids: u8) -> Self {
        Self {
            ratio: pct(feathered_pids).clamp(0., 1.),
        }
    }

    /// Both inputs are rates of change, per second. `measurement_delta` is the negated
    /// derivative of the measurement, so it has the same sign convention as the error.
    pub fn blend(&self, measurement_delta: f32, error_delta: f32) -> f32 {
        self.ratio * measurement_delta + (1. - self.ratio) * error_delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn boost_is_quadratic_below_cap() {
        let b = BoostShaper::new(15, 20);
        // 15e-4 * 50 = 7.5% of the input, under the 20% cap.
        assert_relative_eq!(b.apply(50.), 50. + 0.0015 * 50. * 50., max_relative = 1e-6);
        assert_relative_eq!(b.apply(-50.), -50. - 0.0015 * 50. * 50., max_relative = 1e-6);
    }

    #[test]
    fn boost_is_capped() {
        let b = BoostShaper::new(15, 20);
        for x in [200., 1_000., -400., -10_000.] {
            let out: f32 = b.apply(x);
            assert_relative_eq!(out, x * 1.2, max_relative = 1e-6);
        }
    }

    #[test]
    fn disabled_boost_is_identity() {
        for b in [BoostShaper::new(0, 50), BoostShaper::new(100, 0)] {
            assert_eq!(b.apply(123.4), 123.4);
        }
    }

    #[test]
    fn boost_never_flips_sign() {
        let b = BoostShaper::new(u16::MAX, 255);
        for i in -100..=100 {
            let x = i as f32 * 7.3;
            let out = b.apply(x);
            assert!(out * x >= 0.);
            assert!(out.abs() >= x.abs());
        }
    }

    #[test]
    fn feathering() {
        assert_relative_eq!(Feathering::new(100).blend(10., 1_000.), 10.);
        assert_relative_eq!(Feathering::new(0).blend(10., 1_000.), 1_000.);
        assert_relative_eq!(Feathering::new(25).blend(100., 500.), 25. + 375.);
    }
}
