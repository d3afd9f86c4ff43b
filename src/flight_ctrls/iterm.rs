//! Integral term accumulation: anti-windup, relax, rotation, decay and the hard limit.

use core::f32::consts::PI;

use num_traits::Float; // sin, cos, abs on float.

use crate::{
    filters::{pt1_gain, Pt1Filter},
    profile::PidProfile,
    util::{constrain_abs, pct},
    Axis, AXIS_COUNT,
};

const DEG_TO_RAD: f32 = PI / 180.;

/// Per-axis integrators, and the shaping applied to what goes into them.
#[derive(Clone, Debug)]
pub struct ItermEngine {
    accum: [f32; AXIS_COUNT],
    limit: f32,
    /// `1 / (1 - windup point)`. `None` when anti-windup is off.
    windup_point_inv: Option<f32>,
    relax_lpf: [Pt1Filter; AXIS_COUNT],
    /// deg/s. 0 disables relax on that axis.
    relax_threshold: [f32; AXIS_COUNT],
    decay: f32,
    decay_cutoff: f32,
    rotation: bool,
}

impl ItermEngine {
    pub fn new(profile: &PidProfile, dt: f32) -> Self {
        let mut result = Self {
            accum: [0.; AXIS_COUNT],
            limit: 0.,
            windup_point_inv: None,
            relax_lpf: [Pt1Filter::default(); AXIS_COUNT],
            relax_threshold: [0.; AXIS_COUNT],
            decay: 1.,
            decay_cutoff: 0.,
            rotation: false,
        };
        result.init_filters(profile, dt);
        result.configure(profile);
        result
    }

    /// Rebuild the relax filters. Resets their history.
    pub fn init_filters(&mut self, profile: &PidProfile, dt: f32) {
        for axis in Axis::ALL {
            let (cutoff, threshold) = match axis {
                Axis::Yaw => (
                    profile.iterm_relax_cutoff_yaw,
                    profile.iterm_relax_threshold_yaw,
                ),
                _ => (profile.iterm_relax_cutoff, profile.iterm_relax_threshold),
            };

            self.relax_lpf[axis.index()] = Pt1Filter::new(pt1_gain(cutoff as f32, dt));
            // A relax filter with no cutoff never settles, so it disables relax too.
            self.relax_threshold[axis.index()] = if cutoff == 0 { 0. } else { threshold as f32 };
        }
    }

    /// Update cached scalars from the profile. Accumulators are kept.
    pub fn configure(&mut self, profile: &PidProfile) {
        self.limit = profile.iterm_limit as f32;

        let windup_point = pct(profile.iterm_windup_point_percent);
        self.windup_point_inv = if windup_point < 1. {
            Some(1. / (1. - windup_point))
        } else {
            None
        };

        self.decay = profile.i_decay as f32;
        self.decay_cutoff = profile.i_decay_cutoff as f32;
        self.rotation = profile.iterm_rotation;

        for v in &mut self.accum {
            *v = constrain_abs(*v, self.limit);
        }
    }

    /// The integration step for this tick, in seconds: `dt`, reduced towards 0 as the mixer's
    /// predicted saturation (`motor_mix_range`) goes from the windup point to 1.
    pub fn dyn_ci(&self, dt: f32, motor_mix_range: f32) -> f32 {
        match self.windup_point_inv {
            Some(inv) => dt * ((1. - motor_mix_range) * inv).clamp(0., 1.),
            None => dt,
        }
    }

    /// Suppress the error fed to the integrator while the setpoint is moving quickly.
    /// The setpoint filter is advanced every call, whether or not relax is enabled.
    pub fn relax(&mut self, axis: Axis, setpoint: f32, error: f32) -> f32 {
        let i = axis.index();
        let lpf = self.relax_lpf[i].apply(setpoint);
        let threshold = self.relax_threshold[i];

        if threshold <= 0. {
            return error;
        }

        let hpf = (setpoint - lpf).abs();
        error * (1. - hpf / threshold).max(0.)
    }

    /// Rotate the accumulators by this tick's body rates, so integrated error stays fixed
    /// relative to the world while the craft rotates. `gyro` is in deg/s.
    pub fn rotate(&mut self, gyro: [f32; AXIS_COUNT], dt: f32) {
        if !self.rotation {
            return;
        }
        rotate_vector(&mut self.accum, gyro, dt * DEG_TO_RAD);

        for v in &mut self.accum {
            *v = constrain_abs(*v, self.limit);
        }
    }

    /// Add `ki * dyn_ci * error` to an axis, applying decay and the limit. Returns the new value.
    pub fn accumulate(&mut self, axis: Axis, ki: f32, dyn_ci: f32, error: f32) -> f32 {
        let i = axis.index();
        let current = self.accum[i];
        let mut delta = ki * dyn_ci * error;

        // An increment pulling the accumulator back towards 0 is amplified, more so the
        // larger the accumulator, but never past 0.
        if self.decay > 1. && delta * current < 0. && delta.abs() < current.abs() {
            let strength = if self.decay_cutoff > 0. {
                (current.abs() / self.decay_cutoff).clamp(0., 1.)
            } else {
                1.
            };
            let boosted = delta * (1. + (self.decay - 1.) * strength);

            delta = if boosted.abs() > current.abs() {
                -current
            } else {
                boosted
            };
        }

        self.accum[i] = constrain_abs(current + delta, self.limit);
        self.accum[i]
    }

    pub fn value(&self, axis: Axis) -> f32 {
        self.accum[axis.index()]
    }

    pub fn values(&self) -> [f32; AXIS_COUNT] {
        self.accum
    }

    pub fn set(&mut self, axis: Axis, val: f32) {
        self.accum[axis.index()] = constrain_abs(val, self.limit);
    }

    pub fn limit(&self) -> f32 {
        self.limit
    }

    pub fn reset(&mut self) {
        self.accum = [0.; AXIS_COUNT];
    }

    pub fn reset_axis(&mut self, axis: Axis) {
        self.accum[axis.index()] = 0.;
    }
}

/// Rotate `v` about each body axis in turn, by `rates * scale` radians. For a rotation about yaw
/// alone, this gives `roll' = roll cos θ + pitch sin θ`, `pitch' = pitch cos θ - roll sin θ`.
fn rotate_vector(v: &mut [f32; AXIS_COUNT], rates: [f32; AXIS_COUNT], scale: f32) {
    for i in 0..AXIS_COUNT {
        let angle = rates[i] * scale;
        if angle == 0. {
            continue;
        }
        let (sin, cos) = angle.sin_cos();
        let i_1 = (i + 1) % AXIS_COUNT;
        let i_2 = (i + 2) % AXIS_COUNT;

        let a = v[i_1];
        let b = v[i_2];
        v[i_1] = a * cos + b * sin;
        v[i_2] = b * cos - a * sin;
    }
}
