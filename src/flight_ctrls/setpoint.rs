//! Setpoint shaping ahead of the error calculation: acceleration limit, SPA, and axis lock.

use num_traits::Float; // abs on float.

use crate::{
    filters::{pt1_gain, Pt1Filter},
    profile::PidProfile,
    util::pct,
    Axis, AXIS_COUNT,
};

/// Stored accel limits are in units of 100 deg/s².
pub const ACCEL_LIMIT_SCALE: f32 = 100.;

/// Commanded rate (deg/s) on the other axes above which axis lock starts to engage, and own-axis
/// rate at which it's fully released.
pub const AXIS_LOCK_RATE_THRESHOLD: f32 = 100.;

/// Which term an SPA curve applies to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SpaTerm {
    P = 0,
    I = 1,
    D = 2,
}

#[derive(Clone, Debug)]
pub struct SetpointConditioner {
    /// Max setpoint change per tick, deg/s. 0 disables the limit.
    max_velocity: [f32; AXIS_COUNT],
    /// Accel limiter memory
    limited: [f32; AXIS_COUNT],
    /// Last tick's final setpoint, after level and crash handling.
    previous: [f32; AXIS_COUNT],
    /// [term][axis], as a fraction. 1 is neutral.
    spa: [[f32; AXIS_COUNT]; 3],
    axis_lock_lpf: [Pt1Filter; AXIS_COUNT],
    axis_lock_multiplier: f32,
}

impl SetpointConditioner {
    pub fn new(profile: &PidProfile, dt: f32) -> Self {
        let mut result = Self {
            max_velocity: [0.; AXIS_COUNT],
            limited: [0.; AXIS_COUNT],
            previous: [0.; AXIS_COUNT],
            spa: [[1.; AXIS_COUNT]; 3],
            axis_lock_lpf: [Pt1Filter::default(); AXIS_COUNT],
            axis_lock_multiplier: 0.,
        };
        result.init_filters(profile, dt);
        result.configure(profile, dt);
        result
    }

    pub fn init_filters(&mut self, profile: &PidProfile, dt: f32) {
        let k = pt1_gain(profile.axis_lock_hz as f32, dt);
        self.axis_lock_lpf = [Pt1Filter::new(k); AXIS_COUNT];
    }

    pub fn configure(&mut self, profile: &PidProfile, dt: f32) {
        let rp = profile.rate_accel_limit as f32 * ACCEL_LIMIT_SCALE * dt;
        let yaw = profile.yaw_rate_accel_limit as f32 * ACCEL_LIMIT_SCALE * dt;
        self.max_velocity = [rp, rp, yaw];

        for (term, transition) in [
            profile.setpoint_p_transition,
            profile.setpoint_i_transition,
            profile.setpoint_d_transition,
        ]
        .iter()
        .enumerate()
        {
            for axis in 0..AXIS_COUNT {
                self.spa[term][axis] = pct(transition[axis]);
            }
        }

        // Stored in tenths.
        self.axis_lock_multiplier = profile.axis_lock_multiplier as f32 / 10.;
    }

    /// Limit how far the setpoint can move in one tick.
    pub fn accel_limit(&mut self, axis: Axis, setpoint: f32) -> f32 {
        let i = axis.index();
        let max = self.max_velocity[i];

        let result = if max > 0. {
            let velocity = setpoint - self.limited[i];
            if velocity.abs() > max {
                if velocity > 0. {
                    self.limited[i] + max
                } else {
                    self.limited[i] - max
                }
            } else {
                setpoint
            }
        } else {
            setpoint
        };

        self.limited[i] = result;
        result
    }

    /// Gain multiplier for a term, blended by stick deflection: neutral at center stick,
    /// the configured transition at full stick.
    pub fn spa_factor(&self, term: SpaTerm, axis: Axis, rc_deflection: f32) -> f32 {
        let transition = self.spa[term as usize][axis.index()];
        1. + rc_deflection.abs().min(1.) * (transition - 1.)
    }

    /// Per-axis stiffening gains. An axis is stiffened while the other axes are commanded
    /// fast and its own command is small, to hold it against cross-coupled disturbances.
    /// Advances the axis lock filters; call once per tick.
    pub fn axis_lock(&mut self, setpoints: [f32; AXIS_COUNT]) -> [f32; AXIS_COUNT] {
        let mut result = [1.; AXIS_COUNT];

        for i in 0..AXIS_COUNT {
            let other = setpoints[(i + 1) % AXIS_COUNT]
                .abs()
                .max(setpoints[(i + 2) % AXIS_COUNT].abs());
            let activity = self.axis_lock_lpf[i].apply(other);

            if self.axis_lock_multiplier <= 0. {
                continue;
            }

            let engage =
                ((activity - AXIS_LOCK_RATE_THRESHOLD) / AXIS_LOCK_RATE_THRESHOLD).clamp(0., 1.);
            let release = (1. - setpoints[i].abs() / AXIS_LOCK_RATE_THRESHOLD).clamp(0., 1.);

            result[i] = 1. + engage * release * self.axis_lock_multiplier;
        }

        result
    }

    /// Store this tick's final setpoint for an axis.
    pub fn record(&mut self, axis: Axis, setpoint: f32) {
        self.previous[axis.index()] = setpoint;
    }

    /// The final setpoint from the previous tick. Used by the mixer's feed-forward path.
    pub fn previous_setpoint(&self, axis: Axis) -> f32 {
        self.previous[axis.index()]
    }

    pub fn reset(&mut self) {
        self.limited = [0.; AXIS_COUNT];
        self.previous = [0.; AXIS_COUNT];
    }
}
