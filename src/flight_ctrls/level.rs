//! Self-level channels: angle mode, horizon mode and heading hold. These turn an attitude
//! error into a rate setpoint for the roll and pitch (or yaw) rate loops.

use num_traits::Float; // abs on float.

use crate::{
    filters::{pt1_gain, Pt1Filter},
    profile::{PidProfile, Pidf},
    util::{constrain_abs, pct},
    Axis, PidIndex,
};

// Gain scaling from the stored u8 values. Level P of 100 commands 10 deg/s per degree of error.
const LEVEL_P_SCALE: f32 = 0.1;
const LEVEL_I_SCALE: f32 = 0.01;
const LEVEL_D_SCALE: f32 = 0.001;
const LEVEL_F_SCALE: f32 = 0.001;

const MAG_HOLD_SCALE: f32 = 1. / 30.;

/// Max rate setpoint the level channels can command, deg/s.
pub const SETPOINT_RATE_LIMIT: f32 = 1_998.;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum LevelMode {
    /// Acro. The rate setpoint passes through.
    #[default]
    Rate,
    Angle,
    /// Rate control with a leveling tendency that fades out with stick deflection.
    Horizon,
}

#[derive(Clone, Copy, Debug, Default)]
struct LevelGains {
    p: f32,
    i: f32,
    d: f32,
    f: f32,
}

impl From<Pidf> for LevelGains {
    fn from(g: Pidf) -> Self {
        Self {
            p: g.p as f32 * LEVEL_P_SCALE,
            i: g.i as f32 * LEVEL_I_SCALE,
            d: g.d as f32 * LEVEL_D_SCALE,
            f: g.f as f32 * LEVEL_F_SCALE,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LevelOutput {
    /// Rate setpoint, deg/s
    pub setpoint: f32,
    /// Feed-forward contribution for the axis output.
    pub feedforward: f32,
}

/// Leveling state for roll and pitch.
#[derive(Clone, Debug)]
pub struct LevelController {
    low: LevelGains,
    high: LevelGains,
    mag_p: f32,
    angle_limit: f32,
    expo: f32,
    horizon_transition: f32,
    horizon_tilt_effect: f32,
    horizon_strength: f32,
    filter_enabled: bool,
    filter: [Pt1Filter; 2],
    integral: [f32; 2],
    prev_error: [f32; 2],
    prev_target: [f32; 2],
}

impl LevelController {
    pub fn new(profile: &PidProfile, dt: f32) -> Self {
        let mut result = Self {
            low: LevelGains::default(),
            high: LevelGains::default(),
            mag_p: 0.,
            angle_limit: 0.,
            expo: 0.,
            horizon_transition: 0.,
            horizon_tilt_effect: 0.,
            horizon_strength: 0.,
            filter_enabled: false,
            filter: [Pt1Filter::default(); 2],
            integral: [0.; 2],
            prev_error: [0.; 2],
            prev_target: [0.; 2],
        };
        result.init_filters(profile, dt);
        result.configure(profile);
        result
    }

    pub fn init_filters(&mut self, profile: &PidProfile, dt: f32) {
        self.filter_enabled = profile.angle_filter > 0;
        self.filter = [Pt1Filter::new(pt1_gain(profile.angle_filter as f32, dt)); 2];
        self.reset();
    }

    pub fn configure(&mut self, profile: &PidProfile) {
        self.low = profile.gains(PidIndex::LevelLow).into();
        self.high = profile.gains(PidIndex::LevelHigh).into();
        self.mag_p = profile.gains(PidIndex::Mag).p as f32 * MAG_HOLD_SCALE;
        self.angle_limit = (profile.level_angle_limit as f32).max(1.);
        self.expo = pct(profile.angle_expo);
        self.horizon_transition = profile.horizon_transition as f32;
        self.horizon_tilt_effect = pct(profile.horizon_tilt_effect);
        self.horizon_strength = pct(profile.horizon_strength);
    }

    /// Rate per degree used to pull the craft level, eg during crash recovery.
    pub fn level_gain(&self) -> f32 {
        self.low.p
    }

    /// Commanded angle for a stick deflection in [-1, 1], with expo. Degrees.
    pub fn angle_target(&self, rc_deflection: f32) -> f32 {
        let d = rc_deflection.clamp(-1., 1.);
        let shaped = d * d * d * self.expo + d * (1. - self.expo);
        shaped * self.angle_limit
    }

    /// How much leveling horizon mode applies, in [0, 1]. Full at center stick and level
    /// attitude; fades with stick deflection and with tilt.
    pub fn horizon_level_strength(&self, rc_deflection: f32, max_tilt: f32) -> f32 {
        let d = rc_deflection.abs().min(1.);
        let stick = if self.horizon_transition > 0. {
            (1. - d * 100. / self.horizon_transition).clamp(0., 1.)
        } else {
            1. - d
        };
        let tilt = (max_tilt.abs() / 180.).min(1.);

        (stick * (1. - tilt * self.horizon_tilt_effect)).clamp(0., 1.)
    }

    /// Run the level loop for roll or pitch. `attitude` is the trimmed angle in degrees, and
    /// `max_tilt` the larger of the trimmed roll and pitch angles.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        mode: LevelMode,
        axis: Axis,
        rate_setpoint: f32,
        rc_deflection: f32,
        attitude: f32,
        max_tilt: f32,
        dt: f32,
        pid_frequency: f32,
    ) -> LevelOutput {
        let i = match axis {
            Axis::Roll => 0,
            Axis::Pitch => 1,
            Axis::Yaw => {
                return LevelOutput {
                    setpoint: rate_setpoint,
                    feedforward: 0.,
                }
            }
        };

        if mode == LevelMode::Rate {
            self.reset_axis(i);
            return LevelOutput {
                setpoint: rate_setpoint,
                feedforward: 0.,
            };
        }

        let target = match mode {
            LevelMode::Angle => self.angle_target(rc_deflection),
            // Horizon levels towards 0; the stick commands rate.
            _ => 0.,
        };
        let error = target - attitude;

        // Blend from the low to high gain set as the error approaches the angle limit.
        let ratio = (error.abs() / self.angle_limit).min(1.);
        let lerp = |low: f32, high: f32| low + (high - low) * ratio;
        let kp = lerp(self.low.p, self.high.p);
        let ki = lerp(self.low.i, self.high.i);
        let kd = lerp(self.low.d, self.high.d);
        let kf = lerp(self.low.f, self.high.f);

        self.integral[i] = constrain_abs(self.integral[i] + error * dt, self.angle_limit);
        let derivative = (error - self.prev_error[i]) * pid_frequency;
        self.prev_error[i] = error;

        let mut level = kp * error + ki * self.integral[i] + kd * derivative;
        if self.filter_enabled {
            level = self.filter[i].apply(level);
        }

        let target_rate = (target - self.prev_target[i]) * pid_frequency;
        self.prev_target[i] = target;

        let result = match mode {
            LevelMode::Angle => LevelOutput {
                setpoint: level,
                feedforward: kf * target_rate,
            },
            _ => {
                let strength = self.horizon_level_strength(rc_deflection, max_tilt);
                LevelOutput {
                    setpoint: rate_setpoint + level * strength * self.horizon_strength,
                    feedforward: 0.,
                }
            }
        };

        LevelOutput {
            setpoint: constrain_abs(result.setpoint, SETPOINT_RATE_LIMIT),
            feedforward: result.feedforward,
        }
    }

    /// Yaw rate setpoint that holds heading. `heading_error` is target minus current, in degrees.
    pub fn heading_hold(&self, heading_error: f32) -> f32 {
        constrain_abs(heading_error * self.mag_p, SETPOINT_RATE_LIMIT)
    }

    fn reset_axis(&mut self, i: usize) {
        self.integral[i] = 0.;
        self.prev_error[i] = 0.;
        self.prev_target[i] = 0.;
        self.filter[i].reset(0.);
    }

    pub fn reset(&mut self) {
        for i in 0..2 {
            self.reset_axis(i);
        }
    }
}
