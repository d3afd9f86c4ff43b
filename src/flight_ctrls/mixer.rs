//! What the PID loop hands the motor mixer: scaled axis commands, and the profile's choice of
//! scaling strategy. The mixer itself (motor layout, desaturation) lives downstream.

use crate::{
    flight_ctrls::pid::AxisOutput,
    profile::{MixerImpl, PidProfile},
    util::{map_linear, pct},
};

/// PID sums are divided by this before mixing.
pub const PID_MIXER_SCALING: f32 = 1_000.;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MixerInput {
    /// Roll, pitch and yaw commands, scaled for the mixer.
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub mode: MixerImpl,
    /// Mix roll and pitch first, then yaw into the remaining headroom.
    pub separate_yaw_pass: bool,
    /// Compensate throttle for fast yaw movement. Only set with the two-pass mixer.
    pub yaw_throttle_comp: bool,
    /// Shift each motor group only as much as needed to clear clipping.
    pub laziness: bool,
    /// Upper motor output limit, as a fraction.
    pub motor_output_limit: f32,
}

/// Mixer settings from the active profile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MixerScaling {
    mode: MixerImpl,
    laziness: bool,
    yaw_throttle_comp: bool,
    motor_output_limit: f32,
    thrust_linear_low: f32,
    thrust_linear_high: f32,
    linear_throttle: bool,
}

impl MixerScaling {
    pub fn new(profile: &PidProfile) -> Self {
        Self {
            mode: profile.mixer_impl,
            laziness: profile.mixer_laziness,
            yaw_throttle_comp: profile.mixer_yaw_throttle_comp,
            motor_output_limit: pct(profile.motor_output_limit),
            thrust_linear_low: pct(profile.linear_thrust_low_output),
            thrust_linear_high: pct(profile.linear_thrust_high_output),
            linear_throttle: profile.linear_throttle,
        }
    }

    pub fn mode(&self) -> MixerImpl {
        self.mode
    }

    pub fn prescale(&self, outputs: &[AxisOutput; 3]) -> MixerInput {
        let two_pass = self.mode == MixerImpl::TwoPass;

        MixerInput {
            roll: outputs[0].sum / PID_MIXER_SCALING,
            pitch: outputs[1].sum / PID_MIXER_SCALING,
            yaw: outputs[2].sum / PID_MIXER_SCALING,
            mode: self.mode,
            separate_yaw_pass: two_pass,
            yaw_throttle_comp: two_pass && self.yaw_throttle_comp,
            laziness: self.laziness,
            motor_output_limit: self.motor_output_limit,
        }
    }

    fn linearization(&self, output: f32) -> f32 {
        map_linear(
            output,
            (0., 1.),
            (self.thrust_linear_low, self.thrust_linear_high),
        )
    }

    fn is_linearizing(&self) -> bool {
        self.thrust_linear_low > 0. || self.thrust_linear_high > 0.
    }

    /// Raise a motor output so thrust, which goes roughly with the square of motor speed,
    /// tracks the command more linearly. Endpoints are unchanged. Input and output are 0 to 1.
    pub fn linearize_thrust(&self, motor_output: f32) -> f32 {
        let out = motor_output.clamp(0., 1.);
        if !self.is_linearizing() {
            return out;
        }
        let inv = 1. - out;

        (out * (1. + self.linearization(out) * inv * inv)).clamp(0., 1.)
    }

    /// Lower throttle to offset the linearization of the motor outputs, so hover throttle
    /// is about where it was without it. Skipped with linear throttle.
    pub fn compensate_thrust_linearization(&self, throttle: f32) -> f32 {
        let t = throttle.clamp(0., 1.);
        if !self.is_linearizing() || self.linear_throttle {
            return t;
        }
        let tl = self.linearization(t);
        let amount = tl - 0.5 * tl * tl;
        let inv = 1. - t;

        t / (1. + amount * inv * inv)
    }
}
