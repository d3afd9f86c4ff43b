//! Throttle-driven compensation: throttle boost, and the I-term accelerator that reacts to
//! throttle changes. Throttle is on a 0 to 1 scale.

use num_traits::Float; // abs on float.

use crate::{
    filters::{pt1_gain, Pt1Filter},
    profile::PidProfile,
    util::{clamp, pct},
};

pub const EMU_GRAVITY_THROTTLE_FILTER_CUTOFF: f32 = 15.;

const THROTTLE_BOOST_SCALE: f32 = 0.1;

/// Adds a multiple of the throttle's high-passed component to the throttle, which sharpens
/// throttle response.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThrottleBoost {
    factor: f32,
    lpf: Pt1Filter,
    /// Boost added on the last call to `apply`.
    value: f32,
}

impl ThrottleBoost {
    pub fn new(profile: &PidProfile, dt: f32) -> Self {
        let mut result = Self::default();
        result.init_filter(profile, dt);
        result.configure(profile);
        result
    }

    pub fn init_filter(&mut self, profile: &PidProfile, dt: f32) {
        self.lpf = Pt1Filter::new(pt1_gain(profile.throttle_boost_cutoff as f32, dt));
        self.value = 0.;
    }

    pub fn configure(&mut self, profile: &PidProfile) {
        self.factor = profile.throttle_boost as f32 * THROTTLE_BOOST_SCALE;
    }

    /// Boosted throttle, clamped to [0, 1]. Advances the filter; call once per tick.
    pub fn apply(&mut self, throttle: f32) -> f32 {
        let throttle = if throttle.is_finite() { throttle } else { 0. };
        let lpf = self.lpf.apply(throttle);
        self.value = self.factor * (throttle - lpf);

        let mut result = throttle + self.value;
        clamp(&mut result, (0., 1.));
        result
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn filter(&self) -> &Pt1Filter {
        &self.lpf
    }
}

/// Speeds up I accumulation while throttle is changing, when gravity and thrust changes
/// disturb attitude the most.
#[derive(Clone, Copy, Debug)]
pub struct GravityThrottle {
    gain: f32,
    lpf: Pt1Filter,
    accelerator: f32,
}

impl Default for GravityThrottle {
    fn default() -> Self {
        Self {
            gain: 0.,
            lpf: Pt1Filter::default(),
            accelerator: 1.,
        }
    }
}

impl GravityThrottle {
    pub fn new(profile: &PidProfile, dt: f32) -> Self {
        let mut result = Self::default();
        result.init_filter(dt);
        result.configure(profile);
        result
    }

    pub fn init_filter(&mut self, dt: f32) {
        self.lpf = Pt1Filter::new(pt1_gain(EMU_GRAVITY_THROTTLE_FILTER_CUTOFF, dt));
        self.accelerator = 1.;
    }

    pub fn configure(&mut self, profile: &PidProfile) {
        self.gain = pct(profile.emu_gravity_gain);
    }

    pub fn update(&mut self, throttle: f32) {
        if !throttle.is_finite() {
            return;
        }
        let hpf = throttle - self.lpf.apply(throttle);
        self.accelerator = 1. + hpf.abs() * self.gain;
    }

    /// Multiplier on Ki. 1 with steady throttle.
    pub fn iterm_accelerator(&self) -> f32 {
        self.accelerator
    }
}
