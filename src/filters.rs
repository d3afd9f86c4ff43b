//! Digital filters used on the D-term path, and by the setpoint and throttle shaping stages.
//!
//! Each filter instance is configured once from the profile (cutoff, loop period) and advanced
//! once per tick. Coefficients and history are only changed together, through `&mut self`.
//!
//! Reference: https://brushlesswhoop.com/betaflight-rpm-filter/

use core::f32::consts::TAU;

#[cfg(feature = "defmt")]
use defmt::Format;

use num_enum::TryFromPrimitive; // Enum from integer
use num_traits::Float; // sin, cos etc on float.

// Q giving a Butterworth response for the second-order lowpass.
const BIQUAD_Q: f32 = core::f32::consts::FRAC_1_SQRT_2;

// Cutoff of the lowpass applied to the alpha-beta-gamma residual boost.
const ABG_BOOST_CUTOFF: f32 = 100.;
const ABG_BOOST_SCALE: f32 = 0.000_000_3;

/// Lowpass kind for each of the two D-term stages. Repr is the stored profile value.
#[cfg_attr(feature = "defmt", derive(Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum FilterType {
    Pt1 = 0,
    Biquad = 1,
}

/// Gain for a first-order lowpass at `f_cut` Hz, updated every `dt` seconds.
pub fn pt1_gain(f_cut: f32, dt: f32) -> f32 {
    let omega = TAU * f_cut * dt;
    omega / (omega + 1.)
}

/// Q for a notch centered on `center` Hz, with its lower -3dB point at `cutoff`.
pub fn notch_q(center: f32, cutoff: f32) -> f32 {
    center * cutoff / (center * center - cutoff * cutoff)
}

/// First-order lowpass.
#[derive(Clone, Copy, Default, Debug)]
pub struct Pt1Filter {
    state: f32,
    k: f32,
}

impl Pt1Filter {
    pub fn new(k: f32) -> Self {
        Self { state: 0., k }
    }

    pub fn apply(&mut self, input: f32) -> f32 {
        self.state += self.k * (input - self.state);
        self.state
    }

    /// Change the gain without touching history.
    pub fn update_gain(&mut self, k: f32) {
        self.k = k;
    }

    pub fn reset(&mut self, val: f32) {
        self.state = val;
    }

    pub fn state(&self) -> f32 {
        self.state
    }

    pub fn gain(&self) -> f32 {
        self.k
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BiquadKind {
    Lowpass,
    Notch,
}

/// Second-order IIR filter, direct form 2 transposed.
#[derive(Clone, Copy, Default, Debug)]
pub struct BiquadFilter {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
}

impl BiquadFilter {
    pub fn new(kind: BiquadKind, freq: f32, looptime_us: u32, q: f32) -> Self {
        let mut result = Self::default();
        result.update(freq, looptime_us, q, kind);
        result
    }

    pub fn new_lowpass(freq: f32, looptime_us: u32) -> Self {
        Self::new(BiquadKind::Lowpass, freq, looptime_us, BIQUAD_Q)
    }

    pub fn new_notch(center: f32, looptime_us: u32, q: f32) -> Self {
        Self::new(BiquadKind::Notch, center, looptime_us, q)
    }

    /// Recompute coefficients. History is kept, so this can be called between ticks
    /// without a discontinuity in the output.
    pub fn update(&mut self, freq: f32, looptime_us: u32, q: f32, kind: BiquadKind) {
        let omega = TAU * freq * looptime_us as f32 * 0.000_001;
        let sn = omega.sin();
        let cs = omega.cos();
        let alpha = sn / (2. * q);

        let (b0, b1, b2) = match kind {
            BiquadKind::Lowpass => {
                let b0 = (1. - cs) / 2.;
                (b0, 1. - cs, b0)
            }
            BiquadKind::Notch => (1., -2. * cs, 1.),
        };
        let a0 = 1. + alpha;

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = -2. * cs / a0;
        self.a2 = (1. - alpha) / a0;
    }

    pub fn apply(&mut self, input: f32) -> f32 {
        let result = self.b0 * input + self.x1;
        self.x1 = self.b1 * input - self.a1 * result + self.x2;
        self.x2 = self.b2 * input - self.a2 * result;
        result
    }

    pub fn reset(&mut self) {
        self.x1 = 0.;
        self.x2 = 0.;
    }
}

/// One D-term lowpass stage. A cutoff of 0 disables it.
#[derive(Clone, Copy, Debug, Default)]
pub enum DtermLowpass {
    #[default]
    Off,
    Pt1(Pt1Filter),
    Biquad(BiquadFilter),
}

impl DtermLowpass {
    pub fn new(kind: FilterType, cutoff_hz: u16, looptime_us: u32) -> Self {
        if cutoff_hz == 0 || looptime_us == 0 {
            return Self::Off;
        }
        let cutoff = cutoff_hz as f32;

        match kind {
            FilterType::Pt1 => {
                Self::Pt1(Pt1Filter::new(pt1_gain(cutoff, looptime_us as f32 * 0.000_001)))
            }
            FilterType::Biquad => {
                let nyquist = 1_000_000. / looptime_us as f32 / 2.;
                if cutoff >= nyquist {
                    Self::Off
                } else {
                    Self::Biquad(BiquadFilter::new_lowpass(cutoff, looptime_us))
                }
            }
        }
    }

    pub fn apply(&mut self, input: f32) -> f32 {
        match self {
            Self::Off => input,
            Self::Pt1(f) => f.apply(input),
            Self::Biquad(f) => f.apply(input),
        }
    }
}

/// The two cascaded D-term lowpass stages, configured independently.
#[derive(Clone, Copy, Default, Debug)]
pub struct DualLowpass {
    pub first: DtermLowpass,
    pub second: DtermLowpass,
}

impl DualLowpass {
    pub fn new(first: DtermLowpass, second: DtermLowpass) -> Self {
        Self { first, second }
    }

    pub fn apply(&mut self, input: f32) -> f32 {
        let v = self.first.apply(input);
        self.second.apply(v)
    }
}

/// Alpha-beta-gamma predictive smoother. Tracks value, rate and acceleration, which gives
/// less phase delay than a lowpass of similar smoothing, at the cost of some overshoot.
///
/// `beta` and `gamma` are derived from `alpha` for a critically damped response.
/// [Reference](https://en.wikipedia.org/wiki/Alpha_beta_filter)
#[derive(Clone, Copy, Debug)]
pub struct AlphaBetaGamma {
    alpha: f32,
    beta: f32,
    gamma: f32,
    boost: f32,
    boost_filter: Pt1Filter,
    /// Per-tick decay applied to the rate and acceleration estimates.
    decay: f32,
    dt: f32,
    /// Estimated value
    x: f32,
    /// Estimated rate
    v: f32,
    /// Estimated acceleration
    a: f32,
}

impl AlphaBetaGamma {
    /// `alpha` is in (0, 1]. `boost` scales a squared-residual boost; 0 disables it.
    /// `half_life` is in seconds; 0 keeps the full history.
    pub fn new(alpha: f32, boost: f32, half_life: f32, dt: f32) -> Self {
        let alpha = alpha.clamp(0.001, 1.);
        let xi = (1. - alpha).cbrt();

        let decay = if half_life > 0. {
            0.5_f32.powf(dt / half_life)
        } else {
            1.
        };

        Self {
            alpha,
            beta: 1.5 * (1. - xi).powi(2) * (1. + xi),
            gamma: 0.5 * (1. - xi).powi(3),
            boost: boost * boost * ABG_BOOST_SCALE,
            boost_filter: Pt1Filter::new(pt1_gain(ABG_BOOST_CUTOFF, dt)),
            decay,
            dt,
            x: 0.,
            v: 0.,
            a: 0.,
        }
    }

    pub fn apply(&mut self, input: f32) -> f32 {
        self.v *= self.decay;
        self.a *= self.decay;

        // Predict
        self.x += self.dt * self.v + 0.5 * self.dt * self.dt * self.a;
        self.v += self.dt * self.a;

        let residual_raw = input - self.x;
        let mut residual =
            residual_raw + self.boost_filter.apply(residual_raw.abs() * residual_raw * self.boost);

        // The boost may not push the estimate past the measurement.
        if (residual * self.alpha).abs() > residual_raw.abs() {
            residual = residual_raw / self.alpha;
        }

        // Correct
        self.x += self.alpha * residual;
        self.v += self.beta / self.dt * residual;
        self.a += 2. * self.gamma / (self.dt * self.dt) * residual;

        self.x
    }
}

/// A notch whose center is set at runtime by a frequency-analysis stage. Passes input
/// through unchanged until the first center is supplied.
#[derive(Clone, Copy, Debug)]
pub struct DynamicNotch {
    filter: BiquadFilter,
    q: f32,
    looptime_us: u32,
    center_hz: Option<f32>,
}

impl DynamicNotch {
    pub fn new(q: f32, looptime_us: u32) -> Self {
        Self {
            filter: BiquadFilter::default(),
            q,
            looptime_us,
            center_hz: None,
        }
    }

    /// Move the notch. A center at 0, or at or above Nyquist, disables it.
    pub fn set_center(&mut self, center_hz: f32) {
        let nyquist = 1_000_000. / self.looptime_us.max(1) as f32 / 2.;

        if center_hz <= 0. || center_hz >= nyquist {
            self.center_hz = None;
            self.filter.reset();
            return;
        }

        match self.center_hz {
            Some(_) => self
                .filter
                .update(center_hz, self.looptime_us, self.q, BiquadKind::Notch),
            None => self.filter = BiquadFilter::new_notch(center_hz, self.looptime_us, self.q),
        }
        self.center_hz = Some(center_hz);
    }

    pub fn center(&self) -> Option<f32> {
        self.center_hz
    }

    pub fn apply(&mut self, input: f32) -> f32 {
        match self.center_hz {
            Some(_) => self.filter.apply(input),
            None => input,
        }
    }
}
