//! Construction and reconfiguration of the rate controller: loop timing, filter setup, and
//! caching scaled gains from the profile.

use crate::{
    filters::{AlphaBetaGamma, DtermLowpass, DualLowpass, DynamicNotch},
    flight_ctrls::{
        boost::{BoostShaper, Feathering},
        crash::CrashDetector,
        iterm::ItermEngine,
        level::LevelController,
        mixer::MixerScaling,
        pid::{
            AxisOutput, DtermChain, PidCoefficient, PidController, StabilisationState,
            DIRECT_FF_SCALE, DTERM_SCALE, ITERM_SCALE, PTERM_SCALE, YAW_ITERM_MULTIPLIER,
        },
        setpoint::SetpointConditioner,
        throttle::{GravityThrottle, ThrottleBoost},
    },
    log_macros::info,
    profile::{PidConfig, PidProfile},
    safety::RunawayTakeoff,
    Axis, AXIS_COUNT,
};

fn dt_from_looptime(looptime_us: u32) -> f32 {
    looptime_us as f32 * 0.000_001
}

impl DtermChain {
    fn new(profile: &PidProfile, axis: Axis, looptime_us: u32, dt: f32) -> Self {
        let cutoffs = profile.d_filter[axis.index()];

        let notch = if profile.dterm_dyn_notch {
            Some(DynamicNotch::new(
                profile.dterm_dyn_notch_q as f32 / 100.,
                looptime_us,
            ))
        } else {
            None
        };

        let abg = if profile.dterm_abg_alpha > 0 {
            Some(AlphaBetaGamma::new(
                profile.dterm_abg_alpha as f32 / 1_000.,
                profile.dterm_abg_boost as f32 / 100.,
                profile.dterm_abg_half_life as f32 / 100.,
                dt,
            ))
        } else {
            None
        };

        Self {
            notch,
            lowpass: DualLowpass::new(
                DtermLowpass::new(profile.dterm_filter_type, cutoffs.lpf_hz, looptime_us),
                DtermLowpass::new(profile.dterm_filter2_type, cutoffs.lpf2_hz, looptime_us),
            ),
            abg,
        }
    }
}

impl PidController {
    /// Build a controller for a profile. The loop runs every `pid_process_denom` gyro samples.
    pub fn new(profile: &PidProfile, cfg: &PidConfig, gyro_looptime_us: u32) -> Self {
        let looptime_us = cfg.pid_looptime_us(gyro_looptime_us).max(1);
        let dt = dt_from_looptime(looptime_us);

        let mut result = Self {
            looptime_us,
            dt,
            pid_frequency: 1. / dt,
            stabilisation: StabilisationState::On,
            coeffs: [PidCoefficient::default(); AXIS_COUNT],
            direct_ff_yaw: 0.,
            sum_limit: 0.,
            sum_limit_yaw: 0.,
            pid_at_min_throttle: true,
            outputs: [AxisOutput::default(); AXIS_COUNT],
            iterm: ItermEngine::new(profile, dt),
            setpoint: SetpointConditioner::new(profile, dt),
            level: LevelController::new(profile, dt),
            crash: CrashDetector::new(profile),
            error_boost: BoostShaper::default(),
            error_boost_yaw: BoostShaper::default(),
            dterm_boost: BoostShaper::default(),
            feathering: Feathering::default(),
            dterm: [
                DtermChain::new(profile, Axis::Roll, looptime_us, dt),
                DtermChain::new(profile, Axis::Pitch, looptime_us, dt),
                DtermChain::new(profile, Axis::Yaw, looptime_us, dt),
            ],
            prev_dterm_gyro: [0.; AXIS_COUNT],
            prev_dterm_error: [0.; AXIS_COUNT],
            dterm_primed: false,
            throttle_boost: ThrottleBoost::new(profile, dt),
            gravity: GravityThrottle::new(profile, dt),
            mixer: MixerScaling::new(profile),
            runaway: RunawayTakeoff::new(cfg),
        };
        result.init_config(profile);

        info!("PID loop init: {} us", looptime_us);
        result
    }

    /// Full re-init, eg after a profile switch or a loop rate change. Integrators are kept.
    pub fn init(&mut self, profile: &PidProfile, cfg: &PidConfig, gyro_looptime_us: u32) {
        self.set_target_looptime(cfg.pid_looptime_us(gyro_looptime_us));
        self.runaway.configure(cfg);
        self.init_filters(profile);
        self.init_config(profile);

        info!("PID loop init: {} us", self.looptime_us);
    }

    /// Set the loop period. Filters depend on it; follow with `init_filters`.
    pub fn set_target_looptime(&mut self, looptime_us: u32) {
        self.looptime_us = looptime_us.max(1);
        self.dt = dt_from_looptime(self.looptime_us);
        self.pid_frequency = 1. / self.dt;
    }

    /// Rebuild every filter from the profile and loop period. Filter history is cleared.
    pub fn init_filters(&mut self, profile: &PidProfile) {
        for axis in Axis::ALL {
            self.dterm[axis.index()] = DtermChain::new(profile, axis, self.looptime_us, self.dt);
        }
        self.prev_dterm_gyro = [0.; AXIS_COUNT];
        self.prev_dterm_error = [0.; AXIS_COUNT];
        self.dterm_primed = false;

        self.iterm.init_filters(profile, self.dt);
        self.setpoint.init_filters(profile, self.dt);
        self.level.init_filters(profile, self.dt);
        self.throttle_boost.init_filter(profile, self.dt);
        self.gravity.init_filter(self.dt);
    }

    /// Cache gains and limits from the profile. Call after any profile edit.
    pub fn init_config(&mut self, profile: &PidProfile) {
        for axis in Axis::ALL {
            let g = profile.gains(axis.pid_index());
            let yaw_mult = if axis == Axis::Yaw {
                YAW_ITERM_MULTIPLIER
            } else {
                1.
            };

            self.coeffs[axis.index()] = PidCoefficient {
                kp: g.p as f32 * PTERM_SCALE,
                ki: g.i as f32 * ITERM_SCALE * yaw_mult,
                kd: g.d as f32 * DTERM_SCALE,
            };
        }

        self.direct_ff_yaw = profile.direct_ff_yaw as f32 * DIRECT_FF_SCALE;
        self.sum_limit = profile.pid_sum_limit as f32;
        self.sum_limit_yaw = profile.pid_sum_limit_yaw as f32;
        self.pid_at_min_throttle = profile.pid_at_min_throttle;

        self.error_boost = BoostShaper::new(profile.error_boost, profile.error_boost_limit);
        self.error_boost_yaw =
            BoostShaper::new(profile.error_boost_yaw, profile.error_boost_limit_yaw);
        self.dterm_boost = BoostShaper::new(profile.dterm_boost, profile.dterm_boost_limit);
        self.feathering = Feathering::new(profile.feathered_pids);

        self.iterm.configure(profile);
        self.setpoint.configure(profile, self.dt);
        self.level.configure(profile);
        self.crash.configure(profile);
        self.throttle_boost.configure(profile);
        self.gravity.configure(profile);
        self.mixer = MixerScaling::new(profile);
    }
}
