//! This module contains the rate PID loop: the per-tick pass that turns gyro rates and
//! commanded rates into per-axis P, I, D and F terms for the mixer. Construction and
//! reconfiguration are in `pid_init`.
//!
//! [Some info on the PID terms, focused on BF](https://gist.github.com/exocode/90339d7f946ad5f83dd1cf29bf5df0dc)
//! https://oscarliang.com/quadcopter-pid-explained-tuning/

use num_traits::Float; // abs on float.

use crate::{
    filters::{AlphaBetaGamma, DualLowpass, DynamicNotch},
    flight_ctrls::{
        boost::{BoostShaper, Feathering},
        crash::{CrashDetector, CrashSignals},
        iterm::ItermEngine,
        level::{LevelController, LevelMode},
        mixer::{MixerInput, MixerScaling},
        setpoint::{SetpointConditioner, SpaTerm},
        throttle::{GravityThrottle, ThrottleBoost},
    },
    safety::{RunawayStatus, RunawayTakeoff, THROTTLE_IDLE},
    util::constrain_abs,
    Axis, AXIS_COUNT,
};

// Map the stored u8 gains to loop gains.
pub const PTERM_SCALE: f32 = 0.032_029;
pub const ITERM_SCALE: f32 = 0.244_381;
pub const DTERM_SCALE: f32 = 0.000_529;
pub const DIRECT_FF_SCALE: f32 = 0.005;
// Yaw integrates faster than roll and pitch for the same stored I.
pub const YAW_ITERM_MULTIPLIER: f32 = 2.5;

// D-term derivative is computed per second; crash thresholds are per ms.
const CRASH_DTERM_RATE_SCALE: f32 = 0.001;

/// One axis's terms after a tick. `sum` is clamped to the profile's limit; the terms
/// themselves aren't.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AxisOutput {
    pub p: f32,
    pub i: f32,
    pub d: f32,
    pub f: f32,
    pub sum: f32,
}

/// Accelerometer trims, in degrees. Subtracted from the attitude before leveling.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RollPitchTrims {
    pub roll: f32,
    pub pitch: f32,
}

impl RollPitchTrims {
    fn get(&self, axis: Axis) -> f32 {
        match axis {
            Axis::Roll => self.roll,
            Axis::Pitch => self.pitch,
            Axis::Yaw => 0.,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum StabilisationState {
    #[default]
    On,
    /// All outputs are held at 0, and the integrators reset.
    Off,
}

/// Everything the loop reads from the rest of the system for one tick.
#[derive(Clone, Copy, Debug, Default)]
pub struct TickInput {
    /// Free-running µs counter.
    pub now_us: u32,
    /// Body rates, deg/s. Roll, pitch, yaw.
    pub gyro: [f32; AXIS_COUNT],
    /// Commanded rates from the rates curve, deg/s.
    pub setpoint: [f32; AXIS_COUNT],
    /// Stick position per axis, -1 to 1.
    pub rc_deflection: [f32; AXIS_COUNT],
    /// Roll and pitch attitude, degrees. Untrimmed.
    pub attitude: [f32; 2],
    /// Heading target minus current heading, degrees, while heading hold is active.
    pub heading_error: Option<f32>,
    pub level_mode: LevelMode,
    /// 0 to 1
    pub throttle: f32,
    /// The mixer's saturation estimate from the previous tick. 1 means fully saturated.
    pub motor_mix_range: f32,
    pub armed: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TickOutput {
    pub axes: [AxisOutput; AXIS_COUNT],
    /// Throttle with throttle boost applied.
    pub throttle: f32,
    pub crash_recovery_active: bool,
    pub beeper_active: bool,
    pub runaway_triggered: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub(super) struct PidCoefficient {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

/// Gyro filtering for the D term: dynamic notch, two lowpass stages, then the optional
/// alpha-beta-gamma smoother.
#[derive(Clone, Copy, Debug)]
pub(super) struct DtermChain {
    pub notch: Option<DynamicNotch>,
    pub lowpass: DualLowpass,
    pub abg: Option<AlphaBetaGamma>,
}

impl DtermChain {
    fn apply(&mut self, gyro: f32) -> f32 {
        let mut v = gyro;
        if let Some(notch) = &mut self.notch {
            v = notch.apply(v);
        }
        v = self.lowpass.apply(v);
        if let Some(abg) = &mut self.abg {
            v = abg.apply(v);
        }
        v
    }
}

/// The rate controller. Owns all loop state; nothing is global.
pub struct PidController {
    pub(super) looptime_us: u32,
    pub(super) dt: f32,
    pub(super) pid_frequency: f32,
    pub(super) stabilisation: StabilisationState,
    pub(super) coeffs: [PidCoefficient; AXIS_COUNT],
    pub(super) direct_ff_yaw: f32,
    pub(super) sum_limit: f32,
    pub(super) sum_limit_yaw: f32,
    pub(super) pid_at_min_throttle: bool,
    pub(super) outputs: [AxisOutput; AXIS_COUNT],
    pub(super) iterm: ItermEngine,
    pub(super) setpoint: SetpointConditioner,
    pub(super) level: LevelController,
    pub(super) crash: CrashDetector,
    pub(super) error_boost: BoostShaper,
    pub(super) error_boost_yaw: BoostShaper,
    pub(super) dterm_boost: BoostShaper,
    pub(super) feathering: Feathering,
    pub(super) dterm: [DtermChain; AXIS_COUNT],
    /// Filtered gyro from the previous tick.
    pub(super) prev_dterm_gyro: [f32; AXIS_COUNT],
    /// Setpoint minus filtered gyro, from the previous tick.
    pub(super) prev_dterm_error: [f32; AXIS_COUNT],
    /// False until the first tick after a filter reinit has stored a previous sample.
    pub(super) dterm_primed: bool,
    pub(super) throttle_boost: ThrottleBoost,
    pub(super) gravity: GravityThrottle,
    pub(super) mixer: MixerScaling,
    pub(super) runaway: RunawayTakeoff,
}

impl PidController {
    /// Run the loop once. Call at the loop period set at init.
    pub fn tick(&mut self, input: &TickInput, trims: RollPitchTrims) -> TickOutput {
        if self.stabilisation == StabilisationState::Off {
            self.outputs = [AxisOutput::default(); AXIS_COUNT];
            self.iterm.reset();

            return TickOutput {
                axes: self.outputs,
                throttle: input.throttle.clamp(0., 1.),
                crash_recovery_active: false,
                beeper_active: false,
                runaway_triggered: false,
            };
        }

        let dyn_ci = self.iterm.dyn_ci(self.dt, input.motor_mix_range);
        let iterm_accelerator = self.gravity.iterm_accelerator();
        self.iterm.rotate(input.gyro, self.dt);

        let recovering = self.crash.recovery_active();
        let crash_abnormal = self.crash.is_abnormal();
        let suppress_pdf = !self.pid_at_min_throttle && input.throttle <= THROTTLE_IDLE;

        let trimmed = [
            input.attitude[0] - trims.get(Axis::Roll),
            input.attitude[1] - trims.get(Axis::Pitch),
        ];
        let max_tilt = trimmed[0].abs().max(trimmed[1].abs());

        // Setpoints for all axes first; axis lock looks at all three.
        let mut setpoints = [0.; AXIS_COUNT];
        let mut level_ff = [0.; AXIS_COUNT];

        for axis in Axis::ALL {
            let i = axis.index();
            let mut sp = input.setpoint[i];

            if axis == Axis::Yaw {
                if let Some(e) = input.heading_error {
                    sp = self.level.heading_hold(e);
                }
            }

            sp = self.setpoint.accel_limit(axis, sp);

            if axis != Axis::Yaw {
                let level = self.level.update(
                    input.level_mode,
                    axis,
                    sp,
                    input.rc_deflection[i],
                    trimmed[i],
                    max_tilt,
                    self.dt,
                    self.pid_frequency,
                );
                sp = level.setpoint;
                level_ff[i] = level.feedforward;

                if recovering {
                    sp = self
                        .crash
                        .recovery_setpoint(trimmed[i], self.level.level_gain());
                    level_ff[i] = 0.;
                }
            }

            setpoints[i] = sp;
        }

        let axis_lock = self.setpoint.axis_lock(setpoints);

        let mut raw_sums = [0.; AXIS_COUNT];
        let mut crash_dterm = [0.; AXIS_COUNT];

        for axis in Axis::ALL {
            let i = axis.index();
            let c = self.coeffs[i];
            let sp = setpoints[i];
            let gyro = input.gyro[i];
            let rc_deflection = input.rc_deflection[i];

            let mut error = sp - gyro;
            if crash_abnormal && axis == Axis::Yaw {
                error = constrain_abs(error, self.crash.limit_yaw());
            }

            // The relax filter tracks the setpoint even while it's bypassed.
            let relaxed = self.iterm.relax(axis, sp, error);
            let iterm_error = if recovering { error } else { relaxed };

            let spa_p = self.setpoint.spa_factor(SpaTerm::P, axis, rc_deflection);
            let spa_i = self.setpoint.spa_factor(SpaTerm::I, axis, rc_deflection);
            let spa_d = self.setpoint.spa_factor(SpaTerm::D, axis, rc_deflection);

            // P
            let boost = if axis == Axis::Yaw {
                &self.error_boost_yaw
            } else {
                &self.error_boost
            };
            let mut p = c.kp * boost.apply(error) * spa_p * axis_lock[i];

            // I
            let i_term = if recovering {
                self.iterm.reset_axis(axis);
                0.
            } else {
                let ki = c.ki * spa_i * axis_lock[i] * iterm_accelerator;
                self.iterm.accumulate(axis, ki, dyn_ci, iterm_error)
            };

            // D
            let d_gyro = self.dterm[i].apply(gyro);
            if !self.dterm_primed {
                self.prev_dterm_gyro[i] = d_gyro;
                self.prev_dterm_error[i] = sp - d_gyro;
            }
            let measurement_delta = -(d_gyro - self.prev_dterm_gyro[i]) * self.pid_frequency;
            let d_error = sp - d_gyro;
            let error_delta = (d_error - self.prev_dterm_error[i]) * self.pid_frequency;
            self.prev_dterm_gyro[i] = d_gyro;
            self.prev_dterm_error[i] = d_error;

            let delta = self.feathering.blend(measurement_delta, error_delta);
            crash_dterm[i] = delta * CRASH_DTERM_RATE_SCALE;

            let mut d = if c.kd > 0. {
                self.dterm_boost.apply(c.kd * delta) * spa_d
            } else {
                0.
            };

            // F
            let mut f = if axis == Axis::Yaw {
                self.direct_ff_yaw * sp
            } else {
                level_ff[i]
            };

            if suppress_pdf {
                p = 0.;
                d = 0.;
                f = 0.;
            }

            let raw = p + i_term + d + f;
            raw_sums[i] = raw;

            let mut limit = if axis == Axis::Yaw {
                self.sum_limit_yaw
            } else {
                self.sum_limit
            };
            if crash_abnormal && axis == Axis::Yaw {
                limit = limit.min(self.crash.limit_yaw());
            }

            self.outputs[i] = AxisOutput {
                p,
                i: i_term,
                d,
                f,
                sum: constrain_abs(raw, limit),
            };
            self.setpoint.record(axis, sp);
        }
        self.dterm_primed = true;

        self.crash.update(
            input.now_us,
            input.armed,
            &CrashSignals {
                dterm_rate: crash_dterm,
                gyro: input.gyro,
                setpoint: input.setpoint,
            },
        );

        self.runaway.update(
            input.now_us,
            input.armed,
            input.throttle,
            &raw_sums,
            &input.gyro,
        );

        let throttle = self.apply_throttle_boost(input.throttle);

        TickOutput {
            axes: self.outputs,
            throttle,
            crash_recovery_active: self.crash.recovery_active(),
            beeper_active: self.crash.beeper_active(),
            runaway_triggered: self.runaway.is_triggered(),
        }
    }

    /// Zero all integrators. Eg on disarm, so one flight doesn't affect the next.
    pub fn reset_iterm(&mut self) {
        self.iterm.reset();
    }

    pub fn set_stabilisation(&mut self, state: StabilisationState) {
        self.stabilisation = state;
        if state == StabilisationState::Off {
            self.outputs = [AxisOutput::default(); AXIS_COUNT];
            self.iterm.reset();
        }
    }

    pub fn stabilisation(&self) -> StabilisationState {
        self.stabilisation
    }

    /// Move the D-term notch on an axis, from the gyro frequency analysis. No effect unless
    /// the dynamic notch is enabled in the profile.
    pub fn set_dterm_notch_center(&mut self, axis: Axis, center_hz: f32) {
        if let Some(notch) = &mut self.dterm[axis.index()].notch {
            notch.set_center(center_hz);
        }
    }

    /// Feed this tick's throttle to the I-term accelerator. Call before `tick`.
    pub fn update_gravity_throttle(&mut self, throttle: f32) {
        self.gravity.update(throttle);
    }

    /// Boosted throttle. `tick` already applies this to its input throttle; call it directly
    /// only when not ticking, since each call advances the boost filter.
    pub fn apply_throttle_boost(&mut self, throttle: f32) -> f32 {
        self.throttle_boost.apply(throttle)
    }

    pub fn axis_output(&self, axis: Axis) -> AxisOutput {
        self.outputs[axis.index()]
    }

    pub fn outputs(&self) -> &[AxisOutput; AXIS_COUNT] {
        &self.outputs
    }

    /// Final setpoint from the last tick, after level and crash handling.
    pub fn previous_setpoint(&self, axis: Axis) -> f32 {
        self.setpoint.previous_setpoint(axis)
    }

    pub fn iterm(&self, axis: Axis) -> f32 {
        self.iterm.value(axis)
    }

    pub fn crash_recovery_active(&self) -> bool {
        self.crash.recovery_active()
    }

    pub fn beeper_active(&self) -> bool {
        self.crash.beeper_active()
    }

    pub fn runaway_status(&self) -> RunawayStatus {
        self.runaway.status()
    }

    pub fn throttle_boost(&self) -> &ThrottleBoost {
        &self.throttle_boost
    }

    pub fn mixer_scaling(&self) -> &MixerScaling {
        &self.mixer
    }

    /// The last tick's sums, scaled for the mixer.
    pub fn mixer_input(&self) -> MixerInput {
        self.mixer.prescale(&self.outputs)
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    pub fn pid_frequency(&self) -> f32 {
        self.pid_frequency
    }

    pub fn looptime_us(&self) -> u32 {
        self.looptime_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        profile::{CrashRecovery, DFilter, PidConfig, PidProfile},
        PidIndex,
    };
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const GYRO_LOOPTIME_US: u32 = 1_000;
    const TRIMS: RollPitchTrims = RollPitchTrims {
        roll: 0.,
        pitch: 0.,
    };

    fn controller(f: impl FnOnce(&mut PidProfile)) -> PidController {
        let mut profile = PidProfile::default();
        f(&mut profile);
        PidController::new(&profile, &PidConfig::default(), GYRO_LOOPTIME_US)
    }

    fn armed_input(now_us: u32) -> TickInput {
        TickInput {
            now_us,
            throttle: 0.5,
            armed: true,
            ..Default::default()
        }
    }

    #[test]
    fn sums_stay_within_limits() {
        let mut pid = controller(|p| {
            p.error_boost = 500;
            p.error_boost_limit = 100;
            p.dterm_boost = 500;
            p.dterm_boost_limit = 100;
            p.axis_lock_multiplier = 50;
            p.iterm_rotation = true;
            p.crash_recovery = CrashRecovery::On;
            p.dterm_abg_alpha = 300;
            p.dterm_abg_boost = 200;
            p.dterm_dyn_notch = true;
        });
        pid.set_dterm_notch_center(Axis::Roll, 180.);

        let modes = [LevelMode::Rate, LevelMode::Angle, LevelMode::Horizon];
        let mut rng = StdRng::seed_from_u64(7);
        let mut next = || rng.gen_range(-1.0f32..=1.0);

        for n in 0..20_000u32 {
            // Mostly large, with occasional extreme values.
            let scale = if n % 97 == 0 { 1e7 } else { 3_000. };
            let input = TickInput {
                now_us: n * GYRO_LOOPTIME_US,
                gyro: [next() * scale, next() * scale, next() * scale],
                setpoint: [next() * scale, next() * scale, next() * scale],
                rc_deflection: [next(), next(), next()],
                attitude: [next() * 180., next() * 90.],
                heading_error: if n % 3 == 0 { Some(next() * 180.) } else { None },
                level_mode: modes[(n / 1_000) as usize % 3],
                throttle: (next() + 1.) * 0.5,
                motor_mix_range: next() + 1.,
                armed: true,
            };
            let out = pid.tick(&input, TRIMS);

            for axis in Axis::ALL {
                let limit = if axis == Axis::Yaw { 400. } else { 500. };
                let sum = out.axes[axis.index()].sum;
                assert!(sum.abs() <= limit, "{:?} sum {} at tick {}", axis, sum, n);
                assert!(pid.iterm(axis).abs() <= 400.);
            }
        }
    }

    #[test]
    fn reset_iterm_then_zero_error() {
        let mut pid = controller(|_| {});

        for n in 0..500 {
            let mut input = armed_input(n * 1_000);
            input.setpoint = [100., -50., 30.];
            pid.tick(&input, TRIMS);
        }
        for axis in Axis::ALL {
            assert!(pid.iterm(axis) != 0.);
        }

        pid.reset_iterm();
        let input = TickInput {
            gyro: [20., -10., 5.],
            setpoint: [20., -10., 5.],
            ..armed_input(500_000)
        };
        let out = pid.tick(&input, TRIMS);
        for axis in Axis::ALL {
            assert_eq!(out.axes[axis.index()].i, 0.);
            assert_eq!(pid.iterm(axis), 0.);
        }
    }

    #[test]
    fn iterm_limit_under_sustained_error() {
        let mut pid = controller(|p| p.iterm_limit = 120);
        for n in 0..10_000 {
            let mut input = armed_input(n * 1_000);
            input.setpoint = [300., -300., 300.];
            let out = pid.tick(&input, TRIMS);
            for a in out.axes {
                assert!(a.i.abs() <= 120.);
            }
        }
        assert_eq!(pid.iterm(Axis::Roll), 120.);
        assert_eq!(pid.iterm(Axis::Pitch), -120.);
    }

    #[test]
    fn p_term_gain() {
        let mut pid = controller(|p| {
            p.error_boost = 0;
            p.error_boost_yaw = 0;
        });
        let mut input = armed_input(0);
        input.setpoint = [100., 0., 0.];
        let out = pid.tick(&input, TRIMS);

        assert_relative_eq!(out.axes[0].p, 45. * PTERM_SCALE * 100., max_relative = 1e-5);
        assert_eq!(out.axes[1].p, 0.);
    }

    #[test]
    fn yaw_direct_feedforward() {
        let mut pid = controller(|p| p.direct_ff_yaw = 20);
        let mut input = armed_input(0);
        input.setpoint = [0., 0., 200.];
        let out = pid.tick(&input, TRIMS);
        assert_relative_eq!(out.axes[2].f, 20. * DIRECT_FF_SCALE * 200., max_relative = 1e-5);
        assert_eq!(out.axes[0].f, 0.);
    }

    #[test]
    fn crash_recovery_end_to_end() {
        let mut pid = controller(|p| {
            p.crash_recovery = CrashRecovery::Beep;
            p.crash_time = 500;
            p.crash_delay = 200;
            // Unfiltered, so the injected derivative reaches the detector as-is.
            p.d_filter = [DFilter {
                lpf_hz: 0,
                lpf2_hz: 0,
            }; 3];
            p.dterm_abg_alpha = 0;
            p.dterm_dyn_notch = false;
        });
        let profile = PidProfile::default();
        let g = profile.crash_gthreshold as f32 * 2.;

        // Roll gyro flipping sign every tick: |gyro| is 2x the threshold, and the derivative is
        // far above the D threshold.
        // The first tick only seeds the D history, so detection starts on the second.
        let mut now = 0;
        for n in 0..=501 {
            let sign = if n % 2 == 0 { 1. } else { -1. };
            let input = TickInput {
                gyro: [g * sign, 0., 1_000.],
                setpoint: [0.; 3],
                attitude: [40., 0.],
                ..armed_input(now)
            };
            let out = pid.tick(&input, TRIMS);
            // The yaw clamp applies from the tick after detection starts.
            if n > 1 {
                assert!(out.axes[2].sum.abs() <= profile.crash_limit_yaw as f32);
            }
            now += 1_000;
        }
        assert!(pid.crash_recovery_active());
        assert!(pid.beeper_active());

        // Condition removed. Roll is driven back towards level, with I held at 0.
        let calm = |now| TickInput {
            attitude: [40., 0.],
            ..armed_input(now)
        };
        let out = pid.tick(&calm(now), TRIMS);
        now += 1_000;
        assert!(out.crash_recovery_active);
        assert!(pid.previous_setpoint(Axis::Roll) < 0.);
        assert!(out.axes[2].sum.abs() <= profile.crash_limit_yaw as f32);
        for axis in Axis::ALL {
            assert_eq!(pid.iterm(axis), 0.);
        }

        for _ in 0..200 {
            pid.tick(&calm(now), TRIMS);
            now += 1_000;
        }
        assert!(!pid.crash_recovery_active());
        assert!(!pid.beeper_active());
    }

    #[test]
    fn stabilisation_off_zeroes_outputs() {
        let mut pid = controller(|_| {});
        let mut input = armed_input(0);
        input.setpoint = [300., 200., 100.];
        input.gyro = [-50., 10., 0.];
        pid.tick(&input, TRIMS);

        pid.set_stabilisation(StabilisationState::Off);
        for n in 1..100 {
            input.now_us = n * 1_000;
            let out = pid.tick(&input, TRIMS);
            for a in out.axes {
                assert_eq!(a, AxisOutput::default());
            }
            for axis in Axis::ALL {
                assert_eq!(pid.iterm(axis), 0.);
            }
        }
        assert_eq!(*pid.outputs(), [AxisOutput::default(); 3]);

        pid.set_stabilisation(StabilisationState::On);
        let out = pid.tick(&input, TRIMS);
        assert!(out.axes[0].sum != 0.);
    }

    #[test]
    fn min_throttle_suppresses_p_d_f() {
        let mut pid = controller(|p| {
            p.pid_at_min_throttle = false;
            p.direct_ff_yaw = 50;
        });
        let mut input = armed_input(0);
        input.throttle = 0.;
        input.setpoint = [200., -200., 200.];
        input.gyro = [10., 10., 10.];
        let out = pid.tick(&input, TRIMS);
        for a in out.axes {
            assert_eq!((a.p, a.d, a.f), (0., 0., 0.));
            assert_relative_eq!(a.sum, a.i);
        }

        let mut pid = controller(|p| p.pid_at_min_throttle = true);
        let out = pid.tick(&input, TRIMS);
        assert!(out.axes[0].p > 0.);
    }

    #[test]
    fn iterm_rotation_under_yaw() {
        let mut pid = controller(|p| {
            p.iterm_rotation = true;
            p.pid[PidIndex::Roll.index()].i = 0;
            p.pid[PidIndex::Pitch.index()].i = 0;
        });
        pid.iterm.set(Axis::Roll, 100.);

        // Yaw gyro matching the yaw setpoint: no yaw error, pure rotation of roll and pitch.
        let yaw_rate = 90.;
        let dt = pid.dt();
        for n in 1..=500u32 {
            let input = TickInput {
                gyro: [0., 0., yaw_rate],
                setpoint: [0., 0., yaw_rate],
                ..armed_input(n * 1_000)
            };
            pid.tick(&input, TRIMS);

            let theta = (yaw_rate * dt * n as f32).to_radians();
            assert_relative_eq!(pid.iterm(Axis::Roll), 100. * theta.cos(), epsilon = 0.01);
            assert_relative_eq!(pid.iterm(Axis::Pitch), -100. * theta.sin(), epsilon = 0.01);
        }
    }

    #[test]
    fn throttle_boost_in_output() {
        let mut pid = controller(|p| p.throttle_boost = 5);
        let out = pid.tick(&armed_input(0), TRIMS);
        assert!(out.throttle > 0.5);
        assert!(pid.throttle_boost().value() > 0.);
    }

    #[test]
    fn angle_mode_levels_craft() {
        let mut pid = controller(|p| p.angle_expo = 0);
        let input = TickInput {
            attitude: [20., -10.],
            level_mode: LevelMode::Angle,
            ..armed_input(0)
        };
        let trims = RollPitchTrims {
            roll: 0.,
            pitch: -10.,
        };
        pid.tick(&input, trims);
        assert!(pid.previous_setpoint(Axis::Roll) < 0.);
        // Pitch is at its trimmed level.
        assert_relative_eq!(pid.previous_setpoint(Axis::Pitch), 0., epsilon = 1e-4);
    }

    #[test]
    fn runaway_takeoff_reported() {
        let mut pid = controller(|p| {
            p.pid[PidIndex::Roll.index()].p = 200;
            p.pid_sum_limit = 1_000;
        });
        let mut triggered = false;
        for n in 0..200 {
            let input = TickInput {
                gyro: [-600., 0., 0.],
                setpoint: [0.; 3],
                throttle: 0.1,
                ..armed_input(n * 1_000)
            };
            triggered |= pid.tick(&input, TRIMS).runaway_triggered;
        }
        assert!(triggered);
        assert_eq!(pid.runaway_status(), RunawayStatus::Triggered);
    }
}
