//! Crash detection and recovery. A crash shows up as a large, fast change in rate the pilot
//! didn't command. Once one has persisted, roll and pitch are driven back towards level for a
//! fixed time, with the integrators held at zero.

use num_traits::Float; // abs on float.

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::{
    log_macros::{info, warn},
    profile::{CrashRecovery, PidProfile},
    util::{constrain_abs, elapsed_us},
    AXIS_COUNT,
};

#[cfg_attr(feature = "defmt", derive(Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum CrashState {
    #[default]
    Normal,
    /// The crash condition is present, but hasn't persisted long enough to act on.
    Detecting,
    Recovering,
}

/// This tick's per-axis signals the detector looks at.
#[derive(Clone, Copy, Debug, Default)]
pub struct CrashSignals {
    /// Filtered D-term derivative, deg/s per ms.
    pub dterm_rate: [f32; AXIS_COUNT],
    /// deg/s
    pub gyro: [f32; AXIS_COUNT],
    /// Commanded rate, deg/s
    pub setpoint: [f32; AXIS_COUNT],
}

#[derive(Clone, Debug)]
pub struct CrashDetector {
    mode: CrashRecovery,
    state: CrashState,
    /// When the current state was entered.
    entered_us: u32,
    detected_axes: [bool; AXIS_COUNT],
    dterm_threshold: f32,
    gyro_threshold: f32,
    setpoint_threshold: f32,
    time_us: u32,
    delay_us: u32,
    /// Degrees of tilt left alone during recovery.
    recovery_angle: f32,
    /// deg/s
    recovery_rate: f32,
    limit_yaw: f32,
}

impl CrashDetector {
    pub fn new(profile: &PidProfile) -> Self {
        let mut result = Self {
            mode: CrashRecovery::Off,
            state: CrashState::Normal,
            entered_us: 0,
            detected_axes: [false; AXIS_COUNT],
            dterm_threshold: 0.,
            gyro_threshold: 0.,
            setpoint_threshold: 0.,
            time_us: 0,
            delay_us: 0,
            recovery_angle: 0.,
            recovery_rate: 0.,
            limit_yaw: 0.,
        };
        result.configure(profile);
        result
    }

    /// Load thresholds from the profile. Turning recovery off mid-crash ends it.
    pub fn configure(&mut self, profile: &PidProfile) {
        self.mode = profile.crash_recovery;
        self.dterm_threshold = profile.crash_dthreshold as f32;
        self.gyro_threshold = profile.crash_gthreshold as f32;
        self.setpoint_threshold = profile.crash_setpoint_threshold as f32;
        self.time_us = profile.crash_time as u32 * 1_000;
        self.delay_us = profile.crash_delay as u32 * 1_000;
        self.recovery_angle = profile.crash_recovery_angle as f32;
        self.recovery_rate = profile.crash_recovery_rate as f32;
        self.limit_yaw = profile.crash_limit_yaw as f32;

        if self.mode == CrashRecovery::Off {
            self.reset();
        }
    }

    fn axis_crashed(&self, signals: &CrashSignals, i: usize) -> bool {
        signals.dterm_rate[i].abs() > self.dterm_threshold
            && signals.gyro[i].abs() > self.gyro_threshold
            && signals.setpoint[i].abs() < self.setpoint_threshold
    }

    fn enter(&mut self, state: CrashState, now_us: u32) {
        self.state = state;
        self.entered_us = now_us;
    }

    /// Advance the state machine with this tick's signals. Returns the new state.
    pub fn update(&mut self, now_us: u32, armed: bool, signals: &CrashSignals) -> CrashState {
        if self.mode == CrashRecovery::Off || !armed {
            if self.state == CrashState::Recovering {
                info!("Crash recovery cancelled");
            }
            self.reset();
            return self.state;
        }

        match self.state {
            CrashState::Normal => {
                for i in 0..AXIS_COUNT {
                    self.detected_axes[i] = self.axis_crashed(signals, i);
                }
                if self.detected_axes.iter().any(|d| *d) {
                    self.enter(CrashState::Detecting, now_us);
                }
            }
            CrashState::Detecting => {
                for i in 0..AXIS_COUNT {
                    self.detected_axes[i] = self.axis_crashed(signals, i);
                }

                if !self.detected_axes.iter().any(|d| *d) {
                    self.enter(CrashState::Normal, now_us);
                } else if elapsed_us(now_us, self.entered_us) >= self.time_us {
                    warn!("Crash detected; recovering");
                    self.enter(CrashState::Recovering, now_us);
                }
            }
            CrashState::Recovering => {
                if elapsed_us(now_us, self.entered_us) >= self.delay_us {
                    info!("Crash recovery complete");
                    self.detected_axes = [false; AXIS_COUNT];
                    self.enter(CrashState::Normal, now_us);
                }
            }
        }

        self.state
    }

    pub fn state(&self) -> CrashState {
        self.state
    }

    /// True while detecting or recovering. The yaw clamp applies in both.
    pub fn is_abnormal(&self) -> bool {
        self.state != CrashState::Normal
    }

    pub fn recovery_active(&self) -> bool {
        self.state == CrashState::Recovering
    }

    pub fn beeper_active(&self) -> bool {
        self.recovery_active() && self.mode == CrashRecovery::Beep
    }

    /// Axes that met the crash condition on the last update while detecting.
    pub fn detected_axes(&self) -> [bool; AXIS_COUNT] {
        self.detected_axes
    }

    /// Roll or pitch rate setpoint during recovery. `attitude` is the trimmed angle, in degrees.
    /// Tilt within the recovery angle is left alone.
    pub fn recovery_setpoint(&self, attitude: f32, level_gain: f32) -> f32 {
        let excess = if attitude > self.recovery_angle {
            attitude - self.recovery_angle
        } else if attitude < -self.recovery_angle {
            attitude + self.recovery_angle
        } else {
            0.
        };

        constrain_abs(-excess * level_gain, self.recovery_rate)
    }

    /// Clamp applied to the yaw error and yaw sum while not in `Normal`.
    pub fn limit_yaw(&self) -> f32 {
        self.limit_yaw
    }

    pub fn reset(&mut self) {
        self.state = CrashState::Normal;
        self.detected_axes = [false; AXIS_COUNT];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const TICK_US: u32 = 1_000;

    fn detector(mode: CrashRecovery) -> CrashDetector {
        let mut profile = PidProfile::default();
        profile.crash_recovery = mode;
        profile.crash_time = 500;
        profile.crash_delay = 200;
        CrashDetector::new(&profile)
    }

    fn crashing_roll(p: &PidProfile) -> CrashSignals {
        CrashSignals {
            dterm_rate: [p.crash_dthreshold as f32 * 2., 0., 0.],
            gyro: [p.crash_gthreshold as f32 * 2., 0., 0.],
            setpoint: [0.; 3],
        }
    }

    #[test]
    fn detect_then_recover_then_normal() {
        let profile = PidProfile::default();
        let mut d = detector(CrashRecovery::On);
        let crash = crashing_roll(&profile);

        let mut now = 10_000;
        assert_eq!(d.update(now, true, &crash), CrashState::Detecting);
        assert_eq!(d.detected_axes(), [true, false, false]);

        // Holds Detecting until crash_time has passed.
        for _ in 0..499 {
            now += TICK_US;
            assert_eq!(d.update(now, true, &crash), CrashState::Detecting);
        }
        now += TICK_US;
        assert_eq!(d.update(now, true, &crash), CrashState::Recovering);
        assert!(d.recovery_active());
        assert!(d.is_abnormal());
        assert!(!d.beeper_active());

        // Recovery is time-bounded; the condition going away doesn't end it early.
        let calm = CrashSignals::default();
        for _ in 0..199 {
            now += TICK_US;
            assert_eq!(d.update(now, true, &calm), CrashState::Recovering);
        }
        now += TICK_US;
        assert_eq!(d.update(now, true, &calm), CrashState::Normal);
        assert!(!d.is_abnormal());
    }

    #[test]
    fn condition_lapse_returns_to_normal() {
        let profile = PidProfile::default();
        let mut d = detector(CrashRecovery::On);
        let crash = crashing_roll(&profile);

        d.update(0, true, &crash);
        d.update(1_000, true, &crash);
        assert_eq!(d.state(), CrashState::Detecting);

        // Commanded motion isn't a crash.
        let mut commanded = crash;
        commanded.setpoint[0] = profile.crash_setpoint_threshold as f32 + 1.;
        assert_eq!(d.update(2_000, true, &commanded), CrashState::Normal);
    }

    #[test]
    fn all_conditions_needed() {
        let profile = PidProfile::default();
        let mut d = detector(CrashRecovery::On);
        let crash = crashing_roll(&profile);

        let mut low_gyro = crash;
        low_gyro.gyro[0] = profile.crash_gthreshold as f32 * 0.5;
        assert_eq!(d.update(0, true, &low_gyro), CrashState::Normal);

        let mut low_d = crash;
        low_d.dterm_rate[0] = profile.crash_dthreshold as f32 * 0.5;
        assert_eq!(d.update(0, true, &low_d), CrashState::Normal);
    }

    #[test]
    fn timing_survives_counter_wrap() {
        let profile = PidProfile::default();
        let mut d = detector(CrashRecovery::On);
        let crash = crashing_roll(&profile);

        let start = u32::MAX - 100_000;
        d.update(start, true, &crash);
        assert_eq!(
            d.update(start.wrapping_add(499_000), true, &crash),
            CrashState::Detecting
        );
        assert_eq!(
            d.update(start.wrapping_add(500_000), true, &crash),
            CrashState::Recovering
        );
    }

    #[test]
    fn off_and_disarm() {
        let profile = PidProfile::default();
        let crash = crashing_roll(&profile);

        let mut d = detector(CrashRecovery::Off);
        for n in 0..1_000 {
            assert_eq!(d.update(n * TICK_US, true, &crash), CrashState::Normal);
        }

        let mut d = detector(CrashRecovery::Beep);
        d.update(0, true, &crash);
        d.update(500_000, true, &crash);
        assert!(d.beeper_active());
        assert_eq!(d.update(501_000, false, &crash), CrashState::Normal);
        assert!(!d.beeper_active());
    }

    #[test]
    fn recovery_setpoint() {
        let d = detector(CrashRecovery::On);
        // Defaults: 10 degree recovery angle, 100 deg/s rate.
        assert_eq!(d.recovery_setpoint(5., 10.), 0.);
        assert_eq!(d.recovery_setpoint(-10., 10.), 0.);
        assert_relative_eq!(d.recovery_setpoint(15., 10.), -50.);
        assert_relative_eq!(d.recovery_setpoint(-12., 10.), 20.);
        assert_relative_eq!(d.recovery_setpoint(80., 10.), -100.);
    }
}
