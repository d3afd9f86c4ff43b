//! This code contains safety-related code: runaway takeoff prevention, and the idle-throttle
//! threshold used to gate P, D and F at minimum throttle.

#[cfg(feature = "defmt")]
use defmt::Format;

use num_traits::Float; // abs on float.

use crate::{
    log_macros::{info, warn},
    profile::PidConfig,
    util::{elapsed_us, pct},
    AXIS_COUNT,
};

// Throttle at or below this is treated as idle.
pub const THROTTLE_IDLE: f32 = 0.005;

// An unclamped PID sum at least this large, with the craft rotating, indicates the loop is
// fighting something it can't correct, eg wrong motor order or direction.
pub const RUNAWAY_TAKEOFF_PIDSUM_THRESHOLD: f32 = 600.;
// Gyro rates, deg/s, that must also be exceeded. Roll and pitch, then yaw.
pub const RUNAWAY_TAKEOFF_GYRO_LIMIT_RP: f32 = 15.;
pub const RUNAWAY_TAKEOFF_GYRO_LIMIT_YAW: f32 = 50.;
// The condition must hold this long before triggering.
pub const RUNAWAY_TAKEOFF_ACTIVATE_DELAY_US: u32 = 75_000;
// Sums must be below this for flight time to count towards deactivation.
pub const RUNAWAY_TAKEOFF_DEACTIVATE_PIDSUM_LIMIT: f32 = 100.;

#[cfg_attr(feature = "defmt", derive(Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RunawayStatus {
    /// Prevention is turned off in config.
    Disabled,
    /// Armed, or waiting to arm, and watching.
    Monitoring,
    /// A runaway was detected. The caller should disarm.
    Triggered,
    /// Enough normal flight has passed that the check is off until the next arm.
    Deactivated,
}

/// Detects a craft that takes off and tumbles right after arming. Reset on disarm.
#[derive(Clone, Debug)]
pub struct RunawayTakeoff {
    enabled: bool,
    deactivate_delay_us: u32,
    deactivate_throttle: f32,
    status: RunawayStatus,
    /// When the runaway condition was first seen, if it's currently present.
    condition_since: Option<u32>,
    /// Time spent in normal flight, towards deactivation.
    flight_time_us: u32,
    last_update: Option<u32>,
}

impl RunawayTakeoff {
    pub fn new(cfg: &PidConfig) -> Self {
        let mut result = Self {
            enabled: false,
            deactivate_delay_us: 0,
            deactivate_throttle: 0.,
            status: RunawayStatus::Disabled,
            condition_since: None,
            flight_time_us: 0,
            last_update: None,
        };
        result.configure(cfg);
        result
    }

    pub fn configure(&mut self, cfg: &PidConfig) {
        self.enabled = cfg.runaway_takeoff_prevention;
        self.deactivate_delay_us = cfg.runaway_takeoff_deactivate_delay as u32 * 1_000;
        self.deactivate_throttle = pct(cfg.runaway_takeoff_deactivate_throttle);
        self.reset();
    }

    fn runaway_condition(sums: &[f32; AXIS_COUNT], gyro: &[f32; AXIS_COUNT]) -> bool {
        (0..AXIS_COUNT).any(|i| {
            let gyro_limit = if i == AXIS_COUNT - 1 {
                RUNAWAY_TAKEOFF_GYRO_LIMIT_YAW
            } else {
                RUNAWAY_TAKEOFF_GYRO_LIMIT_RP
            };
            sums[i].abs() >= RUNAWAY_TAKEOFF_PIDSUM_THRESHOLD && gyro[i].abs() > gyro_limit
        })
    }

    /// Run once per tick with the unclamped PID sums. Returns the new status.
    pub fn update(
        &mut self,
        now_us: u32,
        armed: bool,
        throttle: f32,
        sums: &[f32; AXIS_COUNT],
        gyro: &[f32; AXIS_COUNT],
    ) -> RunawayStatus {
        if !self.enabled {
            return self.status;
        }
        if !armed {
            self.reset();
            return self.status;
        }
        if self.status != RunawayStatus::Monitoring {
            // Triggered and deactivated are held until disarm.
            return self.status;
        }

        let dt_us = match self.last_update {
            Some(last) => elapsed_us(now_us, last),
            None => 0,
        };
        self.last_update = Some(now_us);

        let settled = sums
            .iter()
            .all(|s| s.abs() < RUNAWAY_TAKEOFF_DEACTIVATE_PIDSUM_LIMIT);

        if throttle >= self.deactivate_throttle && settled {
            self.flight_time_us = self.flight_time_us.saturating_add(dt_us);
            if self.flight_time_us >= self.deactivate_delay_us {
                info!("Runaway takeoff prevention deactivated");
                self.status = RunawayStatus::Deactivated;
                return self.status;
            }
        }

        if Self::runaway_condition(sums, gyro) {
            match self.condition_since {
                Some(since) => {
                    if elapsed_us(now_us, since) >= RUNAWAY_TAKEOFF_ACTIVATE_DELAY_US {
                        warn!("Runaway takeoff detected");
                        self.status = RunawayStatus::Triggered;
                    }
                }
                None => self.condition_since = Some(now_us),
            }
        } else {
            self.condition_since = None;
        }

        self.status
    }

    pub fn status(&self) -> RunawayStatus {
        self.status
    }

    pub fn is_triggered(&self) -> bool {
        self.status == RunawayStatus::Triggered
    }

    pub fn reset(&mut self) {
        self.status = if self.enabled {
            RunawayStatus::Monitoring
        } else {
            RunawayStatus::Disabled
        };
        self.condition_since = None;
        self.flight_time_us = 0;
        self.last_update = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK_US: u32 = 1_000;
    const HIGH_SUMS: [f32; 3] = [700., 0., 0.];
    const SPINNING: [f32; 3] = [200., 0., 0.];

    fn monitor() -> RunawayTakeoff {
        RunawayTakeoff::new(&PidConfig::default())
    }

    #[test]
    fn triggers_after_delay() {
        let mut r = monitor();
        assert_eq!(r.status(), RunawayStatus::Monitoring);

        let mut now = 0;
        for _ in 0..75 {
            assert_eq!(
                r.update(now, true, 0.1, &HIGH_SUMS, &SPINNING),
                RunawayStatus::Monitoring
            );
            now += TICK_US;
        }
        assert_eq!(
            r.update(now, true, 0.1, &HIGH_SUMS, &SPINNING),
            RunawayStatus::Triggered
        );
        assert!(r.is_triggered());

        // Held until disarm.
        assert_eq!(
            r.update(now + TICK_US, true, 0.1, &[0.; 3], &[0.; 3]),
            RunawayStatus::Triggered
        );
        assert_eq!(
            r.update(now + 2 * TICK_US, false, 0., &[0.; 3], &[0.; 3]),
            RunawayStatus::Monitoring
        );
    }

    #[test]
    fn needs_rotation() {
        let mut r = monitor();
        // Large sums with the craft still, eg on the ground against a wall.
        for n in 0..500 {
            let status = r.update(n * TICK_US, true, 0.1, &[-900., 900., 900.], &[10., 10., 40.]);
            assert_eq!(status, RunawayStatus::Monitoring);
        }
    }

    #[test]
    fn interrupted_condition_restarts_timer() {
        let mut r = monitor();
        let mut now = 0;
        for _ in 0..50 {
            r.update(now, true, 0.1, &HIGH_SUMS, &SPINNING);
            now += TICK_US;
        }
        r.update(now, true, 0.1, &[0.; 3], &SPINNING);
        for _ in 0..50 {
            now += TICK_US;
            assert_eq!(
                r.update(now, true, 0.1, &HIGH_SUMS, &SPINNING),
                RunawayStatus::Monitoring
            );
        }
    }

    #[test]
    fn deactivates_after_normal_flight() {
        let mut r = monitor();
        // Defaults: 20% throttle for 500 ms.
        let mut now = 0;
        for _ in 0..500 {
            assert_eq!(
                r.update(now, true, 0.5, &[20., -20., 5.], &[0.; 3]),
                RunawayStatus::Monitoring
            );
            now += TICK_US;
        }
        assert_eq!(
            r.update(now, true, 0.5, &[20., -20., 5.], &[0.; 3]),
            RunawayStatus::Deactivated
        );
        // No longer watching.
        for _ in 0..200 {
            now += TICK_US;
            r.update(now, true, 0.5, &HIGH_SUMS, &SPINNING);
        }
        assert_eq!(r.status(), RunawayStatus::Deactivated);
    }

    #[test]
    fn disabled() {
        let cfg = PidConfig {
            runaway_takeoff_prevention: false,
            ..Default::default()
        };
        let mut r = RunawayTakeoff::new(&cfg);
        for n in 0..200 {
            assert_eq!(
                r.update(n * TICK_US, true, 0.1, &HIGH_SUMS, &SPINNING),
                RunawayStatus::Disabled
            );
        }
    }
}
