//! PID profiles and loop-wide config. These are the persisted, user-tunable settings; the
//! controller derives its runtime scalars from them in `init_config`.
//!
//! Field order and widths of the byte format match existing configuration tooling, so
//! don't reorder fields, and only append.

#[cfg(feature = "defmt")]
use defmt::Format;

use num_enum::TryFromPrimitive; // Enum from integer

use crate::{
    cfg_storage::ConfigError,
    filters::FilterType,
    log_macros::info,
    PidIndex, PID_ITEM_COUNT,
};

pub const PID_PROFILE_COUNT: usize = 3;

pub const MAX_PID_PROCESS_DENOM: u8 = 16;

pub const PIDSUM_LIMIT: u16 = 500;
pub const PIDSUM_LIMIT_YAW: u16 = 400;
pub const PIDSUM_LIMIT_MIN: u16 = 100;
pub const PIDSUM_LIMIT_MAX: u16 = 1_000;

/// `auto_profile_cell_count` value: never switch away from this profile automatically.
pub const AUTO_PROFILE_CELL_COUNT_STAY: i8 = 0;
/// `auto_profile_cell_count` value: use this profile for any cell count without a better match.
pub const AUTO_PROFILE_CELL_COUNT_CHANGE: i8 = -1;

// Byte sizes of the stored formats.
pub const PID_PROFILE_SIZE: usize = 125;
pub const PID_CONFIG_SIZE: usize = 5;

/// Gains for one control channel.
#[cfg_attr(feature = "defmt", derive(Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Pidf {
    pub p: u8,
    pub i: u8,
    pub d: u8,
    pub f: u16,
}

impl Pidf {
    pub const fn new(p: u8, i: u8, d: u8, f: u16) -> Self {
        Self { p, i, d, f }
    }
}

/// D-term lowpass cutoffs for one axis, in Hz. 0 disables a stage.
#[cfg_attr(feature = "defmt", derive(Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct DFilter {
    pub lpf_hz: u16,
    pub lpf2_hz: u16,
}

#[cfg_attr(feature = "defmt", derive(Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum CrashRecovery {
    Off = 0,
    On = 1,
    /// As `On`, and sound the beeper while recovering.
    Beep = 2,
}

/// The scaling strategy the downstream mixer uses.
#[cfg_attr(feature = "defmt", derive(Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum MixerImpl {
    Legacy = 0,
    Smooth = 1,
    /// Roll and pitch are mixed first; yaw gets what headroom remains.
    TwoPass = 2,
}

/// One PID profile. Several of these are stored, and one is active.
#[cfg_attr(feature = "defmt", derive(Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PidProfile {
    /// Indexed by `PidIndex`.
    pub pid: [Pidf; PID_ITEM_COUNT],
    pub direct_ff_yaw: u8,
    pub d_filter: [DFilter; 3],
    pub dterm_filter_type: FilterType,
    pub dterm_filter2_type: FilterType,
    /// Iterm accumulation is attenuated when the motor mix range rises above this percentage.
    pub iterm_windup_point_percent: u8,
    pub pid_sum_limit: u16,
    pub pid_sum_limit_yaw: u16,
    /// If false, P and D are suppressed at zero throttle.
    pub pid_at_min_throttle: bool,
    /// Max angle in angle mode, in degrees.
    pub level_angle_limit: u8,
    pub angle_expo: u8,
    /// Lowpass on the angle-mode rate setpoint, in Hz. 0 disables.
    pub angle_filter: u8,
    pub horizon_transition: u8,
    pub horizon_tilt_effect: u8,
    pub horizon_strength: u8,
    /// 100 is pure D-on-measurement; 0 is pure D-on-error.
    pub feathered_pids: u8,
    pub i_decay: u8,
    /// Iterm magnitude at which `i_decay` reaches full effect.
    pub i_decay_cutoff: u8,
    pub error_boost: u16,
    pub error_boost_yaw: u16,
    /// Percent of the raw error the error boost can add.
    pub error_boost_limit: u8,
    pub error_boost_limit_yaw: u8,
    pub dterm_boost: u16,
    pub dterm_boost_limit: u8,
    pub yaw_rate_accel_limit: u16,
    pub rate_accel_limit: u16,
    /// D-term rate of change, in deg/s per ms, above which a crash may be detected.
    pub crash_dthreshold: u16,
    /// deg/s
    pub crash_gthreshold: u16,
    /// Setpoint must be below this to detect a crash, so flips and rolls aren't interpreted as crashes.
    pub crash_setpoint_threshold: u16,
    /// ms
    pub crash_time: u16,
    /// ms
    pub crash_delay: u16,
    /// degrees
    pub crash_recovery_angle: u8,
    /// deg/s
    pub crash_recovery_rate: u8,
    pub setpoint_p_transition: [u8; 3],
    pub setpoint_i_transition: [u8; 3],
    pub setpoint_d_transition: [u8; 3],
    /// Limits yaw error and output while a crash is detected, so crashes don't cause a huge throttle increase.
    pub crash_limit_yaw: u16,
    pub iterm_limit: u16,
    pub crash_recovery: CrashRecovery,
    /// Percent. 100 adds up to 10x the filtered throttle delta.
    pub throttle_boost: u8,
    /// Hz
    pub throttle_boost_cutoff: u8,
    /// Rotates iterm to translate world errors to the local coordinate system.
    pub iterm_rotation: bool,
    pub iterm_relax_cutoff: u8,
    pub iterm_relax_cutoff_yaw: u8,
    /// deg/s of setpoint movement at which iterm accumulation stops.
    pub iterm_relax_threshold: u8,
    pub iterm_relax_threshold_yaw: u8,
    pub motor_output_limit: u8,
    /// Cell count this profile is selected for. See `AUTO_PROFILE_CELL_COUNT_STAY` and `_CHANGE`.
    pub auto_profile_cell_count: i8,
    pub emu_gravity_gain: u8,
    pub axis_lock_hz: u8,
    pub axis_lock_multiplier: u8,
    pub linear_thrust_low_output: u8,
    pub linear_thrust_high_output: u8,
    pub linear_throttle: bool,
    pub mixer_impl: MixerImpl,
    pub mixer_laziness: bool,
    pub mixer_yaw_throttle_comp: bool,
    pub dterm_abg_alpha: u16,
    pub dterm_abg_boost: u16,
    pub dterm_abg_half_life: u8,
    pub dterm_dyn_notch: bool,
    pub dterm_dyn_notch_q: u16,
}

impl Default for PidProfile {
    fn default() -> Self {
        Self {
            pid: [
                Pidf::new(45, 45, 30, 0),  // Roll
                Pidf::new(47, 50, 34, 0),  // Pitch
                Pidf::new(45, 45, 0, 0),   // Yaw
                Pidf::new(100, 0, 10, 40), // Level low
                Pidf::new(35, 0, 1, 0),    // Level high
                Pidf::new(40, 0, 0, 0),    // Mag
            ],
            direct_ff_yaw: 15,
            d_filter: [DFilter {
                lpf_hz: 100,
                lpf2_hz: 200,
            }; 3],
            dterm_filter_type: FilterType::Pt1,
            dterm_filter2_type: FilterType::Pt1,
            iterm_windup_point_percent: 85,
            pid_sum_limit: PIDSUM_LIMIT,
            pid_sum_limit_yaw: PIDSUM_LIMIT_YAW,
            pid_at_min_throttle: true,
            level_angle_limit: 45,
            angle_expo: 10,
            angle_filter: 100,
            horizon_transition: 0,
            horizon_tilt_effect: 75,
            horizon_strength: 50,
            feathered_pids: 100,
            i_decay: 4,
            i_decay_cutoff: 200,
            error_boost: 15,
            error_boost_yaw: 40,
            error_boost_limit: 20,
            error_boost_limit_yaw: 40,
            dterm_boost: 0,
            dterm_boost_limit: 0,
            yaw_rate_accel_limit: 0,
            rate_accel_limit: 0,
            crash_dthreshold: 50,
            crash_gthreshold: 400,
            crash_setpoint_threshold: 350,
            crash_time: 500,
            crash_delay: 0,
            crash_recovery_angle: 10,
            crash_recovery_rate: 100,
            setpoint_p_transition: [100; 3],
            setpoint_i_transition: [100; 3],
            setpoint_d_transition: [100; 3],
            crash_limit_yaw: 200,
            iterm_limit: 400,
            crash_recovery: CrashRecovery::Off,
            throttle_boost: 5,
            throttle_boost_cutoff: 15,
            iterm_rotation: false,
            iterm_relax_cutoff: 15,
            iterm_relax_cutoff_yaw: 3,
            iterm_relax_threshold: 40,
            iterm_relax_threshold_yaw: 35,
            motor_output_limit: 100,
            auto_profile_cell_count: AUTO_PROFILE_CELL_COUNT_STAY,
            emu_gravity_gain: 50,
            axis_lock_hz: 2,
            axis_lock_multiplier: 0,
            linear_thrust_low_output: 0,
            linear_thrust_high_output: 0,
            linear_throttle: false,
            mixer_impl: MixerImpl::Legacy,
            mixer_laziness: false,
            mixer_yaw_throttle_comp: false,
            dterm_abg_alpha: 0,
            dterm_abg_boost: 275,
            dterm_abg_half_life: 50,
            dterm_dyn_notch: false,
            dterm_dyn_notch_q: 400,
        }
    }
}

fn check(ok: bool, field: &'static str) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field })
    }
}

/// Little-endian cursor over a byte buffer. Bounds are checked once by the caller.
struct Writer<'a> {
    buf: &'a mut [u8],
    i: usize,
}

impl Writer<'_> {
    fn u8(&mut self, v: u8) {
        self.buf[self.i] = v;
        self.i += 1;
    }

    fn u16(&mut self, v: u16) {
        self.buf[self.i..self.i + 2].clone_from_slice(&v.to_le_bytes());
        self.i += 2;
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    i: usize,
}

impl Reader<'_> {
    fn u8(&mut self) -> u8 {
        let result = self.buf[self.i];
        self.i += 1;
        result
    }

    fn u16(&mut self) -> u16 {
        let result = u16::from_le_bytes([self.buf[self.i], self.buf[self.i + 1]]);
        self.i += 2;
        result
    }

    fn bool(&mut self) -> bool {
        self.u8() != 0
    }

    fn filter_type(&mut self, field: &'static str) -> Result<FilterType, ConfigError> {
        FilterType::try_from(self.u8()).map_err(|_| ConfigError::InvalidEnum { field })
    }
}

impl PidProfile {
    pub fn gains(&self, index: PidIndex) -> Pidf {
        self.pid[index.index()]
    }

    /// Range checks, run when a profile is loaded or edited. The controller assumes
    /// a validated profile.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sum_range = PIDSUM_LIMIT_MIN..=PIDSUM_LIMIT_MAX;

        check(sum_range.contains(&self.pid_sum_limit), "pid_sum_limit")?;
        check(sum_range.contains(&self.pid_sum_limit_yaw), "pid_sum_limit_yaw")?;
        check(self.iterm_windup_point_percent <= 100, "iterm_windup_point_percent")?;
        check(self.iterm_limit > 0, "iterm_limit")?;
        check(
            (10..=90).contains(&self.level_angle_limit),
            "level_angle_limit",
        )?;
        check(self.angle_expo <= 100, "angle_expo")?;
        check(self.horizon_strength <= 100, "horizon_strength")?;
        check(self.horizon_tilt_effect <= 250, "horizon_tilt_effect")?;
        check(self.feathered_pids <= 100, "feathered_pids")?;
        check(self.throttle_boost <= 100, "throttle_boost")?;
        check(
            (1..=100).contains(&self.motor_output_limit),
            "motor_output_limit",
        )?;
        check(self.linear_thrust_low_output <= 100, "linear_thrust_low_output")?;
        check(
            self.linear_thrust_high_output <= 100,
            "linear_thrust_high_output",
        )?;
        check(
            (AUTO_PROFILE_CELL_COUNT_CHANGE..=8).contains(&self.auto_profile_cell_count),
            "auto_profile_cell_count",
        )?;
        check(self.dterm_abg_alpha <= 1_000, "dterm_abg_alpha")?;
        check(
            !self.dterm_dyn_notch || self.dterm_dyn_notch_q > 0,
            "dterm_dyn_notch_q",
        )?;

        Ok(())
    }

    /// Serialize to the stored byte format.
    pub fn to_bytes(&self) -> [u8; PID_PROFILE_SIZE] {
        let mut result = [0; PID_PROFILE_SIZE];
        let mut w = Writer {
            buf: &mut result,
            i: 0,
        };

        for gains in &self.pid {
            w.u8(gains.p);
            w.u8(gains.i);
            w.u8(gains.d);
            w.u16(gains.f);
        }
        w.u8(self.direct_ff_yaw);
        for f in &self.d_filter {
            w.u16(f.lpf_hz);
            w.u16(f.lpf2_hz);
        }
        w.u8(self.dterm_filter_type as u8);
        w.u8(self.dterm_filter2_type as u8);
        w.u8(self.iterm_windup_point_percent);
        w.u16(self.pid_sum_limit);
        w.u16(self.pid_sum_limit_yaw);
        w.u8(self.pid_at_min_throttle as u8);
        w.u8(self.level_angle_limit);
        w.u8(self.angle_expo);
        w.u8(self.angle_filter);
        w.u8(self.horizon_transition);
        w.u8(self.horizon_tilt_effect);
        w.u8(self.horizon_strength);
        w.u8(self.feathered_pids);
        w.u8(self.i_decay);
        w.u8(self.i_decay_cutoff);
        w.u16(self.error_boost);
        w.u16(self.error_boost_yaw);
        w.u8(self.error_boost_limit);
        w.u8(self.error_boost_limit_yaw);
        w.u16(self.dterm_boost);
        w.u8(self.dterm_boost_limit);
        w.u16(self.yaw_rate_accel_limit);
        w.u16(self.rate_accel_limit);
        w.u16(self.crash_dthreshold);
        w.u16(self.crash_gthreshold);
        w.u16(self.crash_setpoint_threshold);
        w.u16(self.crash_time);
        w.u16(self.crash_delay);
        w.u8(self.crash_recovery_angle);
        w.u8(self.crash_recovery_rate);
        for t in [
            &self.setpoint_p_transition,
            &self.setpoint_i_transition,
            &self.setpoint_d_transition,
        ] {
            for v in t {
                w.u8(*v);
            }
        }
        w.u16(self.crash_limit_yaw);
        w.u16(self.iterm_limit);
        w.u8(self.crash_recovery as u8);
        w.u8(self.throttle_boost);
        w.u8(self.throttle_boost_cutoff);
        w.u8(self.iterm_rotation as u8);
        w.u8(self.iterm_relax_cutoff);
        w.u8(self.iterm_relax_cutoff_yaw);
        w.u8(self.iterm_relax_threshold);
        w.u8(self.iterm_relax_threshold_yaw);
        w.u8(self.motor_output_limit);
        w.u8(self.auto_profile_cell_count as u8);
        w.u8(self.emu_gravity_gain);
        w.u8(self.axis_lock_hz);
        w.u8(self.axis_lock_multiplier);
        w.u8(self.linear_thrust_low_output);
        w.u8(self.linear_thrust_high_output);
        w.u8(self.linear_throttle as u8);
        w.u8(self.mixer_impl as u8);
        w.u8(self.mixer_laziness as u8);
        w.u8(self.mixer_yaw_throttle_comp as u8);
        w.u16(self.dterm_abg_alpha);
        w.u16(self.dterm_abg_boost);
        w.u8(self.dterm_abg_half_life);
        w.u8(self.dterm_dyn_notch as u8);
        w.u16(self.dterm_dyn_notch_q);

        debug_assert_eq!(w.i, PID_PROFILE_SIZE);

        result
    }

    /// Deserialize from the stored byte format. Enum fields are checked; ranges are not.
    /// (Run `validate` for that.)
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ConfigError> {
        if buf.len() < PID_PROFILE_SIZE {
            return Err(ConfigError::BufferTooSmall);
        }
        let mut r = Reader { buf, i: 0 };

        let mut pid = [Pidf::default(); PID_ITEM_COUNT];
        for gains in &mut pid {
            *gains = Pidf::new(r.u8(), r.u8(), r.u8(), r.u16());
        }
        let direct_ff_yaw = r.u8();
        let mut d_filter = [DFilter::default(); 3];
        for f in &mut d_filter {
            f.lpf_hz = r.u16();
            f.lpf2_hz = r.u16();
        }

        Ok(Self {
            pid,
            direct_ff_yaw,
            d_filter,
            dterm_filter_type: r.filter_type("dterm_filter_type")?,
            dterm_filter2_type: r.filter_type("dterm_filter2_type")?,
            iterm_windup_point_percent: r.u8(),
            pid_sum_limit: r.u16(),
            pid_sum_limit_yaw: r.u16(),
            pid_at_min_throttle: r.bool(),
            level_angle_limit: r.u8(),
            angle_expo: r.u8(),
            angle_filter: r.u8(),
            horizon_transition: r.u8(),
            horizon_tilt_effect: r.u8(),
            horizon_strength: r.u8(),
            feathered_pids: r.u8(),
            i_decay: r.u8(),
            i_decay_cutoff: r.u8(),
            error_boost: r.u16(),
            error_boost_yaw: r.u16(),
            error_boost_limit: r.u8(),
            error_boost_limit_yaw: r.u8(),
            dterm_boost: r.u16(),
            dterm_boost_limit: r.u8(),
            yaw_rate_accel_limit: r.u16(),
            rate_accel_limit: r.u16(),
            crash_dthreshold: r.u16(),
            crash_gthreshold: r.u16(),
            crash_setpoint_threshold: r.u16(),
            crash_time: r.u16(),
            crash_delay: r.u16(),
            crash_recovery_angle: r.u8(),
            crash_recovery_rate: r.u8(),
            setpoint_p_transition: [r.u8(), r.u8(), r.u8()],
            setpoint_i_transition: [r.u8(), r.u8(), r.u8()],
            setpoint_d_transition: [r.u8(), r.u8(), r.u8()],
            crash_limit_yaw: r.u16(),
            iterm_limit: r.u16(),
            crash_recovery: CrashRecovery::try_from(r.u8()).map_err(|_| {
                ConfigError::InvalidEnum {
                    field: "crash_recovery",
                }
            })?,
            throttle_boost: r.u8(),
            throttle_boost_cutoff: r.u8(),
            iterm_rotation: r.bool(),
            iterm_relax_cutoff: r.u8(),
            iterm_relax_cutoff_yaw: r.u8(),
            iterm_relax_threshold: r.u8(),
            iterm_relax_threshold_yaw: r.u8(),
            motor_output_limit: r.u8(),
            auto_profile_cell_count: r.u8() as i8,
            emu_gravity_gain: r.u8(),
            axis_lock_hz: r.u8(),
            axis_lock_multiplier: r.u8(),
            linear_thrust_low_output: r.u8(),
            linear_thrust_high_output: r.u8(),
            linear_throttle: r.bool(),
            mixer_impl: MixerImpl::try_from(r.u8()).map_err(|_| ConfigError::InvalidEnum {
                field: "mixer_impl",
            })?,
            mixer_laziness: r.bool(),
            mixer_yaw_throttle_comp: r.bool(),
            dterm_abg_alpha: r.u16(),
            dterm_abg_boost: r.u16(),
            dterm_abg_half_life: r.u8(),
            dterm_dyn_notch: r.bool(),
            dterm_dyn_notch_q: r.u16(),
        })
    }
}

/// Loop-wide settings. Read at init; not changed in flight.
#[cfg_attr(feature = "defmt", derive(Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PidConfig {
    /// The PID loop runs once per this many gyro samples.
    pub pid_process_denom: u8,
    pub runaway_takeoff_prevention: bool,
    /// ms
    pub runaway_takeoff_deactivate_delay: u16,
    /// Percent
    pub runaway_takeoff_deactivate_throttle: u8,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            pid_process_denom: 1,
            runaway_takeoff_prevention: true,
            runaway_takeoff_deactivate_delay: 500,
            runaway_takeoff_deactivate_throttle: 20,
        }
    }
}

impl PidConfig {
    /// PID loop period, in µs, from the gyro sample period.
    pub fn pid_looptime_us(&self, gyro_looptime_us: u32) -> u32 {
        gyro_looptime_us * self.pid_process_denom.clamp(1, MAX_PID_PROCESS_DENOM) as u32
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check(
            (1..=MAX_PID_PROCESS_DENOM).contains(&self.pid_process_denom),
            "pid_process_denom",
        )?;
        check(
            self.runaway_takeoff_deactivate_throttle <= 100,
            "runaway_takeoff_deactivate_throttle",
        )
    }

    pub fn to_bytes(&self) -> [u8; PID_CONFIG_SIZE] {
        let mut result = [0; PID_CONFIG_SIZE];

        result[0] = self.pid_process_denom;
        result[1] = self.runaway_takeoff_prevention as u8;
        result[2..4].clone_from_slice(&self.runaway_takeoff_deactivate_delay.to_le_bytes());
        result[4] = self.runaway_takeoff_deactivate_throttle;

        result
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, ConfigError> {
        if buf.len() < PID_CONFIG_SIZE {
            return Err(ConfigError::BufferTooSmall);
        }

        Ok(Self {
            pid_process_denom: buf[0],
            runaway_takeoff_prevention: buf[1] != 0,
            runaway_takeoff_deactivate_delay: u16::from_le_bytes([buf[2], buf[3]]),
            runaway_takeoff_deactivate_throttle: buf[4],
        })
    }
}

/// All stored profiles, and which one is active.
#[derive(Clone, Debug, PartialEq)]
pub struct PidProfiles {
    profiles: [PidProfile; PID_PROFILE_COUNT],
    active: usize,
}

impl Default for PidProfiles {
    fn default() -> Self {
        Self {
            profiles: [PidProfile::default(); PID_PROFILE_COUNT],
            active: 0,
        }
    }
}

impl PidProfiles {
    pub fn new(profiles: [PidProfile; PID_PROFILE_COUNT]) -> Self {
        Self {
            profiles,
            active: 0,
        }
    }

    pub fn active(&self) -> &PidProfile {
        &self.profiles[self.active]
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn get(&self, index: usize) -> Option<&PidProfile> {
        self.profiles.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut PidProfile> {
        self.profiles.get_mut(index)
    }

    pub fn all(&self) -> &[PidProfile; PID_PROFILE_COUNT] {
        &self.profiles
    }

    pub fn set_active(&mut self, index: usize) -> Result<(), ConfigError> {
        if index >= PID_PROFILE_COUNT {
            return Err(ConfigError::ProfileIndex);
        }
        self.active = index;
        Ok(())
    }

    /// Copy the whole of profile `src` over profile `dst`. An out-of-range index is a caller
    /// bug: it panics in debug builds, and is rejected without modifying anything in release.
    pub fn copy(&mut self, dst: usize, src: usize) -> Result<(), ConfigError> {
        debug_assert!(dst < PID_PROFILE_COUNT && src < PID_PROFILE_COUNT);

        if dst >= PID_PROFILE_COUNT || src >= PID_PROFILE_COUNT {
            return Err(ConfigError::ProfileIndex);
        }

        if dst != src {
            self.profiles[dst] = self.profiles[src];
            info!("Copied PID profile {} to {}", src, dst);
        }
        Ok(())
    }

    /// Switch profiles based on battery cell count. Returns the new active index if it changed.
    ///
    /// The active profile is kept if it matches the cell count, or is set to
    /// `AUTO_PROFILE_CELL_COUNT_STAY`. Otherwise the first other profile matching the cell count
    /// is chosen, falling back to the first set to `AUTO_PROFILE_CELL_COUNT_CHANGE`.
    pub fn select_for_cell_count(&mut self, cell_count: u8) -> Option<usize> {
        let current = self.active().auto_profile_cell_count;
        if current == AUTO_PROFILE_CELL_COUNT_STAY || current as i16 == cell_count as i16 {
            return None;
        }

        let mut matching = None;
        let mut i = (self.active + 1) % PID_PROFILE_COUNT;

        while i != self.active {
            let count = self.profiles[i].auto_profile_cell_count;
            if count as i16 == cell_count as i16 {
                matching = Some(i);
                break;
            } else if matching.is_none() && count == AUTO_PROFILE_CELL_COUNT_CHANGE {
                matching = Some(i);
            }
            i = (i + 1) % PID_PROFILE_COUNT;
        }

        if let Some(i) = matching {
            self.active = i;
            info!("Selected PID profile {} for {} cells", i, cell_count);
        }
        matching
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuned_profile() -> PidProfile {
        PidProfile {
            pid: [
                Pidf::new(52, 61, 33, 120),
                Pidf::new(55, 66, 36, 130),
                Pidf::new(50, 70, 2, 90),
                Pidf::new(90, 5, 12, 44),
                Pidf::new(30, 3, 2, 7),
                Pidf::new(41, 0, 0, 0),
            ],
            d_filter: [
                DFilter {
                    lpf_hz: 110,
                    lpf2_hz: 220,
                },
                DFilter {
                    lpf_hz: 120,
                    lpf2_hz: 0,
                },
                DFilter {
                    lpf_hz: 90,
                    lpf2_hz: 300,
                },
            ],
            dterm_filter2_type: FilterType::Biquad,
            pid_sum_limit_yaw: 333,
            setpoint_i_transition: [80, 90, 110],
            crash_recovery: CrashRecovery::Beep,
            auto_profile_cell_count: -1,
            mixer_impl: MixerImpl::TwoPass,
            mixer_yaw_throttle_comp: true,
            dterm_abg_alpha: 600,
            dterm_dyn_notch_q: 0x1234,
            ..Default::default()
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(PidProfile::default().validate().is_ok());
        assert!(PidConfig::default().validate().is_ok());
        assert!(tuned_profile().validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range() {
        let mut p = PidProfile::default();
        p.pid_sum_limit = 50;
        assert_eq!(
            p.validate(),
            Err(ConfigError::OutOfRange {
                field: "pid_sum_limit"
            })
        );

        let mut p = PidProfile::default();
        p.iterm_windup_point_percent = 101;
        assert!(p.validate().is_err());

        let mut c = PidConfig::default();
        c.pid_process_denom = MAX_PID_PROCESS_DENOM + 1;
        assert!(c.validate().is_err());
    }

    #[test]
    fn byte_layout() {
        let p = tuned_profile();
        let bytes = p.to_bytes();

        // Roll gains lead, with a little-endian u16 F.
        assert_eq!(&bytes[0..5], &[52, 61, 33, 120, 0]);
        assert_eq!(bytes[30], p.direct_ff_yaw);
        // First D filter: 110, 220
        assert_eq!(&bytes[31..35], &[110, 0, 220, 0]);
        // Dyn notch Q is the last field.
        assert_eq!(&bytes[PID_PROFILE_SIZE - 2..], &[0x34, 0x12]);

        assert_eq!(PidProfile::from_bytes(&bytes), Ok(p));
    }

    #[test]
    fn profile_record_is_packed() {
        // 67 one-byte fields and 29 two-byte fields, no padding.
        assert_eq!(PID_PROFILE_SIZE, 67 + 29 * 2);
        assert_eq!(PidProfile::default().to_bytes().len(), PID_PROFILE_SIZE);

        // A record of exactly this length decodes; one byte less doesn't.
        let p = tuned_profile();
        let buf: [u8; 125] = p.to_bytes();
        assert_eq!(PidProfile::from_bytes(&buf), Ok(p));
        assert_eq!(
            PidProfile::from_bytes(&buf[..124]),
            Err(ConfigError::BufferTooSmall)
        );

        // The trailing ABG and dyn notch fields take the last 8 bytes.
        assert_eq!(&buf[117..119], &p.dterm_abg_alpha.to_le_bytes());
        assert_eq!(buf[122], p.dterm_dyn_notch as u8);
    }

    #[test]
    fn decode_rejects_bad_enums_and_short_buffers() {
        let mut bytes = PidProfile::default().to_bytes();
        bytes[43] = 7; // dterm_filter_type
        assert_eq!(
            PidProfile::from_bytes(&bytes),
            Err(ConfigError::InvalidEnum {
                field: "dterm_filter_type"
            })
        );

        assert_eq!(
            PidProfile::from_bytes(&bytes[..20]),
            Err(ConfigError::BufferTooSmall)
        );
        assert_eq!(
            PidConfig::from_bytes(&[1, 1]),
            Err(ConfigError::BufferTooSmall)
        );
    }

    #[test]
    fn pid_config_bytes() {
        let c = PidConfig {
            pid_process_denom: 2,
            runaway_takeoff_prevention: false,
            runaway_takeoff_deactivate_delay: 750,
            runaway_takeoff_deactivate_throttle: 25,
        };
        assert_eq!(c.to_bytes(), [2, 0, 0xee, 0x02, 25]);
        assert_eq!(PidConfig::from_bytes(&c.to_bytes()), Ok(c));
        assert_eq!(c.pid_looptime_us(125), 250);
    }

    #[test]
    fn copy_is_exact_and_leaves_source() {
        let mut profiles = PidProfiles::default();
        *profiles.get_mut(0).unwrap() = tuned_profile();
        let before = *profiles.get(0).unwrap();

        profiles.copy(2, 0).unwrap();

        assert_eq!(profiles.get(2), Some(&before));
        assert_eq!(profiles.get(0), Some(&before));
        // Untouched slot keeps its contents.
        assert_eq!(profiles.get(1), Some(&PidProfile::default()));
    }

    #[test]
    fn copy_onto_itself_is_noop() {
        let mut profiles = PidProfiles::default();
        *profiles.get_mut(1).unwrap() = tuned_profile();
        profiles.copy(1, 1).unwrap();
        assert_eq!(profiles.get(1), Some(&tuned_profile()));
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn copy_rejects_bad_index() {
        let mut profiles = PidProfiles::default();
        let before = profiles.clone();
        assert_eq!(
            profiles.copy(PID_PROFILE_COUNT, 0),
            Err(ConfigError::ProfileIndex)
        );
        assert_eq!(profiles, before);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn copy_bad_index_panics_in_debug() {
        let mut profiles = PidProfiles::default();
        let _ = profiles.copy(0, PID_PROFILE_COUNT);
    }

    #[test]
    fn auto_select_by_cell_count() {
        let mut profiles = PidProfiles::default();
        profiles.get_mut(0).unwrap().auto_profile_cell_count = 4;
        profiles.get_mut(1).unwrap().auto_profile_cell_count = AUTO_PROFILE_CELL_COUNT_CHANGE;
        profiles.get_mut(2).unwrap().auto_profile_cell_count = 6;

        // Already matches
        assert_eq!(profiles.select_for_cell_count(4), None);

        assert_eq!(profiles.select_for_cell_count(6), Some(2));
        assert_eq!(profiles.active_index(), 2);

        // No match for 3 cells; fall back to the "change" profile.
        assert_eq!(profiles.select_for_cell_count(3), Some(1));

        // A "stay" profile is never switched away from.
        profiles.get_mut(1).unwrap().auto_profile_cell_count = AUTO_PROFILE_CELL_COUNT_STAY;
        assert_eq!(profiles.select_for_cell_count(4), None);
        assert_eq!(profiles.active_index(), 1);
    }
}
