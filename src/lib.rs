//! Rate and attitude stabilization core for multirotor flight controllers.
//!
//! Takes gyro rates, attitude and pilot setpoints each control-loop tick, and produces bounded
//! per-axis PID outputs for a motor mixer. Descends from the Betaflight / EmuFlight PID loop.
//!
//! Entry point is [`flight_ctrls::pid::PidController`]. It owns all filter, integrator and crash
//! state; there are no globals. Configuration is a [`profile::PidProfile`] (plus [`profile::PidConfig`]
//! for loop-wide settings), which can be persisted through [`cfg_storage::ConfigStore`].
//!
//! [Some info on the PID terms, focused on BF](https://gist.github.com/exocode/90339d7f946ad5f83dd1cf29bf5df0dc)

#![no_std]

pub mod cfg_storage;
pub mod filters;
pub mod flight_ctrls;
pub mod profile;
pub mod safety;
pub mod util;

pub use flight_ctrls::pid::{AxisOutput, PidController, RollPitchTrims, TickInput, TickOutput};
pub use profile::{PidConfig, PidProfile, PidProfiles};

use cfg_if::cfg_if;

#[cfg(feature = "defmt")]
use defmt::Format;

use num_enum::TryFromPrimitive; // Enum from integer

/// Log macros. `defmt` on-target, or the `log` facade otherwise.
pub(crate) mod log_macros {
    use super::cfg_if;

    cfg_if! {
        if #[cfg(feature = "defmt")] {
            pub(crate) use defmt::{debug, info, warn};
        } else {
            pub(crate) use log::{debug, info, warn};
        }
    }
}

/// The three rate axes. Used to index per-axis controller state.
#[cfg_attr(feature = "defmt", derive(Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum Axis {
    Roll = 0,
    Pitch = 1,
    Yaw = 2,
}

impl Axis {
    pub const ALL: [Self; 3] = [Self::Roll, Self::Pitch, Self::Yaw];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// The gain channel that governs this rate axis.
    pub const fn pid_index(self) -> PidIndex {
        match self {
            Self::Roll => PidIndex::Roll,
            Self::Pitch => PidIndex::Pitch,
            Self::Yaw => PidIndex::Yaw,
        }
    }
}

/// The six gain channels stored in a profile.
#[cfg_attr(feature = "defmt", derive(Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum PidIndex {
    Roll = 0,
    Pitch = 1,
    Yaw = 2,
    /// Angle-mode gains used near level.
    LevelLow = 3,
    /// Angle-mode gains used near the angle limit.
    LevelHigh = 4,
    /// Heading hold
    Mag = 5,
}

impl PidIndex {
    pub const fn index(self) -> usize {
        self as usize
    }
}

pub const PID_ITEM_COUNT: usize = 6;
pub const AXIS_COUNT: usize = 3;
