//! This module contains code related to flight controls. The per-tick loop is in `pid`; the
//! stages it runs on each axis are in their own modules.
//!
//! [Betaflight Signal flow diagram](https://github.com/betaflight/betaflight/wiki/Signal-Flow-Diagram)
//! Note that this is just an example, and isn't necesssarily something to emulate.

pub mod boost;
pub mod crash;
pub mod iterm;
pub mod level;
pub mod mixer;
pub mod pid;
mod pid_init;
pub mod setpoint;
pub mod throttle;
