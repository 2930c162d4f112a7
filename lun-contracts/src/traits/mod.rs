// SPDX-License-Identifier: GPL-3.0-only

pub mod command;
pub mod probe;

pub use command::{CommandOutput, CommandRunner};
pub use probe::DeviceProbe;
