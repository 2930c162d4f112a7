// SPDX-License-Identifier: GPL-3.0-only

pub mod protocol;
pub mod traits;

pub use protocol::{ConnectorError, ErrorKind, Result};
pub use traits::{CommandOutput, CommandRunner, DeviceProbe};
