// SPDX-License-Identifier: GPL-3.0-only

//! Typed wrappers around the external tools the agent drives

pub mod blockdev;
pub mod lsblk;
pub mod multipathd;
pub mod nvme;
pub mod scsi_id;
pub mod upadmin;

/// Whether `tool` can be found on `PATH`.
pub fn is_installed(tool: &str) -> bool {
    which::which(tool).is_ok()
}
