// SPDX-License-Identifier: GPL-3.0-only

//! Low-level host access for the LUN attachment agent
//!
//! This crate implements the ports defined in `lun-contracts` against the
//! real host, and wraps every external tool the agent relies on:
//! - `multipathd` / `multipath` for device-mapper multipath maps
//! - `upadmin` / `upadmin_plus` for UltraPath virtual LUNs
//! - `nvme`, `blockdev`, `lsblk` and `scsi_id` for per-device queries
//!
//! Each wrapper returns a parsed, typed value so the parsing can be tested
//! without running the tool. Unexpected output shapes are parse errors.
//!
//! These operations require root and should only be called from the agent.

pub mod paths;
pub mod probe;
pub mod runner;
pub mod tools;

pub use probe::SysfsProbe;
pub use runner::HostCommandRunner;
