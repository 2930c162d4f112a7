// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for the LUN attachment agent
//!
//! These types are shared across the whole stack:
//!
//! - **lun-sys**: Returns these types from its typed tool wrappers
//! - **lun-core**: Resolves, verifies and tears down devices described by them
//! - **lun-agent**: Builds requests from the command line and prints results
//!
//! Device and topology values are transient. They describe what the kernel
//! reported during one call and are never cached across calls.

pub mod device;
pub mod lun;
pub mod request;
pub mod vendor;

pub use device::{DeviceInfo, DmAggregate, MultipathKind, Transport};
pub use lun::{Hctl, InvalidHctl, InvalidLunId, LunId};
pub use request::{ConnectRequest, MultipathMode, Operation, Protocol, ResizeRequest};
pub use vendor::{VLun, VendorVariant, DELETED_DISK_NAME};
