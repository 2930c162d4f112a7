// SPDX-License-Identifier: GPL-3.0-only

//! Block device models produced during topology scans

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::LunId;

/// Multipathing technology that owns a device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultipathKind {
    /// Plain `sd`/`nvme` device with no aggregation on top
    None,
    /// Linux device-mapper multipath map (`dm-N`)
    DmMultipath,
    /// UltraPath virtual disk presented as an `sd` device
    VendorMultipathScsi,
    /// UltraPath-NVMe virtual disk (`ultrapathX`)
    VendorMultipathNvme,
}

impl MultipathKind {
    /// Virtual devices aggregate physical paths; only one may exist per LUN.
    pub fn is_virtual(self) -> bool {
        !matches!(self, MultipathKind::None)
    }

    pub fn is_vendor(self) -> bool {
        matches!(
            self,
            MultipathKind::VendorMultipathScsi | MultipathKind::VendorMultipathNvme
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MultipathKind::None => "none",
            MultipathKind::DmMultipath => "dm-multipath",
            MultipathKind::VendorMultipathScsi => "ultrapath-scsi",
            MultipathKind::VendorMultipathNvme => "ultrapath-nvme",
        }
    }
}

impl fmt::Display for MultipathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport family of a physical path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Scsi,
    Nvme,
}

/// One resolved device for a LUN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Kernel name (e.g., "sdb", "dm-2", "ultrapathh")
    pub device_name: String,

    /// Device node path (e.g., "/dev/dm-2")
    pub full_path: String,

    pub lun_wwn: LunId,

    pub multipath_kind: MultipathKind,
}

impl DeviceInfo {
    pub fn new(device_name: impl Into<String>, lun_wwn: LunId, kind: MultipathKind) -> Self {
        let device_name = device_name.into();
        Self {
            full_path: format!("/dev/{device_name}"),
            device_name,
            lun_wwn,
            multipath_kind: kind,
        }
    }
}

/// Device-mapper multipath map as reported by `multipathd show maps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmAggregate {
    /// Map alias (e.g., "mpatha")
    pub name: String,

    /// Kernel name of the map (e.g., "dm-2")
    pub sysfs_id: String,

    /// WWID reported by multipathd (usually "3" + LUN WWN)
    pub wwid: String,

    /// Physical paths currently listed under `/sys/block/<dm>/slaves`
    pub members: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_none_is_physical() {
        assert!(!MultipathKind::None.is_virtual());
        assert!(MultipathKind::DmMultipath.is_virtual());
        assert!(MultipathKind::VendorMultipathNvme.is_vendor());
        assert!(!MultipathKind::DmMultipath.is_vendor());
    }

    #[test]
    fn device_info_builds_dev_path() {
        let lun = LunId::new("7100e98b03").expect("lun id");
        let info = DeviceInfo::new("dm-2", lun, MultipathKind::DmMultipath);
        assert_eq!(info.full_path, "/dev/dm-2");
    }
}
