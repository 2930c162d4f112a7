// SPDX-License-Identifier: GPL-3.0-only

//! UltraPath (vendor multipath) models

use serde::{Deserialize, Serialize};

use crate::LunId;

/// Disk column value of a VLun whose virtual disk is gone but whose paths remain.
pub const DELETED_DISK_NAME: &str = "deleted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorVariant {
    Scsi,
    Nvme,
}

impl VendorVariant {
    /// Management CLI shipped with this flavour of UltraPath.
    pub fn cli(self) -> &'static str {
        match self {
            VendorVariant::Scsi => "upadmin",
            VendorVariant::Nvme => "upadmin_plus",
        }
    }
}

/// One row of `upadmin show vlun`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VLun {
    pub id: u32,
    pub disk_name: String,
    pub name: String,
    pub wwn: String,
    pub status: String,
    pub variant: VendorVariant,
}

impl VLun {
    /// Residual entry: the virtual disk was removed, its physical paths were not.
    pub fn is_residual(&self) -> bool {
        self.disk_name == DELETED_DISK_NAME
    }

    pub fn is_normal(&self) -> bool {
        self.status.eq_ignore_ascii_case("normal")
    }

    pub fn matches(&self, lun: &LunId) -> bool {
        lun.is_suffix_of(&self.wwn)
    }
}
