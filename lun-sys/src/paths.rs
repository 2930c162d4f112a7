// SPDX-License-Identifier: GPL-3.0-only

//! Well-known `/dev` and `/sys` locations

use std::path::PathBuf;

use lun_types::Hctl;

pub const BY_ID_DIR: &str = "/dev/disk/by-id";

pub fn dev_node(name: &str) -> PathBuf {
    PathBuf::from(format!("/dev/{name}"))
}

pub fn block_dir(name: &str) -> PathBuf {
    PathBuf::from(format!("/sys/block/{name}"))
}

/// Physical paths stacked under a device-mapper device.
pub fn slaves_dir(name: &str) -> PathBuf {
    block_dir(name).join("slaves")
}

/// Alias of a device-mapper device (e.g. `mpatha`).
pub fn dm_name(name: &str) -> PathBuf {
    block_dir(name).join("dm").join("name")
}

pub fn device_state(name: &str) -> PathBuf {
    block_dir(name).join("device").join("state")
}

pub fn device_delete(name: &str) -> PathBuf {
    block_dir(name).join("device").join("delete")
}

pub fn device_rescan(name: &str) -> PathBuf {
    block_dir(name).join("device").join("rescan")
}

/// Kernel-reported WWID of a block device (used for NVMe namespaces).
pub fn wwid(name: &str) -> PathBuf {
    block_dir(name).join("wwid")
}

pub fn scsi_device_dir(hctl: &Hctl) -> PathBuf {
    PathBuf::from(format!("/sys/class/scsi_device/{}", hctl.sysfs_name()))
}

pub fn scsi_device_delete(hctl: &Hctl) -> PathBuf {
    scsi_device_dir(hctl).join("device").join("delete")
}

/// Block devices exposed by one SCSI path.
pub fn scsi_device_block_dir(hctl: &Hctl) -> PathBuf {
    scsi_device_dir(hctl).join("device").join("block")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_sysfs_locations() {
        assert_eq!(slaves_dir("dm-2"), PathBuf::from("/sys/block/dm-2/slaves"));
        assert_eq!(dm_name("dm-2"), PathBuf::from("/sys/block/dm-2/dm/name"));
        let hctl: Hctl = "6:0:0:1".parse().expect("hctl");
        assert_eq!(
            scsi_device_delete(&hctl),
            PathBuf::from("/sys/class/scsi_device/6:0:0:1/device/delete")
        );
    }
}
