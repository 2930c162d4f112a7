// SPDX-License-Identifier: GPL-3.0-only

//! LUN id to device resolution over `/dev/disk/by-id`

use std::collections::BTreeSet;
use std::io;
use std::path::Path;

use lun_contracts::{ConnectorError, Result};
use lun_sys::paths::{self, BY_ID_DIR};
use lun_sys::tools::upadmin;
use lun_types::{DeviceInfo, LunId, MultipathKind, VendorVariant};
use tracing::{debug, info};

use crate::{DeviceClassifier, Host};

#[derive(Clone)]
pub struct TopologyResolver {
    host: Host,
    classifier: DeviceClassifier,
}

/// Read a directory that may legitimately not exist yet.
pub(crate) fn list_or_empty(host: &Host, dir: &Path) -> Result<Vec<String>> {
    match host.probe().read_dir(dir) {
        Ok(entries) => Ok(entries),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(error) => Err(error.into()),
    }
}

impl TopologyResolver {
    pub fn new(host: Host, classifier: DeviceClassifier) -> Self {
        Self { host, classifier }
    }

    pub fn classifier(&self) -> &DeviceClassifier {
        &self.classifier
    }

    /// Distinct device names that a by-id link mentioning `lun` points at.
    pub fn linked_devices(&self, lun: &LunId) -> Result<Vec<String>> {
        let by_id = Path::new(BY_ID_DIR);
        let mut devices = BTreeSet::new();

        for link in list_or_empty(&self.host, by_id)? {
            if !lun.is_contained_in(&link) {
                continue;
            }
            let target = match self.host.probe().read_link(&by_id.join(&link)) {
                Ok(target) => target,
                // udev may drop the link between listing and reading it
                Err(error) if error.kind() == io::ErrorKind::NotFound => continue,
                Err(error) => return Err(error.into()),
            };
            if let Some(name) = target.file_name() {
                devices.insert(name.to_string_lossy().to_string());
            }
        }

        Ok(devices.into_iter().collect())
    }

    /// Find the one device presenting `lun`.
    ///
    /// A virtual device (multipath map or UltraPath disk) wins over its
    /// physical paths. `Ok(None)` means nothing is visible yet. Partitions
    /// are never returned: a matching partition fails the whole resolution.
    pub async fn resolve_virtual_device(
        &self,
        lun: &LunId,
    ) -> Result<Option<(String, MultipathKind)>> {
        let mut virtual_devices = Vec::new();
        let mut physical_devices = Vec::new();

        for device in self.linked_devices(lun)? {
            let Some(classification) = self.classifier.classify(&device).await? else {
                continue;
            };
            if classification.is_partition {
                return Err(ConnectorError::PartitionFound {
                    lun: lun.to_string(),
                    device,
                });
            }
            if classification.kind.is_virtual() {
                virtual_devices.push((device, classification.kind));
            } else {
                physical_devices.push(device);
            }
        }

        if !virtual_devices.is_empty() {
            if virtual_devices.len() > 1 {
                return Err(ConnectorError::VirtualDeviceNotUnique {
                    lun: lun.to_string(),
                    devices: virtual_devices.into_iter().map(|(name, _)| name).collect(),
                });
            }
            let (device, kind) = virtual_devices.remove(0);
            debug!(%lun, device, %kind, "resolved virtual device");
            return Ok(Some((device, kind)));
        }

        match physical_devices.len() {
            0 => {
                debug!(%lun, "no device visible yet");
                Ok(None)
            }
            1 => {
                let device = physical_devices.remove(0);
                debug!(%lun, device, "resolved physical device");
                Ok(Some((device, MultipathKind::None)))
            }
            _ => Err(ConnectorError::PhysicalDeviceNotUnique {
                lun: lun.to_string(),
                devices: physical_devices,
            }),
        }
    }

    pub async fn resolve_device_info(&self, lun: &LunId) -> Result<Option<DeviceInfo>> {
        Ok(self
            .resolve_virtual_device(lun)
            .await?
            .map(|(device, kind)| DeviceInfo::new(device, lun.clone(), kind)))
    }

    /// Physical paths backing a resolved device.
    ///
    /// UltraPath-NVMe does not expose its member namespaces, so that kind
    /// yields an empty list.
    pub async fn physical_members(&self, device: &str, kind: MultipathKind) -> Result<Vec<String>> {
        match kind {
            MultipathKind::None => Ok(vec![device.to_string()]),
            MultipathKind::DmMultipath => list_or_empty(&self.host, &paths::slaves_dir(device)),
            MultipathKind::VendorMultipathScsi => self.vendor_scsi_members(device).await,
            MultipathKind::VendorMultipathNvme => Ok(Vec::new()),
        }
    }

    async fn vendor_scsi_members(&self, device: &str) -> Result<Vec<String>> {
        let runner = self.host.runner();
        let vluns = upadmin::show_vluns(runner, VendorVariant::Scsi).await?;
        let Some(vlun) = vluns.iter().find(|vlun| vlun.disk_name == device) else {
            info!(device, "no UltraPath vlun owns device");
            return Ok(Vec::new());
        };

        let mut members = BTreeSet::new();
        for hctl in upadmin::show_vlun_paths(runner, VendorVariant::Scsi, vlun.id).await? {
            members.extend(list_or_empty(&self.host, &paths::scsi_device_block_dir(&hctl))?);
        }
        Ok(members.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use lun_contracts::CommandOutput;
    use lun_testing::{FakeProbe, ScriptedRunner};

    use super::*;

    const LUN: &str = "6a0b1c2d00000003";

    fn resolver(runner: ScriptedRunner, probe: FakeProbe) -> TopologyResolver {
        let host = Host::new(Arc::new(runner), Arc::new(probe));
        let classifier = DeviceClassifier::new(host.clone(), "ultrapath");
        TopologyResolver::new(host, classifier)
    }

    fn lun() -> LunId {
        LunId::new(LUN).expect("lun")
    }

    #[tokio::test]
    async fn multipath_map_wins_over_its_paths() {
        let probe = FakeProbe::new();
        probe
            .add_by_id(&format!("dm-uuid-mpath-3{LUN}"), "dm-2")
            .add_by_id(&format!("scsi-3{LUN}"), "dm-2")
            .add_by_id(&format!("wwn-0x{LUN}"), "sdb")
            .add_by_id("wwn-0x6a0b1c2d00000099", "sdz")
            .set_file("/sys/block/dm-2/dm/name", "mpatha");

        let resolved = resolver(ScriptedRunner::new(), probe)
            .resolve_virtual_device(&lun())
            .await
            .expect("resolve");
        assert_eq!(resolved, Some(("dm-2".to_string(), MultipathKind::DmMultipath)));
    }

    #[tokio::test]
    async fn vendor_nvme_partition_is_fatal() {
        let probe = FakeProbe::new();
        probe
            .add_by_id(&format!("nvme-eui.{LUN}"), "ultrapathh")
            .add_by_id(&format!("nvme-eui.{LUN}-part2"), "ultrapathh2");

        let error = resolver(ScriptedRunner::new(), probe)
            .resolve_virtual_device(&lun())
            .await
            .expect_err("partition");
        assert!(
            matches!(error, ConnectorError::PartitionFound { ref device, .. } if device == "ultrapathh2")
        );
    }

    #[tokio::test]
    async fn two_virtual_devices_are_ambiguous() {
        let probe = FakeProbe::new();
        probe
            .add_by_id(&format!("dm-uuid-mpath-3{LUN}"), "dm-2")
            .add_by_id(&format!("nvme-eui.{LUN}"), "ultrapathh")
            .set_file("/sys/block/dm-2/dm/name", "mpatha");

        let error = resolver(ScriptedRunner::new(), probe)
            .resolve_virtual_device(&lun())
            .await
            .expect_err("ambiguous");
        assert!(matches!(error, ConnectorError::VirtualDeviceNotUnique { .. }));
    }

    #[tokio::test]
    async fn single_physical_path_resolves() {
        let probe = FakeProbe::new();
        probe.add_by_id(&format!("wwn-0x{LUN}"), "sdb");

        let info = resolver(ScriptedRunner::new(), probe)
            .resolve_device_info(&lun())
            .await
            .expect("resolve")
            .expect("found");
        assert_eq!(info.full_path, "/dev/sdb");
        assert_eq!(info.multipath_kind, MultipathKind::None);
    }

    #[tokio::test]
    async fn several_physical_paths_without_map_are_ambiguous() {
        let probe = FakeProbe::new();
        probe
            .add_by_id(&format!("wwn-0x{LUN}"), "sdb")
            .add_by_id(&format!("scsi-3{LUN}"), "sdc");

        let error = resolver(ScriptedRunner::new(), probe)
            .resolve_virtual_device(&lun())
            .await
            .expect_err("ambiguous");
        assert!(matches!(error, ConnectorError::PhysicalDeviceNotUnique { .. }));
    }

    #[tokio::test]
    async fn nothing_visible_is_not_an_error() {
        let resolver = resolver(ScriptedRunner::new(), FakeProbe::new());
        assert!(resolver.resolve_virtual_device(&lun()).await.expect("resolve").is_none());
    }

    #[tokio::test]
    async fn lists_members_of_each_kind() {
        let runner = ScriptedRunner::new();
        runner
            .on(
                "upadmin show vlun",
                CommandOutput::ok(format!(" 4 sdf lun04 {LUN} Normal\n")),
            )
            .on(
                "upadmin show vlun id=4",
                CommandOutput::ok(" Path 0 [7:0:0:1] (up-0) : Normal\n Path 1 [8:0:0:1] (up-1) : Normal\n"),
            );
        let probe = FakeProbe::new();
        probe
            .set_dir("/sys/block/dm-2/slaves", &["sdc", "sdb"])
            .set_dir("/sys/class/scsi_device/7:0:0:1/device/block", &["sdd"])
            .set_dir("/sys/class/scsi_device/8:0:0:1/device/block", &["sde"]);
        let resolver = resolver(runner, probe);

        assert_eq!(
            resolver.physical_members("dm-2", MultipathKind::DmMultipath).await.expect("dm"),
            vec!["sdb".to_string(), "sdc".to_string()]
        );
        assert_eq!(
            resolver
                .physical_members("sdf", MultipathKind::VendorMultipathScsi)
                .await
                .expect("vendor"),
            vec!["sdd".to_string(), "sde".to_string()]
        );
        assert_eq!(
            resolver.physical_members("sdb", MultipathKind::None).await.expect("plain"),
            vec!["sdb".to_string()]
        );
    }
}
