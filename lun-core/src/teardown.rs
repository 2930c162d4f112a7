// SPDX-License-Identifier: GPL-3.0-only

//! Idempotent removal of resolved devices and their paths

use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::time::Duration;

use lun_contracts::{ConnectorError, Result};
use lun_sys::paths::{self, BY_ID_DIR};
use lun_sys::tools::{blockdev, multipathd, nvme::NamespaceName, upadmin};
use lun_types::{MultipathKind, VendorVariant};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::config::{MultipathConfig, TimeoutConfig};
use crate::resolver::list_or_empty;
use crate::{DeviceClassifier, Host};

#[derive(Clone)]
pub struct TeardownEngine {
    host: Host,
    classifier: DeviceClassifier,
    flush_retries: u32,
    flush_backoff: Duration,
    removal_timeout: Duration,
    removal_interval: Duration,
}

/// Write `1` to a sysfs delete attribute. `false` when the device was already gone.
fn sysfs_delete(host: &Host, attr: &Path) -> Result<bool> {
    match host.probe().write(attr, "1") {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error.into()),
    }
}

impl TeardownEngine {
    pub fn new(
        host: Host,
        classifier: DeviceClassifier,
        multipath: &MultipathConfig,
        timeouts: &TimeoutConfig,
    ) -> Self {
        Self {
            host,
            classifier,
            flush_retries: multipath.flush_retries,
            flush_backoff: multipath.flush_backoff(),
            removal_timeout: timeouts.removal(),
            removal_interval: timeouts.removal_interval(),
        }
    }

    /// Remove `device` and everything stacked under it.
    ///
    /// Returns the alias of a multipath map that could not be flushed; the
    /// physical paths are removed regardless. Removing a device that is
    /// already gone succeeds.
    pub async fn remove_device(&self, device: &str) -> Result<Option<String>> {
        if !self.host.probe().exists(&paths::dev_node(device)) {
            info!(device, "device already removed");
            return Ok(None);
        }

        let Some(classification) = self.classifier.classify(device).await? else {
            return Err(ConnectorError::Classification {
                device: device.to_string(),
                reason: "unrecognized device name".to_string(),
            });
        };

        info!(device, kind = %classification.kind, "removing device");
        match classification.kind {
            MultipathKind::None => {
                self.remove_physical(&[device.to_string()]).await?;
                Ok(None)
            }
            MultipathKind::DmMultipath => self.remove_dm(device).await,
            MultipathKind::VendorMultipathScsi => {
                self.remove_vendor(device, VendorVariant::Scsi).await?;
                Ok(None)
            }
            MultipathKind::VendorMultipathNvme => {
                self.remove_vendor(device, VendorVariant::Nvme).await?;
                Ok(None)
            }
        }
    }

    fn map_alias(&self, device: &str) -> String {
        match self.host.probe().read_attr(&paths::dm_name(device)) {
            Ok(alias) => alias,
            Err(error) => {
                warn!(device, %error, "cannot read map alias, using kernel name");
                device.to_string()
            }
        }
    }

    /// Flush the multipath map `device` (`dm-N`) without touching its paths.
    pub async fn release_map(&self, device: &str) -> bool {
        let alias = self.map_alias(device);
        self.flush_multipath(&alias).await
    }

    async fn remove_dm(&self, device: &str) -> Result<Option<String>> {
        let alias = self.map_alias(device);
        let members = list_or_empty(&self.host, &paths::slaves_dir(device))?;

        let remaining = if self.flush_multipath(&alias).await {
            None
        } else {
            warn!(device, alias, "multipath map still present, removing its paths anyway");
            Some(alias)
        };

        self.remove_physical(&members).await?;
        if remaining.is_none() {
            self.wait_for_removal(&[device.to_string()]).await?;
        }
        self.remove_orphan_links(&[device.to_string()])?;
        Ok(remaining)
    }

    /// Flush a multipath map with bounded retries. `false` when it is still there.
    pub async fn flush_multipath(&self, alias: &str) -> bool {
        for attempt in 1..=self.flush_retries {
            match multipathd::flush_map(self.host.runner(), alias).await {
                Ok(output) if output.success || output.reports_absent() => {
                    debug!(alias, attempt, "multipath map flushed");
                    return true;
                }
                Ok(output) => {
                    warn!(alias, attempt, stderr = output.stderr, "multipath flush failed");
                }
                Err(error) => {
                    warn!(alias, attempt, %error, "multipath flush failed");
                }
            }
            if attempt < self.flush_retries {
                sleep(self.flush_backoff).await;
            }
        }
        false
    }

    /// Flush and delete physical paths, then wait for their nodes to vanish.
    ///
    /// NVMe namespaces belong to their controller and are only flushed.
    async fn remove_physical(&self, devices: &[String]) -> Result<()> {
        let mut deleted = Vec::new();

        for device in devices {
            if !blockdev::flush_buffers(self.host.runner(), device).await? {
                continue;
            }
            if NamespaceName::parse(device).is_some() {
                debug!(device, "nvme namespace flushed, left to its controller");
                continue;
            }
            if sysfs_delete(&self.host, &paths::device_delete(device))? {
                debug!(device, "deleted path");
                deleted.push(device.clone());
            } else {
                debug!(device, "path already gone");
            }
        }

        self.wait_for_removal(&deleted).await?;
        self.remove_orphan_links(&deleted)
    }

    async fn remove_vendor(&self, device: &str, variant: VendorVariant) -> Result<()> {
        let runner = self.host.runner();
        let vluns = upadmin::show_vluns(runner, variant).await?;
        let vlun = vluns.into_iter().find(|vlun| vlun.disk_name == device);
        if vlun.is_none() {
            warn!(device, "no vlun owns device, removing the node only");
        }

        if variant == VendorVariant::Nvme
            && let Some(vlun) = &vlun
        {
            upadmin::disable_io_suspension(runner, vlun.id).await?;
        }

        blockdev::flush_buffers(runner, device).await?;

        if variant == VendorVariant::Scsi
            && let Some(vlun) = &vlun
        {
            for hctl in upadmin::show_vlun_paths(runner, variant, vlun.id).await? {
                if sysfs_delete(&self.host, &paths::scsi_device_delete(&hctl))? {
                    debug!(device, %hctl, "deleted vendor path");
                }
            }
        }

        match (variant, &vlun) {
            (VendorVariant::Nvme, Some(vlun)) => {
                upadmin::delete_vlun(runner, variant, vlun.id).await?;
            }
            _ => {
                sysfs_delete(&self.host, &paths::device_delete(device))?;
            }
        }

        let removed = [device.to_string()];
        self.wait_for_removal(&removed).await?;
        self.remove_orphan_links(&removed)
    }

    /// Poll `/dev` until every listed node is gone.
    async fn wait_for_removal(&self, devices: &[String]) -> Result<()> {
        if devices.is_empty() {
            return Ok(());
        }

        let deadline = Instant::now() + self.removal_timeout;
        loop {
            let remaining: Vec<String> = devices
                .iter()
                .filter(|device| self.host.probe().exists(&paths::dev_node(device)))
                .cloned()
                .collect();
            if remaining.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ConnectorError::DeviceRemovalTimeout(remaining));
            }
            debug!(?remaining, "waiting for devices to disappear");
            sleep(self.removal_interval).await;
        }
    }

    /// Drop by-id links whose target is one of `removed` and no longer exists.
    fn remove_orphan_links(&self, removed: &[String]) -> Result<()> {
        if removed.is_empty() {
            return Ok(());
        }

        let removed: BTreeSet<&str> = removed.iter().map(String::as_str).collect();
        let by_id = Path::new(BY_ID_DIR);
        for link in list_or_empty(&self.host, by_id)? {
            let link_path = by_id.join(&link);
            let Ok(target) = self.host.probe().read_link(&link_path) else {
                continue;
            };
            let points_at_removed = target
                .file_name()
                .is_some_and(|name| removed.contains(name.to_string_lossy().as_ref()));
            if !points_at_removed || self.host.probe().exists(&link_path) {
                continue;
            }
            match self.host.probe().remove_file(&link_path) {
                Ok(()) => debug!(link, "removed orphaned link"),
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => return Err(error.into()),
            }
        }
        Ok(())
    }
}
