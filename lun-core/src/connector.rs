// SPDX-License-Identifier: GPL-3.0-only

//! Connect, disconnect and resize for block volumes

use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use lun_contracts::{ConnectorError, Result};
use lun_sys::paths;
use lun_sys::tools::{lsblk, multipathd, nvme, nvme::NamespaceName, upadmin};
use lun_types::{
    ConnectRequest, DmAggregate, LunId, MultipathKind, MultipathMode, ResizeRequest, Transport,
    VendorVariant,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::DeviceEngine;
use crate::engine::pause;

/// Attach/detach surface for one transport family.
#[async_trait]
pub trait VolumeConnector: Send + Sync {
    /// Find and verify the device of a freshly logged-in LUN; returns its `/dev` path.
    async fn connect_volume(
        &self,
        request: &ConnectRequest,
        cancel: &CancellationToken,
    ) -> Result<String>;

    /// Remove every device of `lun`. Succeeds when nothing is attached.
    async fn disconnect_volume(&self, lun: &LunId, cancel: &CancellationToken) -> Result<()>;

    /// Make the host see the grown size of an attached LUN.
    async fn resize_block(&self, request: &ResizeRequest, cancel: &CancellationToken)
    -> Result<()>;
}

/// What discovery found for a LUN.
enum Located {
    Device(String, MultipathKind),
    /// Several physical paths and no multipath map over them yet
    PathsOnly(Vec<String>),
}

pub struct BlockConnector {
    transport: Transport,
    engine: Arc<DeviceEngine>,
}

impl BlockConnector {
    pub fn new(transport: Transport, engine: Arc<DeviceEngine>) -> Self {
        Self { transport, engine }
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Poll the resolver until the LUN shows up or discovery times out.
    async fn discover(
        &self,
        request: &ConnectRequest,
        cancel: &CancellationToken,
    ) -> Result<Located> {
        let lun = &request.lun_wwn;
        let timeouts = &self.engine.config().timeouts;
        let deadline = Instant::now() + timeouts.discovery();

        loop {
            match self.engine.resolver().resolve_virtual_device(lun).await {
                Ok(Some((device, kind))) => return Ok(Located::Device(device, kind)),
                Ok(None) => debug!(%lun, "waiting for device to appear"),
                Err(ConnectorError::PhysicalDeviceNotUnique { devices, .. })
                    if request.multipath == MultipathMode::Dm =>
                {
                    return Ok(Located::PathsOnly(devices));
                }
                Err(ConnectorError::PhysicalDeviceNotUnique { devices, lun })
                    if request.multipath == MultipathMode::Vendor =>
                {
                    if Instant::now() >= deadline {
                        return Err(ConnectorError::PhysicalDeviceNotUnique { lun, devices });
                    }
                    debug!(%lun, ?devices, "waiting for UltraPath to claim paths");
                }
                Err(error) => return Err(error),
            }

            if Instant::now() >= deadline {
                return Err(ConnectorError::VolumeNotFound(lun.to_string()));
            }
            pause(timeouts.discovery_interval(), cancel).await?;
        }
    }

    /// Wait for the full multipath map, flushing it if it stays short.
    async fn await_complete_map(
        &self,
        request: &ConnectRequest,
        cancel: &CancellationToken,
    ) -> Result<DmAggregate> {
        let result = self
            .engine
            .reconciler()
            .watch_dm_device(
                &request.lun_wwn,
                request.expected_paths,
                self.engine.config().timeouts.dm_watch(),
                cancel,
            )
            .await;

        if let Err(ConnectorError::PathIncomplete { device, .. }) = &result {
            if self.engine.teardown().release_map(device).await {
                info!(lun = %request.lun_wwn, device, "flushed incomplete multipath map");
            } else {
                warn!(lun = %request.lun_wwn, device, "incomplete multipath map left in place");
            }
        }
        result
    }

    /// Only physical paths are visible but a multipath map is expected.
    async fn assemble_dm(
        &self,
        request: &ConnectRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        info!(lun = %request.lun_wwn, "waiting for multipath map over physical paths");
        let aggregate = self.await_complete_map(request, cancel).await?;

        // udev may not have moved the by-id links to the map yet
        let device = match self
            .engine
            .resolver()
            .resolve_virtual_device(&request.lun_wwn)
            .await
        {
            Ok(Some((device, MultipathKind::DmMultipath))) => device,
            Ok(_) | Err(ConnectorError::PhysicalDeviceNotUnique { .. }) => aggregate.sysfs_id,
            Err(error) => return Err(error),
        };
        self.verify_dm(request, &device, cancel).await
    }

    async fn verify_dm(
        &self,
        request: &ConnectRequest,
        device: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let lun = &request.lun_wwn;
        let reconciler = self.engine.reconciler();

        let Some(mut aggregate) = reconciler.find_dm_aggregate(lun).await? else {
            warn!(%lun, device, "multipathd does not report a map for the device");
            return Err(ConnectorError::MultipathUnavailable(device.to_string()));
        };
        if aggregate.sysfs_id != device {
            return Err(ConnectorError::VirtualDeviceNotUnique {
                lun: lun.to_string(),
                devices: vec![device.to_string(), aggregate.sysfs_id],
            });
        }

        if request.expected_paths > 1 && aggregate.members.len() < request.expected_paths {
            aggregate = self.await_complete_map(request, cancel).await?;
        }

        let members = aggregate.members.clone();
        if !reconciler
            .verify_multipath_available(&aggregate, lun, &members)
            .await?
        {
            return Err(ConnectorError::MultipathUnavailable(aggregate.name));
        }
        Ok(aggregate.sysfs_id)
    }

    async fn verify_vendor(&self, device: &str, kind: MultipathKind, lun: &LunId) -> Result<()> {
        let variant = match kind {
            MultipathKind::VendorMultipathNvme => VendorVariant::Nvme,
            _ => VendorVariant::Scsi,
        };
        let vluns = upadmin::show_vluns(self.engine.host().runner(), variant).await?;
        let Some(vlun) = vluns.iter().find(|vlun| vlun.disk_name == device) else {
            return Err(ConnectorError::InconsistentWwn {
                device: device.to_string(),
                expected: lun.to_string(),
                actual: format!("no {} vlun", variant.cli()),
            });
        };

        if !vlun.matches(lun) {
            return Err(ConnectorError::InconsistentWwn {
                device: device.to_string(),
                expected: lun.to_string(),
                actual: vlun.wwn.clone(),
            });
        }
        if !vlun.is_normal() {
            warn!(%lun, device, status = vlun.status, "vlun is not healthy");
            return Err(ConnectorError::MultipathUnavailable(device.to_string()));
        }
        Ok(())
    }

    async fn verify_physical(&self, device: &str, lun: &LunId) -> Result<()> {
        let wwid = self.engine.reconciler().device_wwid(device).await?;
        if !lun.is_contained_in(&wwid) {
            return Err(ConnectorError::InconsistentWwn {
                device: device.to_string(),
                expected: lun.to_string(),
                actual: wwid,
            });
        }
        Ok(())
    }

    /// Rescan every physical path (and the map or virtual disk above them).
    async fn rescan(&self, device: &str, kind: MultipathKind) -> Result<()> {
        let host = self.engine.host();
        let members = self.engine.resolver().physical_members(device, kind).await?;

        let mut scsi_devices = Vec::new();
        let mut controllers = BTreeSet::new();
        for member in &members {
            match NamespaceName::parse(member) {
                Some(namespace) => {
                    controllers.insert(namespace.controller_name());
                }
                None => scsi_devices.push(member.clone()),
            }
        }
        if kind == MultipathKind::VendorMultipathScsi {
            scsi_devices.push(device.to_string());
        }

        for scsi in &scsi_devices {
            match host.probe().write(&paths::device_rescan(scsi), "1") {
                Ok(()) => debug!(device = scsi, "rescanned path"),
                Err(error) if error.kind() == io::ErrorKind::NotFound => {
                    warn!(device = scsi, "path vanished before rescan");
                }
                Err(error) => return Err(error.into()),
            }
        }
        for controller in &controllers {
            nvme::ns_rescan(host.runner(), controller).await?;
        }

        if kind == MultipathKind::DmMultipath {
            let alias = host.probe().read_attr(&paths::dm_name(device))?;
            multipathd::resize_map(host.runner(), &alias).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl VolumeConnector for BlockConnector {
    async fn connect_volume(
        &self,
        request: &ConnectRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let lun = &request.lun_wwn;
        if request.expected_paths == 0 {
            return Err(ConnectorError::InvalidRequest(
                "expected_paths must be at least 1".to_string(),
            ));
        }
        if request.protocol.transport() != self.transport {
            return Err(ConnectorError::InvalidRequest(format!(
                "protocol {} is not served by the {:?} connector",
                request.protocol, self.transport
            )));
        }

        if request.multipath == MultipathMode::Vendor
            && self.transport == Transport::Scsi
            && self.engine.config().multipath.clean_residual_paths
        {
            match self
                .engine
                .reconciler()
                .clean_residual_vendor_paths(VendorVariant::Scsi)
                .await
            {
                Ok(0) => {}
                Ok(removed) => info!(removed, "cleaned residual UltraPath paths"),
                Err(error) => warn!(%error, "residual path cleanup failed"),
            }
        }

        let device = match self.discover(request, cancel).await? {
            Located::Device(device, MultipathKind::DmMultipath) => {
                self.verify_dm(request, &device, cancel).await?
            }
            Located::Device(device, kind) if kind.is_vendor() => {
                self.verify_vendor(&device, kind, lun).await?;
                device
            }
            Located::Device(_, _)
                if request.multipath == MultipathMode::Dm && request.expected_paths > 1 =>
            {
                self.assemble_dm(request, cancel).await?
            }
            Located::PathsOnly(_) => self.assemble_dm(request, cancel).await?,
            Located::Device(device, _) => {
                self.verify_physical(&device, lun).await?;
                device
            }
        };

        let path = paths::dev_node(&device).to_string_lossy().to_string();
        info!(%lun, path, "volume connected");
        Ok(path)
    }

    async fn disconnect_volume(&self, lun: &LunId, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ConnectorError::Cancelled);
        }

        let devices = match self.engine.resolver().resolve_virtual_device(lun).await {
            Ok(Some((device, _))) => vec![device],
            Ok(None) => {
                info!(%lun, "no device attached, nothing to disconnect");
                return Ok(());
            }
            // paths without a map: remove each of them
            Err(ConnectorError::PhysicalDeviceNotUnique { devices, .. }) => devices,
            Err(error) => return Err(error),
        };

        for device in &devices {
            if let Some(remaining) = self.engine.teardown().remove_device(device).await? {
                return Err(ConnectorError::FlushPending(remaining));
            }
        }
        info!(%lun, ?devices, "volume disconnected");
        Ok(())
    }

    async fn resize_block(
        &self,
        request: &ResizeRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let lun = &request.lun_wwn;
        let Some((device, kind)) = self.engine.resolver().resolve_virtual_device(lun).await?
        else {
            return Err(ConnectorError::VolumeNotFound(lun.to_string()));
        };

        self.rescan(&device, kind).await?;

        let timeouts = &self.engine.config().timeouts;
        let deadline = Instant::now() + timeouts.resize();
        loop {
            let size = lsblk::device_size(self.engine.host().runner(), &device).await?;
            if size >= request.required_bytes {
                info!(%lun, device, size, "volume resized");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ConnectorError::ResizeIncomplete {
                    device,
                    size,
                    required: request.required_bytes,
                });
            }
            debug!(%lun, device, size, required = request.required_bytes, "waiting for new size");
            pause(timeouts.discovery_interval(), cancel).await?;
        }
    }
}
