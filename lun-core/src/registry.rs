// SPDX-License-Identifier: GPL-3.0-only

//! Protocol routing plus the admission and locking wrapped around every call

use std::collections::HashMap;
use std::sync::Arc;

use lun_contracts::{ConnectorError, Result};
use lun_types::{ConnectRequest, DeviceInfo, LunId, Operation, Protocol, ResizeRequest, Transport};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use crate::{
    BlockConnector, ConnectorConfig, DeviceEngine, Host, LunLockManager, OperationSemaphores,
    VolumeConnector,
};

pub struct ConnectorRegistry {
    routes: HashMap<Protocol, Arc<dyn VolumeConnector>>,
    engine: Arc<DeviceEngine>,
    locks: LunLockManager,
    semaphores: OperationSemaphores,
}

impl ConnectorRegistry {
    /// Build the block connectors for both transports and route every protocol to one.
    pub fn new(host: Host, config: ConnectorConfig) -> Self {
        let locks = LunLockManager::new(&config.lock);
        let semaphores = OperationSemaphores::new(&config.concurrency);
        let engine = Arc::new(DeviceEngine::new(host, config));

        let scsi: Arc<dyn VolumeConnector> =
            Arc::new(BlockConnector::new(Transport::Scsi, engine.clone()));
        let nvme: Arc<dyn VolumeConnector> =
            Arc::new(BlockConnector::new(Transport::Nvme, engine.clone()));

        let routes = Protocol::ALL
            .into_iter()
            .map(|protocol| {
                let connector = match protocol.transport() {
                    Transport::Scsi => scsi.clone(),
                    Transport::Nvme => nvme.clone(),
                };
                (protocol, connector)
            })
            .collect();

        Self {
            routes,
            engine,
            locks,
            semaphores,
        }
    }

    /// Replace the connector serving `protocol`.
    pub fn with_connector(mut self, protocol: Protocol, connector: Arc<dyn VolumeConnector>) -> Self {
        self.routes.insert(protocol, connector);
        self
    }

    /// Create the lock directory and sweep markers left by a previous run.
    pub fn prepare(&self) -> Result<usize> {
        self.locks.prepare()
    }

    pub fn connector_for(&self, protocol: Protocol) -> Result<Arc<dyn VolumeConnector>> {
        self.routes.get(&protocol).cloned().ok_or_else(|| {
            ConnectorError::InvalidRequest(format!("no connector for protocol {protocol}"))
        })
    }

    pub fn engine(&self) -> &DeviceEngine {
        &self.engine
    }

    pub fn locks(&self) -> &LunLockManager {
        &self.locks
    }

    pub fn semaphores(&self) -> &OperationSemaphores {
        &self.semaphores
    }

    pub async fn connect_volume(
        &self,
        request: &ConnectRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let connector = self.connector_for(request.protocol)?;
        let span = info_span!("connect", lun = %request.lun_wwn, protocol = %request.protocol);
        async {
            let _permit = self.semaphores.acquire(Operation::Connect).await?;
            let _lock = self.locks.acquire(&request.lun_wwn, Operation::Connect).await?;
            connector.connect_volume(request, cancel).await
        }
        .instrument(span)
        .await
    }

    pub async fn disconnect_volume(
        &self,
        protocol: Protocol,
        lun: &LunId,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let connector = self.connector_for(protocol)?;
        let span = info_span!("disconnect", %lun, %protocol);
        async {
            let _permit = self.semaphores.acquire(Operation::Disconnect).await?;
            let _lock = self.locks.acquire(lun, Operation::Disconnect).await?;
            connector.disconnect_volume(lun, cancel).await
        }
        .instrument(span)
        .await
    }

    /// Resize shares the connect pool; it runs against an attached volume.
    pub async fn resize_block(
        &self,
        protocol: Protocol,
        request: &ResizeRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let connector = self.connector_for(protocol)?;
        let span = info_span!("resize", lun = %request.lun_wwn, %protocol);
        async {
            let _permit = self.semaphores.acquire(Operation::Connect).await?;
            let _lock = self.locks.acquire(&request.lun_wwn, Operation::Connect).await?;
            connector.resize_block(request, cancel).await
        }
        .instrument(span)
        .await
    }

    /// Read-only lookup; takes neither a permit nor the LUN lock.
    pub async fn resolve(&self, lun: &LunId) -> Result<Option<DeviceInfo>> {
        let info = self.engine.resolver().resolve_device_info(lun).await?;
        debug!(%lun, found = info.is_some(), "resolved lun");
        Ok(info)
    }
}
