// SPDX-License-Identifier: GPL-3.0-only

use std::time::Duration;

use lun_contracts::{ConnectorError, Result};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    ConnectorConfig, DeviceClassifier, Host, MultipathReconciler, TeardownEngine,
    TopologyResolver,
};

/// The engine components wired to one host and one configuration.
pub struct DeviceEngine {
    host: Host,
    config: ConnectorConfig,
    resolver: TopologyResolver,
    reconciler: MultipathReconciler,
    teardown: TeardownEngine,
}

impl DeviceEngine {
    pub fn new(host: Host, config: ConnectorConfig) -> Self {
        let classifier =
            DeviceClassifier::new(host.clone(), config.multipath.vendor_nvme_prefix.clone());
        let resolver = TopologyResolver::new(host.clone(), classifier.clone());
        let reconciler =
            MultipathReconciler::new(host.clone(), config.timeouts.dm_poll_interval());
        let teardown =
            TeardownEngine::new(host.clone(), classifier, &config.multipath, &config.timeouts);

        Self {
            host,
            config,
            resolver,
            reconciler,
            teardown,
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn resolver(&self) -> &TopologyResolver {
        &self.resolver
    }

    pub fn reconciler(&self) -> &MultipathReconciler {
        &self.reconciler
    }

    pub fn teardown(&self) -> &TeardownEngine {
        &self.teardown
    }
}

/// Sleep between poll iterations, waking early on cancellation.
pub(crate) async fn pause(interval: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ConnectorError::Cancelled),
        _ = sleep(interval) => Ok(()),
    }
}
