// SPDX-License-Identifier: GPL-3.0-only

//! Device-resolution and multipath-reconciliation engine
//!
//! Maps a LUN identity to one verified device node on this host and safely
//! undoes that mapping:
//!
//! - [`classifier`] tells multipath stacks apart by device name
//! - [`resolver`] turns a LUN id into exactly one virtual or physical device
//! - [`reconciler`] waits for multipath maps to converge and checks their WWNs
//! - [`teardown`] removes devices idempotently
//! - [`concurrency`] serializes work per LUN and bounds it per operation class
//! - [`connector`] and [`registry`] compose the above into connect, disconnect
//!   and resize calls
//!
//! All topology is read live on every call; nothing is cached.

pub mod classifier;
pub mod concurrency;
pub mod config;
pub mod connector;
pub mod engine;
pub mod registry;
pub mod reconciler;
pub mod resolver;
pub mod teardown;

use std::sync::Arc;

use lun_contracts::{CommandRunner, DeviceProbe};

pub use classifier::{Classification, DeviceClassifier};
pub use concurrency::{LunLockGuard, LunLockManager, OperationSemaphores};
pub use config::{ConfigError, ConnectorConfig};
pub use connector::{BlockConnector, VolumeConnector};
pub use engine::DeviceEngine;
pub use reconciler::{MultipathReconciler, WatchState};
pub use registry::ConnectorRegistry;
pub use resolver::TopologyResolver;
pub use teardown::TeardownEngine;

/// Injected access to the host: tool execution and the device tree.
#[derive(Clone)]
pub struct Host {
    pub runner: Arc<dyn CommandRunner>,
    pub probe: Arc<dyn DeviceProbe>,
}

impl Host {
    pub fn new(runner: Arc<dyn CommandRunner>, probe: Arc<dyn DeviceProbe>) -> Self {
        Self { runner, probe }
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn probe(&self) -> &dyn DeviceProbe {
        self.probe.as_ref()
    }
}
