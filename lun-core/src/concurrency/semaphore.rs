// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;
use std::time::Duration;

use lun_contracts::{ConnectorError, Result};
use lun_types::Operation;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::config::ConcurrencyConfig;

/// Bounded admission per operation class.
///
/// Permits are owned, so they are returned on every exit path when dropped.
#[derive(Debug, Clone)]
pub struct OperationSemaphores {
    connect: Arc<Semaphore>,
    disconnect: Arc<Semaphore>,
    timeout: Duration,
}

impl OperationSemaphores {
    pub fn new(config: &ConcurrencyConfig) -> Self {
        Self {
            connect: Arc::new(Semaphore::new(config.max_connect)),
            disconnect: Arc::new(Semaphore::new(config.max_disconnect)),
            timeout: config.acquire_timeout(),
        }
    }

    fn pool(&self, operation: Operation) -> &Arc<Semaphore> {
        match operation {
            Operation::Connect => &self.connect,
            Operation::Disconnect => &self.disconnect,
        }
    }

    pub fn available(&self, operation: Operation) -> usize {
        self.pool(operation).available_permits()
    }

    pub async fn acquire(&self, operation: Operation) -> Result<OwnedSemaphorePermit> {
        let pool = self.pool(operation).clone();
        match tokio::time::timeout(self.timeout, pool.acquire_owned()).await {
            Ok(Ok(permit)) => {
                debug!(%operation, available = self.available(operation), "acquired permit");
                Ok(permit)
            }
            Ok(Err(_closed)) => Err(ConnectorError::SemaphoreTimeout(operation.to_string())),
            Err(_elapsed) => {
                warn!(%operation, timeout = ?self.timeout, "no permit available");
                Err(ConnectorError::SemaphoreTimeout(operation.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn semaphores(max: usize, timeout_ms: u64) -> OperationSemaphores {
        OperationSemaphores {
            connect: Arc::new(Semaphore::new(max)),
            disconnect: Arc::new(Semaphore::new(max)),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[tokio::test]
    async fn exhausted_pool_times_out() {
        let semaphores = semaphores(1, 30);
        let _held = semaphores.acquire(Operation::Connect).await.expect("first");

        let error = semaphores
            .acquire(Operation::Connect)
            .await
            .expect_err("pool exhausted");
        assert!(matches!(error, ConnectorError::SemaphoreTimeout(ref op) if op == "connect"));

        // the other class has its own pool
        let _other = semaphores.acquire(Operation::Disconnect).await.expect("disconnect");
    }

    #[tokio::test]
    async fn dropping_permit_returns_it() {
        let semaphores = semaphores(2, 30);
        let permit = semaphores.acquire(Operation::Disconnect).await.expect("acquire");
        assert_eq!(semaphores.available(Operation::Disconnect), 1);

        drop(permit);
        assert_eq!(semaphores.available(Operation::Disconnect), 2);
    }
}
