// SPDX-License-Identifier: GPL-3.0-only

//! Tunables for locking, polling and multipath handling
//!
//! Every field has a default so an empty TOML document is a valid config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Directory holding one marker file per locked LUN
    pub dir: PathBuf,
    pub prefix: String,
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/lib/lun-agent/locks"),
            prefix: "lun-lock-".to_string(),
            timeout_secs: 300,
            poll_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_connect: usize,
    pub max_disconnect: usize,
    pub acquire_timeout_secs: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_connect: 4,
            max_disconnect: 4,
            acquire_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long connect waits for the LUN to show up under /dev/disk/by-id
    pub discovery_secs: u64,
    pub discovery_interval_ms: u64,
    /// How long connect waits for a multipath map to reach its expected paths
    pub dm_watch_secs: u64,
    pub dm_poll_interval_ms: u64,
    pub removal_secs: u64,
    pub removal_interval_ms: u64,
    pub resize_secs: u64,
    pub command_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            discovery_secs: 30,
            discovery_interval_ms: 1000,
            dm_watch_secs: 30,
            dm_poll_interval_ms: 100,
            removal_secs: 30,
            removal_interval_ms: 1000,
            resize_secs: 30,
            command_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultipathConfig {
    pub flush_retries: u32,
    pub flush_backoff_ms: u64,
    /// Device name prefix of UltraPath-NVMe virtual disks
    pub vendor_nvme_prefix: String,
    /// Remove paths left behind by deleted UltraPath LUNs before connecting
    pub clean_residual_paths: bool,
}

impl Default for MultipathConfig {
    fn default() -> Self {
        Self {
            flush_retries: 3,
            flush_backoff_ms: 1000,
            vendor_nvme_prefix: "ultrapath".to_string(),
            clean_residual_paths: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    pub lock: LockConfig,
    pub concurrency: ConcurrencyConfig,
    pub timeouts: TimeoutConfig,
    pub multipath: MultipathConfig,
}

fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

impl ConnectorConfig {
    pub fn from_toml_str(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("concurrency.max_connect", self.concurrency.max_connect as u64)?;
        positive("concurrency.max_disconnect", self.concurrency.max_disconnect as u64)?;
        positive("concurrency.acquire_timeout_secs", self.concurrency.acquire_timeout_secs)?;
        positive("lock.timeout_secs", self.lock.timeout_secs)?;
        positive("lock.poll_interval_ms", self.lock.poll_interval_ms)?;
        positive("timeouts.discovery_secs", self.timeouts.discovery_secs)?;
        positive("timeouts.dm_watch_secs", self.timeouts.dm_watch_secs)?;
        positive("timeouts.dm_poll_interval_ms", self.timeouts.dm_poll_interval_ms)?;
        positive("timeouts.removal_secs", self.timeouts.removal_secs)?;
        positive("timeouts.resize_secs", self.timeouts.resize_secs)?;
        positive("timeouts.command_secs", self.timeouts.command_secs)?;
        positive("multipath.flush_retries", u64::from(self.multipath.flush_retries))?;

        if self.multipath.vendor_nvme_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "multipath.vendor_nvme_prefix",
                reason: "must not be empty".to_string(),
            });
        }
        if self.lock.prefix.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "lock.prefix",
                reason: "must not be empty".to_string(),
            });
        }
        if self.lock.prefix.contains('/') {
            return Err(ConfigError::Invalid {
                field: "lock.prefix",
                reason: "must not contain '/'".to_string(),
            });
        }
        Ok(())
    }
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl ConcurrencyConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

impl TimeoutConfig {
    pub fn discovery(&self) -> Duration {
        Duration::from_secs(self.discovery_secs)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn dm_watch(&self) -> Duration {
        Duration::from_secs(self.dm_watch_secs)
    }

    pub fn dm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.dm_poll_interval_ms)
    }

    pub fn removal(&self) -> Duration {
        Duration::from_secs(self.removal_secs)
    }

    pub fn removal_interval(&self) -> Duration {
        Duration::from_millis(self.removal_interval_ms)
    }

    pub fn resize(&self) -> Duration {
        Duration::from_secs(self.resize_secs)
    }

    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }
}

impl MultipathConfig {
    pub fn flush_backoff(&self) -> Duration {
        Duration::from_millis(self.flush_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = ConnectorConfig::from_toml_str("", Path::new("test.toml")).expect("parse");
        assert_eq!(config, ConnectorConfig::default());
        assert_eq!(config.timeouts.dm_poll_interval(), Duration::from_millis(100));
        assert_eq!(config.timeouts.removal(), Duration::from_secs(30));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = ConnectorConfig::from_toml_str(
            "[concurrency]\nmax_connect = 8\n\n[multipath]\nflush_retries = 5\n",
            Path::new("test.toml"),
        )
        .expect("parse");

        assert_eq!(config.concurrency.max_connect, 8);
        assert_eq!(config.concurrency.max_disconnect, 4);
        assert_eq!(config.multipath.flush_retries, 5);
        assert_eq!(config.multipath.vendor_nvme_prefix, "ultrapath");
    }

    #[test]
    fn rejects_zero_permits() {
        let error = ConnectorConfig::from_toml_str(
            "[concurrency]\nmax_disconnect = 0\n",
            Path::new("test.toml"),
        )
        .expect_err("zero permits");
        assert!(matches!(
            error,
            ConfigError::Invalid {
                field: "concurrency.max_disconnect",
                ..
            }
        ));
    }

    #[test]
    fn rejects_empty_lock_prefix() {
        let error = ConnectorConfig::from_toml_str("[lock]\nprefix = \"\"\n", Path::new("test.toml"))
            .expect_err("empty prefix");
        assert!(matches!(error, ConfigError::Invalid { field: "lock.prefix", .. }));
    }
}
