// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lun_core::{ConfigError, ConnectorConfig};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/lun-agent/config.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LoggingLevel,
    /// Also write a daily rotated log file here
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub logging: LoggingConfig,
    #[serde(flatten)]
    pub connector: ConnectorConfig,
}

impl AgentConfig {
    pub fn from_toml_str(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.connector.validate()?;
        Ok(config)
    }
}

/// Load the agent config.
///
/// An explicit path must exist. The default path is optional and falls back
/// to built-in defaults when absent.
pub fn load(explicit: Option<&Path>) -> Result<AgentConfig, ConfigError> {
    let path = explicit.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));
    match fs::read_to_string(path) {
        Ok(contents) => AgentConfig::from_toml_str(&contents, path),
        Err(error) if error.kind() == io::ErrorKind::NotFound && explicit.is_none() => {
            Ok(AgentConfig::default())
        }
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_sections() {
        let config = AgentConfig::from_toml_str(
            r#"
[logging]
level = "debug"
log_dir = "/var/log/lun-agent"

[lock]
dir = "/run/lun-agent/locks"

[concurrency]
max_connect = 2

[timeouts]
dm_watch_secs = 60

[multipath]
clean_residual_paths = false
"#,
            Path::new("agent.toml"),
        )
        .expect("parse");

        assert_eq!(config.logging.level, LoggingLevel::Debug);
        assert_eq!(config.logging.log_dir, Some(PathBuf::from("/var/log/lun-agent")));
        assert_eq!(config.connector.lock.dir, PathBuf::from("/run/lun-agent/locks"));
        assert_eq!(config.connector.concurrency.max_connect, 2);
        assert_eq!(config.connector.timeouts.dm_watch_secs, 60);
        assert!(!config.connector.multipath.clean_residual_paths);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.toml");
        assert!(matches!(load(Some(&missing)), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("agent.toml");
        fs::write(&path, "[timeouts]\nremoval_secs = 0\n").expect("write");

        assert!(matches!(
            load(Some(&path)),
            Err(ConfigError::Invalid {
                field: "timeouts.removal_secs",
                ..
            })
        ));
    }
}
