// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingLevel;

const LOG_FILE_PREFIX: &str = "lun-agent.log";

fn default_filter(level: LoggingLevel) -> String {
    let level = level.as_directive();
    format!("lun_agent={level},lun_core={level},lun_sys={level},warn")
}

/// Install the global subscriber: stderr always, plus a daily file under `log_dir`.
///
/// `RUST_LOG` overrides the configured level. Keep the returned guard alive
/// until exit so buffered file output is flushed.
pub fn init(level: LoggingLevel, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("logging already initialized")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_covers_agent_crates() {
        let filter = default_filter(LoggingLevel::Debug);
        assert_eq!(filter, "lun_agent=debug,lun_core=debug,lun_sys=debug,warn");
        assert!(EnvFilter::try_new(filter).is_ok());
    }
}
