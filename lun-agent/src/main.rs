// SPDX-License-Identifier: GPL-3.0-only

//! LUN attachment agent
//!
//! Node-side companion of a block storage plugin: once the transport has
//! logged in, it finds the device of a LUN, verifies it, resizes it and
//! tears it down again.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lun_contracts::ConnectorError;
use lun_core::{ConnectorRegistry, Host};
use lun_sys::{HostCommandRunner, SysfsProbe, tools};
use lun_types::{ConnectRequest, LunId, MultipathMode, Protocol, ResizeRequest};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

mod config;
mod logging;

/// Tools the agent drives; missing optional ones only disable their stack.
const HOST_TOOLS: [&str; 7] = [
    "multipathd",
    "multipath",
    "upadmin",
    "upadmin_plus",
    "nvme",
    "blockdev",
    "lsblk",
];

#[derive(Parser)]
#[command(name = "lun-agent")]
#[command(about = "Attach, detach and resize storage-array LUNs on this node", long_about = None)]
struct Cli {
    /// Config file (default: /etc/lun-agent/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write daily log files to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find and verify the device of a logged-in LUN
    Connect {
        /// LUN WWN or NGUID
        lun: LunId,
        #[arg(long, default_value = "iscsi")]
        protocol: Protocol,
        /// Number of paths the transport login produced
        #[arg(long, default_value_t = 1)]
        paths: usize,
        /// Multipath stack: none, dm or vendor
        #[arg(long, default_value = "dm", value_parser = parse_multipath)]
        multipath: MultipathMode,
    },
    /// Remove every device of a LUN from this host
    Disconnect {
        lun: LunId,
        #[arg(long, default_value = "iscsi")]
        protocol: Protocol,
    },
    /// Rescan a grown LUN until the host sees at least the given size
    Resize {
        lun: LunId,
        /// Required size in bytes
        size: u64,
        #[arg(long, default_value = "iscsi")]
        protocol: Protocol,
    },
    /// Show which device currently presents a LUN
    Resolve { lun: LunId },
    /// Remove lock markers left by a previous run
    SweepLocks,
}

fn parse_multipath(value: &str) -> Result<MultipathMode, String> {
    match value {
        "none" => Ok(MultipathMode::None),
        "dm" => Ok(MultipathMode::Dm),
        "vendor" => Ok(MultipathMode::Vendor),
        other => Err(format!("unknown multipath mode: {other} (expected none, dm or vendor)")),
    }
}

#[derive(Serialize)]
struct ConnectOutput<'a> {
    lun: &'a LunId,
    device_path: String,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Log the failure class so callers can tell retryable errors from fatal ones.
fn report(error: ConnectorError) -> anyhow::Error {
    let kind = error.kind();
    tracing::error!(?kind, retryable = kind.is_retryable(), %error, "operation failed");
    anyhow::Error::new(error)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref())?;
    let log_dir = cli.log_dir.clone().or_else(|| config.logging.log_dir.clone());
    let _log_guard = logging::init(config.logging.level, log_dir.as_deref())?;

    tracing::info!("Starting lun-agent v{}", env!("CARGO_PKG_VERSION"));

    // Check if running as root
    if unsafe { libc::geteuid() } != 0 {
        tracing::error!("lun-agent must run as root");
        anyhow::bail!("lun-agent must run with root privileges");
    }

    for tool in HOST_TOOLS {
        if !tools::is_installed(tool) {
            tracing::debug!(tool, "tool not found on PATH");
        }
    }

    let runner = Arc::new(HostCommandRunner::new(config.connector.timeouts.command()));
    let host = Host::new(runner, Arc::new(SysfsProbe::host()));
    let registry = ConnectorRegistry::new(host, config.connector);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Connect {
            lun,
            protocol,
            paths,
            multipath,
        } => {
            let request = ConnectRequest {
                protocol,
                lun_wwn: lun,
                expected_paths: paths,
                multipath,
            };
            let device_path = registry
                .connect_volume(&request, &cancel)
                .await
                .map_err(report)?;
            if cli.json {
                print_json(&ConnectOutput {
                    lun: &request.lun_wwn,
                    device_path,
                })?;
            } else {
                println!("{device_path}");
            }
        }
        Commands::Disconnect { lun, protocol } => {
            registry
                .disconnect_volume(protocol, &lun, &cancel)
                .await
                .map_err(report)?;
        }
        Commands::Resize {
            lun,
            size,
            protocol,
        } => {
            let request = ResizeRequest {
                lun_wwn: lun,
                required_bytes: size,
            };
            registry
                .resize_block(protocol, &request, &cancel)
                .await
                .map_err(report)?;
        }
        Commands::Resolve { lun } => {
            let info = registry.resolve(&lun).await.map_err(report)?;
            match (&info, cli.json) {
                (_, true) => print_json(&info)?,
                (Some(info), false) => println!("{} {}", info.full_path, info.multipath_kind),
                (None, false) => println!("{lun}: not found"),
            }
        }
        Commands::SweepLocks => {
            let removed = registry.prepare().map_err(report)?;
            if cli.json {
                print_json(&serde_json::json!({ "removed": removed }))?;
            } else {
                println!(
                    "removed {removed} stale lock(s) from {}",
                    registry.locks().dir().display()
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connect_with_defaults() {
        let cli = Cli::try_parse_from(["lun-agent", "connect", "6a0b1c2d00000003"]).expect("parse");
        match cli.command {
            Commands::Connect {
                lun,
                protocol,
                paths,
                multipath,
            } => {
                assert_eq!(lun.as_str(), "6a0b1c2d00000003");
                assert_eq!(protocol, Protocol::Iscsi);
                assert_eq!(paths, 1);
                assert_eq!(multipath, MultipathMode::Dm);
            }
            _ => panic!("expected connect"),
        }
    }

    #[test]
    fn parses_nvme_resize() {
        let cli = Cli::try_parse_from([
            "lun-agent",
            "--json",
            "resize",
            "6a0b1c2d00000003",
            "21474836480",
            "--protocol",
            "fc-nvme",
        ])
        .expect("parse");
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Resize {
                protocol: Protocol::FcNvme,
                size: 21_474_836_480,
                ..
            }
        ));
    }

    #[test]
    fn rejects_unknown_multipath_mode() {
        assert!(
            Cli::try_parse_from([
                "lun-agent",
                "connect",
                "6a0b1c2d00000003",
                "--multipath",
                "powerpath",
            ])
            .is_err()
        );
    }
}
