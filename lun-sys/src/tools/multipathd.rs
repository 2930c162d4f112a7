// SPDX-License-Identifier: GPL-3.0-only

//! Device-mapper multipath daemon queries and map maintenance

use lun_contracts::{CommandOutput, CommandRunner, ConnectorError, Result};

const TOOL: &str = "multipathd";

/// One row of `multipathd show maps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipathMap {
    /// Alias (e.g., "mpatha")
    pub name: String,
    /// Kernel name (e.g., "dm-2")
    pub sysfs: String,
    /// WWID, usually "3" followed by the LUN WWN
    pub uuid: String,
}

fn parse_show_maps(output: &str) -> Result<Vec<MultipathMap>> {
    let mut maps = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.first() == Some(&"name") {
            continue;
        }
        if cols.len() != 3 {
            return Err(ConnectorError::parse(
                TOOL,
                format!("expected 3 columns in maps listing, got {}: {line}", cols.len()),
            ));
        }

        maps.push(MultipathMap {
            name: cols[0].to_string(),
            sysfs: cols[1].to_string(),
            uuid: cols[2].to_string(),
        });
    }

    Ok(maps)
}

/// List the maps currently assembled by multipathd.
pub async fn show_maps(runner: &dyn CommandRunner) -> Result<Vec<MultipathMap>> {
    let output = runner.run_checked(TOOL, &["show", "maps"]).await?;
    parse_show_maps(&output.stdout)
}

/// Ask multipathd to re-read the size of a map after its paths were rescanned.
pub async fn resize_map(runner: &dyn CommandRunner, name: &str) -> Result<()> {
    let output = runner.run_checked(TOOL, &["resize", "map", name]).await?;
    let reply = output.stdout.trim();
    if reply.eq_ignore_ascii_case("ok") || reply.is_empty() {
        return Ok(());
    }
    Err(ConnectorError::CommandFailed {
        command: format!("{TOOL} resize map {name}"),
        stderr: reply.to_string(),
    })
}

/// `multipath -f`; the raw output lets the caller decide whether to retry.
pub async fn flush_map(runner: &dyn CommandRunner, name: &str) -> Result<CommandOutput> {
    runner.run("multipath", &["-f", name]).await
}
