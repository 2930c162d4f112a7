// SPDX-License-Identifier: GPL-3.0-only

//! UltraPath management CLI (`upadmin` for SCSI, `upadmin_plus` for NVMe)

use std::sync::LazyLock;

use lun_contracts::{CommandRunner, ConnectorError, Result};
use lun_types::{Hctl, VLun, VendorVariant};
use regex::Regex;
use tracing::debug;

static PATH_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Path\s+\d+\s+\[(\d+:\d+:\d+:\d+)\]").expect("valid path regex")
});

fn is_separator(line: &str) -> bool {
    line.chars().all(|c| c == '-' || c == '=' || c.is_whitespace())
}

fn parse_vlun_table(output: &str, variant: VendorVariant) -> Result<Vec<VLun>> {
    let tool = variant.cli();
    let mut vluns = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || is_separator(line) || line.starts_with("Vlun ID") {
            continue;
        }

        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 5 {
            return Err(ConnectorError::parse(
                tool,
                format!("expected at least 5 vlun columns, got {}: {line}", cols.len()),
            ));
        }

        let id = cols[0]
            .parse::<u32>()
            .map_err(|_| ConnectorError::parse(tool, format!("invalid vlun id: {line}")))?;

        vluns.push(VLun {
            id,
            disk_name: cols[1].to_string(),
            name: cols[2].to_string(),
            wwn: cols[3].to_string(),
            status: cols[4].to_string(),
            variant,
        });
    }

    Ok(vluns)
}

fn parse_vlun_paths(output: &str, variant: VendorVariant) -> Result<Vec<Hctl>> {
    let mut paths = Vec::new();
    for line in output.lines() {
        if let Some(captures) = PATH_LINE.captures(line) {
            let hctl = captures[1]
                .parse::<Hctl>()
                .map_err(|error| ConnectorError::parse(variant.cli(), error.to_string()))?;
            paths.push(hctl);
        }
    }
    Ok(paths)
}

/// All virtual LUNs known to UltraPath.
pub async fn show_vluns(runner: &dyn CommandRunner, variant: VendorVariant) -> Result<Vec<VLun>> {
    let output = runner.run_checked(variant.cli(), &["show", "vlun"]).await?;
    let vluns = parse_vlun_table(&output.stdout, variant)?;
    debug!(tool = variant.cli(), count = vluns.len(), "listed vluns");
    Ok(vluns)
}

/// SCSI paths (HCTL) backing one virtual LUN.
pub async fn show_vlun_paths(
    runner: &dyn CommandRunner,
    variant: VendorVariant,
    vlun_id: u32,
) -> Result<Vec<Hctl>> {
    let id = format!("id={vlun_id}");
    let output = runner
        .run_checked(variant.cli(), &["show", "vlun", &id])
        .await?;
    parse_vlun_paths(&output.stdout, variant)
}

/// Zero the I/O suspension timer so outstanding I/O fails fast during teardown.
pub async fn disable_io_suspension(runner: &dyn CommandRunner, vlun_id: u32) -> Result<()> {
    let id = format!("vlun_id={vlun_id}");
    runner
        .run_checked(
            VendorVariant::Nvme.cli(),
            &["set", "iosuspensiontime=0", &id],
        )
        .await?;
    Ok(())
}

/// Remove a virtual LUN; an already-removed one counts as success.
pub async fn delete_vlun(
    runner: &dyn CommandRunner,
    variant: VendorVariant,
    vlun_id: u32,
) -> Result<()> {
    let id = format!("id={vlun_id}");
    let args = ["del", "vlun", id.as_str()];
    let output = runner.run(variant.cli(), &args).await?;
    if output.success || output.reports_absent() {
        return Ok(());
    }
    Err(ConnectorError::CommandFailed {
        command: format!("{} {}", variant.cli(), args.join(" ")),
        stderr: output.stderr,
    })
}
