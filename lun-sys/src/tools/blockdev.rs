// SPDX-License-Identifier: GPL-3.0-only

use lun_contracts::{CommandRunner, ConnectorError, Result};
use tracing::debug;

/// Flush buffered writes of a device. Returns `false` when the device is already gone.
pub async fn flush_buffers(runner: &dyn CommandRunner, device: &str) -> Result<bool> {
    let dev_path = format!("/dev/{device}");
    let output = runner.run("blockdev", &["--flushbufs", &dev_path]).await?;
    if output.success {
        return Ok(true);
    }
    if output.reports_absent() {
        debug!(device, "device already gone, nothing to flush");
        return Ok(false);
    }
    Err(ConnectorError::CommandFailed {
        command: format!("blockdev --flushbufs {dev_path}"),
        stderr: output.stderr,
    })
}
