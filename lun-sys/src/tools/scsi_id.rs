// SPDX-License-Identifier: GPL-3.0-only

use lun_contracts::{CommandRunner, ConnectorError, Result};

pub const SCSI_ID: &str = "/lib/udev/scsi_id";

/// Page 0x83 WWID of a SCSI device (e.g. "36a0b1c2d00000003").
pub async fn device_wwid(runner: &dyn CommandRunner, device: &str) -> Result<String> {
    let dev_path = format!("/dev/{device}");
    let output = runner
        .run_checked(SCSI_ID, &["-g", "-u", "-d", &dev_path])
        .await?;
    let wwid = output.stdout.trim();
    if wwid.is_empty() || wwid.contains(char::is_whitespace) {
        return Err(ConnectorError::parse(
            "scsi_id",
            format!("unexpected wwid for {device}: {wwid:?}"),
        ));
    }
    Ok(wwid.to_string())
}
