// SPDX-License-Identifier: GPL-3.0-only

use lun_contracts::{CommandRunner, ConnectorError, Result};

fn parse_size(output: &str) -> Result<u64> {
    let value = output.trim();
    value
        .parse::<u64>()
        .map_err(|_| ConnectorError::parse("lsblk", format!("invalid size: {value:?}")))
}

/// Size of a whole device in bytes.
pub async fn device_size(runner: &dyn CommandRunner, device: &str) -> Result<u64> {
    let dev_path = format!("/dev/{device}");
    let output = runner
        .run_checked("lsblk", &["-bdn", "-o", "SIZE", &dev_path])
        .await?;
    parse_size(&output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_byte_size() {
        assert_eq!(parse_size(" 10737418240\n").expect("size"), 10_737_418_240);
        assert!(parse_size("10G").is_err());
        assert!(parse_size("10737418240\n10737418240").is_err());
    }
}
