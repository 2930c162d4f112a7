// SPDX-License-Identifier: GPL-3.0-only

//! NVMe namespace naming and rescans

use std::sync::LazyLock;

use lun_contracts::{CommandRunner, Result};
use regex::Regex;

static NAMESPACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^nvme(\d+)n(\d+)(?:p(\d+))?$").expect("valid namespace regex")
});

/// Parsed `nvme<ctrl>n<ns>[p<part>]` device name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceName {
    pub controller: u32,
    pub namespace: u32,
    pub partition: Option<u32>,
}

impl NamespaceName {
    pub fn parse(device: &str) -> Option<Self> {
        let captures = NAMESPACE.captures(device)?;
        Some(Self {
            controller: captures[1].parse().ok()?,
            namespace: captures[2].parse().ok()?,
            partition: captures.get(3).and_then(|part| part.as_str().parse().ok()),
        })
    }

    pub fn controller_name(&self) -> String {
        format!("nvme{}", self.controller)
    }
}

/// Rescan the namespaces of a controller so a grown namespace reports its new size.
pub async fn ns_rescan(runner: &dyn CommandRunner, controller: &str) -> Result<()> {
    let dev_path = format!("/dev/{controller}");
    runner.run_checked("nvme", &["ns-rescan", &dev_path]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_namespaces_and_partitions() {
        let ns = NamespaceName::parse("nvme1n2").expect("namespace");
        assert_eq!(ns.controller_name(), "nvme1");
        assert_eq!(ns.partition, None);

        let part = NamespaceName::parse("nvme0n1p3").expect("partition");
        assert_eq!(part.partition, Some(3));

        assert!(NamespaceName::parse("nvme0").is_none());
        assert!(NamespaceName::parse("sda1").is_none());
    }
}
