// SPDX-License-Identifier: GPL-3.0-only

//! Name-based classification of block devices found under `/dev/disk/by-id`

use lun_contracts::{ConnectorError, Result};
use lun_sys::paths;
use lun_sys::tools::{nvme::NamespaceName, upadmin};
use lun_types::{MultipathKind, VendorVariant};
use tracing::{debug, warn};

use crate::Host;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: MultipathKind,
    pub is_partition: bool,
}

#[derive(Clone)]
pub struct DeviceClassifier {
    host: Host,
    vendor_nvme_prefix: String,
}

fn ends_with_digit(name: &str) -> bool {
    name.chars().last().is_some_and(|c| c.is_ascii_digit())
}

impl DeviceClassifier {
    pub fn new(host: Host, vendor_nvme_prefix: impl Into<String>) -> Self {
        Self {
            host,
            vendor_nvme_prefix: vendor_nvme_prefix.into(),
        }
    }

    /// Classify one device name.
    ///
    /// Returns `Ok(None)` for names outside the known prefixes. A `dm-*` device
    /// whose alias cannot be read fails classification.
    pub async fn classify(&self, device: &str) -> Result<Option<Classification>> {
        let classification = if device.starts_with(&self.vendor_nvme_prefix) {
            Classification {
                kind: MultipathKind::VendorMultipathNvme,
                is_partition: ends_with_digit(device),
            }
        } else if device.starts_with("dm") {
            // dm-N always ends in a digit; the alias carries the partition suffix
            let alias = self
                .host
                .probe()
                .read_attr(&paths::dm_name(device))
                .map_err(|error| ConnectorError::Classification {
                    device: device.to_string(),
                    reason: format!("cannot read dm alias: {error}"),
                })?;
            Classification {
                kind: MultipathKind::DmMultipath,
                is_partition: ends_with_digit(&alias),
            }
        } else if device.starts_with("sd") {
            let kind = if self.is_vendor_owned(device).await? {
                MultipathKind::VendorMultipathScsi
            } else {
                MultipathKind::None
            };
            Classification {
                kind,
                is_partition: ends_with_digit(device),
            }
        } else if device.starts_with("nvme") {
            Classification {
                kind: MultipathKind::None,
                is_partition: NamespaceName::parse(device)
                    .is_some_and(|ns| ns.partition.is_some()),
            }
        } else {
            warn!(device, "unrecognized device prefix, skipping");
            return Ok(None);
        };

        debug!(
            device,
            kind = %classification.kind,
            partition = classification.is_partition,
            "classified device"
        );
        Ok(Some(classification))
    }

    /// Whether UltraPath presents `device` as one of its virtual disks.
    async fn is_vendor_owned(&self, device: &str) -> Result<bool> {
        match upadmin::show_vluns(self.host.runner(), VendorVariant::Scsi).await {
            Ok(vluns) => Ok(vluns.iter().any(|vlun| vlun.disk_name == device)),
            Err(ConnectorError::ToolMissing(_)) => Ok(false),
            Err(error) => Err(error),
        }
    }
}
