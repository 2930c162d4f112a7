// SPDX-License-Identifier: GPL-3.0-only

//! Typed requests accepted by the connectors

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{LunId, Transport};

/// Transport protocol used to present the LUN to this host.
///
/// Login has already happened when a request reaches the agent; the protocol
/// only selects how devices are identified and rescanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    Iscsi,
    Fc,
    Roce,
    FcNvme,
    Local,
}

impl Protocol {
    pub const ALL: [Protocol; 5] = [
        Protocol::Iscsi,
        Protocol::Fc,
        Protocol::Roce,
        Protocol::FcNvme,
        Protocol::Local,
    ];

    pub fn transport(self) -> Transport {
        match self {
            Protocol::Iscsi | Protocol::Fc | Protocol::Local => Transport::Scsi,
            Protocol::Roce | Protocol::FcNvme => Transport::Nvme,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Iscsi => "iscsi",
            Protocol::Fc => "fc",
            Protocol::Roce => "roce",
            Protocol::FcNvme => "fc-nvme",
            Protocol::Local => "local",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Protocol::ALL
            .into_iter()
            .find(|protocol| protocol.as_str() == value)
            .ok_or_else(|| format!("unsupported protocol: {value}"))
    }
}

/// Multipathing stack the host is configured to use for this volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultipathMode {
    None,
    #[default]
    Dm,
    Vendor,
}

/// Direction of an attach/detach operation; selects the semaphore pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Connect,
    Disconnect,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Connect => "connect",
            Operation::Disconnect => "disconnect",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub protocol: Protocol,
    pub lun_wwn: LunId,
    /// Number of physical paths the transport login produced
    pub expected_paths: usize,
    pub multipath: MultipathMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeRequest {
    pub lun_wwn: LunId,
    pub required_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_names_roundtrip_through_from_str() {
        for protocol in Protocol::ALL {
            assert_eq!(protocol.as_str().parse::<Protocol>(), Ok(protocol));
        }
        assert!("nfs".parse::<Protocol>().is_err());
    }

    #[test]
    fn nvme_protocols_use_nvme_transport() {
        assert_eq!(Protocol::Roce.transport(), Transport::Nvme);
        assert_eq!(Protocol::Iscsi.transport(), Transport::Scsi);
    }
}
