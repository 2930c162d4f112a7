// SPDX-License-Identifier: GPL-3.0-only

//! LUN identity and SCSI path addressing

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("LUN identifier must not be empty")]
pub struct InvalidLunId;

/// Array-assigned WWN/GUID of a logical unit.
///
/// Stable across hosts, used both to find devices and as the lock key.
/// Tool output reports it in varying case and often with a NAA or `eui.`
/// prefix, so matching is case-insensitive and suffix/substring based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LunId(String);

impl LunId {
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidLunId> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return Err(InvalidLunId);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `reported` ends with this identifier (e.g. `3` + WWN from multipathd).
    pub fn is_suffix_of(&self, reported: &str) -> bool {
        reported
            .trim()
            .to_ascii_lowercase()
            .ends_with(&self.0.to_ascii_lowercase())
    }

    /// True when `text` contains this identifier anywhere (by-id link names, wwid files).
    pub fn is_contained_in(&self, text: &str) -> bool {
        text.to_ascii_lowercase()
            .contains(&self.0.to_ascii_lowercase())
    }
}

impl fmt::Display for LunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LunId {
    type Error = InvalidLunId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LunId> for String {
    fn from(value: LunId) -> Self {
        value.0
    }
}

impl FromStr for LunId {
    type Err = InvalidLunId;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid host:channel:target:lun tuple: {0}")]
pub struct InvalidHctl(pub String);

/// Host:Channel:Target:Lun address of one SCSI path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hctl {
    pub host: u32,
    pub channel: u32,
    pub target: u32,
    pub lun: u32,
}

impl Hctl {
    /// Directory of this path under `/sys/class/scsi_device`.
    pub fn sysfs_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Hctl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.host, self.channel, self.target, self.lun)
    }
}

impl FromStr for Hctl {
    type Err = InvalidHctl;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.trim().split(':').collect();
        if parts.len() != 4 {
            return Err(InvalidHctl(value.to_string()));
        }

        let parse = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| InvalidHctl(value.to_string()))
        };

        Ok(Self {
            host: parse(parts[0])?,
            channel: parse(parts[1])?,
            target: parse(parts[2])?,
            lun: parse(parts[3])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_lun_id() {
        assert_eq!(LunId::new("   "), Err(InvalidLunId));
        assert!(serde_json::from_str::<LunId>("\"\"").is_err());
    }

    #[test]
    fn matches_reported_wwids_case_insensitively() {
        let lun = LunId::new("6A0B1C2D00000003").expect("lun id");
        assert!(lun.is_suffix_of("36a0b1c2d00000003"));
        assert!(!lun.is_suffix_of("36a0b1c2d00000004"));
        assert!(lun.is_contained_in("wwn-0x6a0b1c2d00000003"));
    }

    #[test]
    fn parses_hctl_tuples() {
        let hctl: Hctl = "7:0:2:11".parse().expect("hctl");
        assert_eq!(hctl.host, 7);
        assert_eq!(hctl.lun, 11);
        assert_eq!(hctl.to_string(), "7:0:2:11");
        assert!("7:0:2".parse::<Hctl>().is_err());
        assert!("7:0:x:1".parse::<Hctl>().is_err());
    }
}
