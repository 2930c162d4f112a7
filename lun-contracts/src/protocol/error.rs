// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification callers use to decide between retrying and escalating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    /// Host state contradicts the expected topology; needs an operator.
    Inconsistency,
    Timeout,
    CommandFailure,
    ParseFailure,
    Unavailable,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Whether a higher layer may simply try the same call again.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::Timeout | Self::CommandFailure | Self::Unavailable
        )
    }
}

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("device {device} matched LUN {lun} but is a partition; clean up the host before retrying")]
    PartitionFound { lun: String, device: String },

    #[error("virtual device not unique for LUN {lun}: {devices:?}")]
    VirtualDeviceNotUnique { lun: String, devices: Vec<String> },

    #[error("physical device not unique for LUN {lun}: {devices:?}")]
    PhysicalDeviceNotUnique { lun: String, devices: Vec<String> },

    #[error("inconsistent WWN on {device}: expected {expected}, found {actual}")]
    InconsistentWwn {
        device: String,
        expected: String,
        actual: String,
    },

    #[error("cannot classify device {device}: {reason}")]
    Classification { device: String, reason: String },

    #[error("volume {0} not found")]
    VolumeNotFound(String),

    #[error("multipath device {device} of LUN {lun} has {found} of {expected} paths")]
    PathIncomplete {
        lun: String,
        device: String,
        found: usize,
        expected: usize,
    },

    #[error("multipath device {0} has no usable paths")]
    MultipathUnavailable(String),

    #[error("devices still present after removal: {0:?}")]
    DeviceRemovalTimeout(Vec<String>),

    #[error("timed out waiting for lock on LUN {0}")]
    LockTimeout(String),

    #[error("timed out waiting for a {0} slot")]
    SemaphoreTimeout(String),

    #[error("multipath map {0} could not be flushed")]
    FlushPending(String),

    #[error("device {device} is {size} bytes, expected at least {required}")]
    ResizeIncomplete {
        device: String,
        size: u64,
        required: u64,
    },

    #[error("command failed: {command}; stderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("required tool not installed: {0}")]
    ToolMissing(String),

    #[error("unexpected {tool} output: {reason}")]
    Parse { tool: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectorError {
    pub fn parse(tool: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidInput,
            Self::PartitionFound { .. }
            | Self::VirtualDeviceNotUnique { .. }
            | Self::PhysicalDeviceNotUnique { .. }
            | Self::InconsistentWwn { .. }
            | Self::Classification { .. } => ErrorKind::Inconsistency,
            Self::VolumeNotFound(_) => ErrorKind::NotFound,
            Self::PathIncomplete { .. }
            | Self::DeviceRemovalTimeout(_)
            | Self::LockTimeout(_)
            | Self::SemaphoreTimeout(_)
            | Self::ResizeIncomplete { .. } => ErrorKind::Timeout,
            Self::MultipathUnavailable(_) => ErrorKind::Unavailable,
            Self::FlushPending(_) | Self::CommandFailed { .. } | Self::ToolMissing(_) => {
                ErrorKind::CommandFailure
            }
            Self::Parse { .. } => ErrorKind::ParseFailure,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inconsistencies_are_never_retryable() {
        let error = ConnectorError::VirtualDeviceNotUnique {
            lun: "7100e98b03".to_string(),
            devices: vec!["dm-2".to_string(), "dm-3".to_string()],
        };
        assert_eq!(error.kind(), ErrorKind::Inconsistency);
        assert!(!error.kind().is_retryable());
    }

    #[test]
    fn timeouts_are_retryable() {
        let error = ConnectorError::LockTimeout("7100e98b03".to_string());
        assert!(error.kind().is_retryable());
        assert_eq!(
            ConnectorError::SemaphoreTimeout("connect".to_string()).kind(),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ParseFailure).expect("serialize kind");
        assert_eq!(json, "\"parse_failure\"");
    }
}
