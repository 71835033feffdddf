//! Error taxonomy (tagged sum, not stringly-typed) shared across engines.

use std::path::PathBuf;
use thiserror::Error;

use crate::codec::CodecFailure;

/// Substrings that identify a disk-full condition across platforms/locales when an OS error
/// code isn't available. Kept small and localizable.
const DISK_FULL_SUBSTRINGS: &[&str] = &[
    "no space",
    "disk full",
    "insufficient disk",
    "not enough space",
];

/// Speed anomaly direction for the fake-capacity engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedAnomalyKind {
    TooLow,
    TooHigh,
}

#[derive(Debug, Error)]
pub enum FiledoError {
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("insufficient space: {0}")]
    InsufficientSpace(String),

    #[error("disk full: {0}")]
    DiskFull(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("verification failed: {0:?}")]
    Verification(CodecFailure),

    #[error("speed anomaly ({kind:?}) at file {index}: observed {observed:.2} MiB/s, baseline {baseline:.2} MiB/s")]
    SpeedAnomaly {
        kind: SpeedAnomalyKind,
        index: u32,
        observed: f64,
        baseline: f64,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),
}

impl FiledoError {
    /// Classify an `io::Error` as `DiskFull` (by OS error code when available, else by a
    /// localizable substring match) or a generic `Io` otherwise.
    pub fn from_io_or_disk_full(err: std::io::Error) -> Self {
        if is_disk_full_os_error(&err) || is_disk_full_message(&err.to_string()) {
            return FiledoError::DiskFull(err.to_string());
        }
        FiledoError::Io(err)
    }
}

#[cfg(unix)]
fn is_disk_full_os_error(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOSPC)
}

#[cfg(not(unix))]
fn is_disk_full_os_error(_err: &std::io::Error) -> bool {
    false
}

fn is_disk_full_message(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    DISK_FULL_SUBSTRINGS.iter().any(|s| lower.contains(s))
}

/// Failure kinds surfaced by the fake-capacity engine. Distinct from `FiledoError` so
/// `CapacityTestResult::failure` can be stored/compared without wrapping `anyhow`/`thiserror` noise.
#[derive(Debug, Clone, PartialEq)]
pub enum CapacityFailureKind {
    InsufficientSpace,
    CreateFailed { index: u32, cause: String },
    VerifyFailed { index: u32, failing_index: u32, codec_failure: CodecFailure },
    SpeedTooLow { index: u32 },
    SpeedTooHigh { index: u32 },
    Cancelled,
}

impl CapacityFailureKind {
    /// Human-readable reason, suitable for a history record's `error` field.
    pub fn describe(&self) -> String {
        match self {
            CapacityFailureKind::InsufficientSpace => "insufficient space".to_string(),
            CapacityFailureKind::CreateFailed { index, cause } => {
                format!("create failed at file {index}: {cause}")
            }
            CapacityFailureKind::VerifyFailed { index, failing_index, codec_failure } => {
                format!("verify failed at file {index} (failing file {failing_index}): {codec_failure:?}")
            }
            CapacityFailureKind::SpeedTooLow { index } => format!("speed too low at file {index}"),
            CapacityFailureKind::SpeedTooHigh { index } => format!("speed too high at file {index}"),
            CapacityFailureKind::Cancelled => "cancelled".to_string(),
        }
    }
}

/// A path skipped during a walk, with the reason (for warn-level breakdowns), typed to
/// avoid String-matching the reason later.
#[derive(Debug, Clone)]
pub struct SkippedPath {
    pub path: PathBuf,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_disk_full_substrings() {
        assert!(is_disk_full_message("No space left on device"));
        assert!(is_disk_full_message("DISK FULL"));
        assert!(!is_disk_full_message("permission denied"));
    }
}
