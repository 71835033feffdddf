//! Fake-capacity engine (C6): writes and re-verifies up to 100 large test files to establish a
//! baseline write speed and flag devices that fake their advertised capacity. Follows a
//! query → loop → verify → summarize state-machine shape around the codec's write/verify loop.

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::cancel::CancelHandle;
use crate::codec::{self, CodecFailure};
use crate::config::CapacityConsts;
use crate::error::CapacityFailureKind;
use crate::fs_util::compact_timestamp;
use crate::progress::Tracker;
use crate::types::CapacityTestResult;

/// Run the fake-capacity test in `dir` using `free_bytes` as the space available, writing with
/// `buffer_size` (typically C4-calibrated). `auto_delete` removes all created files on success.
pub fn run_capacity_test(
    dir: &Path,
    free_bytes: u64,
    buffer_size: usize,
    auto_delete: bool,
    cancel: &CancelHandle,
) -> CapacityTestResult {
    if free_bytes < CapacityConsts::MIN_FREE_BYTES {
        return CapacityTestResult {
            passed: false,
            files_created: 0,
            bytes_written: 0,
            baseline_mbps: 0.0,
            avg_mbps: 0.0,
            min_mbps: 0.0,
            max_mbps: 0.0,
            failure: Some(CapacityFailureKind::InsufficientSpace),
            preserved_paths: Vec::new(),
        };
    }

    let per_file_size = ((free_bytes as f64 * 0.95 / CapacityConsts::MAX_FILES as f64) as u64)
        .max(CapacityConsts::MIN_FILE_SIZE);

    let tracker = Tracker::new("capacity test", Some(CapacityConsts::MAX_FILES as u64));
    let mut paths: Vec<PathBuf> = Vec::new();
    let mut speeds: Vec<f64> = Vec::new();
    let mut baseline_mbps = 0.0;
    let mut bytes_written = 0u64;

    for i in 1..=CapacityConsts::MAX_FILES {
        if cancel.check().is_err() {
            for p in &paths {
                let _ = std::fs::remove_file(p);
            }
            return CapacityTestResult {
                passed: false,
                files_created: paths.len() as u32,
                bytes_written,
                baseline_mbps,
                avg_mbps: mean(&speeds),
                min_mbps: min_of(&speeds),
                max_mbps: max_of(&speeds),
                failure: Some(CapacityFailureKind::Cancelled),
                preserved_paths: Vec::new(),
            };
        }

        let path = dir.join(format!("FILL_{:03}_{}.tmp", i, compact_timestamp()));
        let start = Instant::now();
        if let Err(e) = codec::write_test_file(&path, per_file_size, buffer_size, cancel) {
            return CapacityTestResult {
                passed: false,
                files_created: paths.len() as u32,
                bytes_written,
                baseline_mbps,
                avg_mbps: mean(&speeds),
                min_mbps: min_of(&speeds),
                max_mbps: max_of(&speeds),
                failure: Some(CapacityFailureKind::CreateFailed {
                    index: i,
                    cause: e.to_string(),
                }),
                preserved_paths: paths,
            };
        }
        let elapsed = start.elapsed().as_secs_f64();
        let mbps = if elapsed > 0.0 {
            (per_file_size as f64 / elapsed) / (1024.0 * 1024.0)
        } else {
            0.0
        };
        paths.push(path);
        speeds.push(mbps);
        bytes_written += per_file_size;

        if let Err(failure) = smart_verify(&paths, i, per_file_size) {
            return CapacityTestResult {
                passed: false,
                files_created: paths.len() as u32,
                bytes_written,
                baseline_mbps,
                avg_mbps: mean(&speeds),
                min_mbps: min_of(&speeds),
                max_mbps: max_of(&speeds),
                failure: Some(failure),
                preserved_paths: paths,
            };
        }

        if i == CapacityConsts::BASELINE_SAMPLE_COUNT {
            baseline_mbps = mean(&speeds);
        }
        if i > CapacityConsts::BASELINE_SAMPLE_COUNT && baseline_mbps > 0.0 {
            if mbps < CapacityConsts::SPEED_LOW_FACTOR * baseline_mbps {
                return CapacityTestResult {
                    passed: false,
                    files_created: paths.len() as u32,
                    bytes_written,
                    baseline_mbps,
                    avg_mbps: mean(&speeds),
                    min_mbps: min_of(&speeds),
                    max_mbps: max_of(&speeds),
                    failure: Some(CapacityFailureKind::SpeedTooLow { index: i }),
                    preserved_paths: paths,
                };
            }
            if mbps > CapacityConsts::SPEED_HIGH_FACTOR * baseline_mbps {
                return CapacityTestResult {
                    passed: false,
                    files_created: paths.len() as u32,
                    bytes_written,
                    baseline_mbps,
                    avg_mbps: mean(&speeds),
                    min_mbps: min_of(&speeds),
                    max_mbps: max_of(&speeds),
                    failure: Some(CapacityFailureKind::SpeedTooHigh { index: i }),
                    preserved_paths: paths,
                };
            }
        }

        tracker.update(i as u64, bytes_written);
    }

    if auto_delete {
        for p in &paths {
            let _ = std::fs::remove_file(p);
        }
    }

    CapacityTestResult {
        passed: true,
        files_created: paths.len() as u32,
        bytes_written,
        baseline_mbps,
        avg_mbps: mean(&speeds),
        min_mbps: min_of(&speeds),
        max_mbps: max_of(&speeds),
        failure: None,
        preserved_paths: if auto_delete { Vec::new() } else { paths },
    }
}

/// Apply the smart O(N) verification schedule at iteration `i`: the current file always, every
/// 5th a full verify (others quick), plus periodic re-checks of earlier milestone files.
fn smart_verify(paths: &[PathBuf], i: u32, expected_size: u64) -> Result<(), CapacityFailureKind> {
    let current_idx = (i - 1) as usize;
    let full = i.is_multiple_of(5);
    verify_one(paths, current_idx, i, expected_size, full)?;

    if i.is_multiple_of(5) {
        verify_one(paths, 0, i, expected_size, false)?;
    }
    if i.is_multiple_of(10) {
        verify_one(paths, 4, i, expected_size, false)?;
    }
    if i.is_multiple_of(20) {
        verify_one(paths, 9, i, expected_size, false)?;
    }
    Ok(())
}

fn verify_one(
    paths: &[PathBuf],
    idx: usize,
    current_i: u32,
    expected_size: u64,
    full: bool,
) -> Result<(), CapacityFailureKind> {
    let Some(path) = paths.get(idx) else {
        return Ok(());
    };
    let result = if full {
        codec::verify_full(path, Some(expected_size))
    } else {
        codec::verify_quick(path, Some(expected_size))
    };
    result.map_err(|codec_failure: CodecFailure| CapacityFailureKind::VerifyFailed {
        index: current_i,
        failing_index: idx as u32 + 1,
        codec_failure,
    })
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn min_of(values: &[f64]) -> f64 {
    values.iter().cloned().fold(f64::INFINITY, f64::min).max(0.0)
}

fn max_of(values: &[f64]) -> f64 {
    values.iter().cloned().fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_insufficient_free_space() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelHandle::new();
        let result = run_capacity_test(dir.path(), 10 * 1024 * 1024, 1024 * 1024, false, &cancel);
        assert!(!result.passed);
        assert_eq!(result.failure, Some(CapacityFailureKind::InsufficientSpace));
    }

    #[test]
    fn small_run_completes_and_preserves_files_when_not_auto_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelHandle::new();
        // Free space large enough that per_file_size stays at the 1 MiB floor, keeping this fast.
        let result = run_capacity_test(
            dir.path(),
            CapacityConsts::MIN_FREE_BYTES,
            64 * 1024,
            false,
            &cancel,
        );
        assert!(result.passed);
        assert_eq!(result.files_created, CapacityConsts::MAX_FILES);
        assert_eq!(result.preserved_paths.len(), CapacityConsts::MAX_FILES as usize);
        for p in &result.preserved_paths {
            assert!(p.exists());
        }
    }

    #[test]
    fn cancellation_mid_run_cleans_up_created_files() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelHandle::new();
        cancel.cancel();
        let result = run_capacity_test(
            dir.path(),
            CapacityConsts::MIN_FREE_BYTES,
            64 * 1024,
            false,
            &cancel,
        );
        assert!(!result.passed);
        assert_eq!(result.failure, Some(CapacityFailureKind::Cancelled));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
