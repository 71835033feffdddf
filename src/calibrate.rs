//! Buffer-size calibrator (C4): writes a probe file at each candidate buffer size and picks the
//! fastest, memoized per absolute directory path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use crate::cancel::CancelHandle;
use crate::config::CalibrationConsts;
use crate::error::FiledoError;

/// Per-directory calibration memo. Constructed once at the CLI entry point and passed by
/// reference into engines, rather than a process-wide singleton.
#[derive(Default)]
pub struct CalibrationMemo {
    table: Mutex<HashMap<PathBuf, usize>>,
}

impl CalibrationMemo {
    pub fn new() -> Self {
        CalibrationMemo::default()
    }

    /// Measure sequential write throughput in `dir` at each candidate buffer size and return the
    /// fastest. Failures at a given size are skipped rather than aborting the whole calibration.
    /// Cancellation-aware: bails out early with [`FiledoError::Cancelled`].
    pub fn calibrate(&self, dir: &Path, cancel: &CancelHandle) -> Result<usize, FiledoError> {
        let key = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());

        if let Some(&cached) = self.table.lock().unwrap().get(&key) {
            return Ok(cached);
        }

        let mut best: Option<(usize, f64)> = None;
        for &mib in CalibrationConsts::CANDIDATE_SIZES_MIB {
            cancel.check()?;
            let buffer_size = (mib * 1024 * 1024) as usize;
            match measure_one(&key, buffer_size, cancel) {
                Ok(mbps) => {
                    if best.map(|(_, b)| mbps > b).unwrap_or(true) {
                        best = Some((buffer_size, mbps));
                    }
                }
                Err(FiledoError::Cancelled) => return Err(FiledoError::Cancelled),
                Err(_) => continue, // candidate failed; try the next size
            }
        }

        let chosen = best.map(|(size, _)| size).unwrap_or(CalibrationConsts::FALLBACK_BUFFER);
        self.table.lock().unwrap().insert(key, chosen);
        Ok(chosen)
    }
}

fn measure_one(dir: &Path, buffer_size: usize, cancel: &CancelHandle) -> Result<f64, FiledoError> {
    let probe_path = dir.join(format!(".filedo_calibrate_{}.tmp", std::process::id()));
    let buffer = vec![0xABu8; buffer_size];
    let target = CalibrationConsts::TEST_FILE_SIZE;

    let result = (|| -> Result<f64, FiledoError> {
        let mut file = std::fs::File::create(&probe_path).map_err(FiledoError::from_io_or_disk_full)?;
        let start = Instant::now();
        let mut written = 0u64;
        use std::io::Write;
        while written < target {
            cancel.check()?;
            let chunk = (target - written).min(buffer.len() as u64) as usize;
            file.write_all(&buffer[..chunk]).map_err(FiledoError::from_io_or_disk_full)?;
            written += chunk as u64;
        }
        file.sync_all().map_err(FiledoError::from_io_or_disk_full)?;
        let secs = start.elapsed().as_secs_f64();
        if secs <= 0.0 {
            return Ok(0.0);
        }
        Ok((written as f64 / secs) / (1024.0 * 1024.0))
    })();

    let _ = std::fs::remove_file(&probe_path);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_a_buffer_size_and_memoizes() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelHandle::new();
        let memo = CalibrationMemo::new();
        let size = memo.calibrate(dir.path(), &cancel).unwrap();
        assert!(size > 0);
        let size2 = memo.calibrate(dir.path(), &cancel).unwrap();
        assert_eq!(size, size2);
    }

    #[test]
    fn cancellation_is_observed() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelHandle::new();
        cancel.cancel();
        let memo = CalibrationMemo::new();
        let err = memo.calibrate(dir.path(), &cancel).unwrap_err();
        assert!(matches!(err, FiledoError::Cancelled));
    }
}
