//! Fill/secure-wipe engine (C7): materializes one template file and clones it concurrently to
//! fill free space (Fill mode) or deletes existing test files (Clean mode), dispatched through
//! a fixed worker pool over a crossbeam channel.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};
use rayon::ThreadPoolBuilder;

use crate::cancel::CancelHandle;
use crate::codec;
use crate::config::FillConsts;
use crate::error::FiledoError;
use crate::fs_util::{cap_workers_by_fd_limit, compact_timestamp, glob_match};

/// Worker-count hint the caller derives from the target's volume kind, so the engine itself
/// never needs to infer it.
#[derive(Debug, Clone, Copy)]
pub enum WorkerHint {
    Ssd,
    Hdd,
    RemovableOrNetwork,
}

impl WorkerHint {
    fn fill_workers(self) -> usize {
        match self {
            WorkerHint::Ssd => FillConsts::WORKERS_SSD,
            WorkerHint::Hdd => FillConsts::WORKERS_HDD,
            WorkerHint::RemovableOrNetwork => FillConsts::WORKERS_REMOVABLE_OR_NETWORK,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FillResult {
    pub files_written: u64,
    pub bytes_written: u64,
    pub preserved_paths: Vec<PathBuf>,
}

/// Fill mode: clone a template of `file_size_bytes` into `dir` until free space (estimated from
/// `free_bytes`) or `max_files` (whichever is smaller) is exhausted, or a clone hits disk-full.
pub fn run_fill(
    dir: &Path,
    file_size_bytes: u64,
    free_bytes: Option<u64>,
    hint: WorkerHint,
    buffer_size: usize,
    auto_delete: bool,
    cancel: &CancelHandle,
) -> Result<FillResult, FiledoError> {
    let template_path = dir.join(format!("FILL_template_{}.tmp", compact_timestamp()));
    codec::write_test_file(&template_path, file_size_bytes, buffer_size, cancel)?;
    cancel.register_cleanup({
        let template_path = template_path.clone();
        move || {
            let _ = std::fs::remove_file(&template_path);
        }
    });

    let upper_bound = match free_bytes {
        Some(free) => (free / file_size_bytes.max(1)).max(1),
        None => FillConsts::NETWORK_SOFT_CAP,
    };

    let workers = cap_workers_by_fd_limit(hint.fill_workers());
    let (tx, rx) = bounded::<u64>(workers * 2);
    let bytes_written = Arc::new(AtomicU64::new(0));
    let written_paths: Arc<std::sync::Mutex<Vec<PathBuf>>> = Arc::new(std::sync::Mutex::new(Vec::new()));

    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| FiledoError::Config(e.to_string()))?;

    let producer_cancel = cancel.context();
    let producer = std::thread::spawn(move || {
        for i in 1..=upper_bound {
            if producer_cancel.is_cancelled() {
                break;
            }
            if tx.send(i).is_err() {
                break;
            }
        }
    });

    pool.scope({
        let template_path = &template_path;
        let cancel = cancel.context();
        let bytes_written = Arc::clone(&bytes_written);
        let written_paths = Arc::clone(&written_paths);
        let rx: Receiver<u64> = rx;
        move |scope| {
            for _ in 0..workers {
                let rx = rx.clone();
                let cancel = cancel.context();
                let bytes_written = Arc::clone(&bytes_written);
                let written_paths = Arc::clone(&written_paths);
                scope.spawn(move |_| {
                    while let Ok(i) = rx.recv() {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let dest = dir.join(format!("FILL_{:05}_{}.tmp", i, compact_timestamp()));
                        match std::fs::copy(template_path, &dest) {
                            Ok(bytes) => {
                                bytes_written.fetch_add(bytes, Ordering::Relaxed);
                                written_paths.lock().unwrap().push(dest);
                            }
                            Err(e) => {
                                let classified = FiledoError::from_io_or_disk_full(e);
                                if matches!(classified, FiledoError::DiskFull(_)) {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        }
    });

    let _ = producer.join();
    let _ = std::fs::remove_file(&template_path);

    let mut paths = written_paths.lock().unwrap().clone();
    let total_bytes = bytes_written.load(Ordering::Relaxed);

    if cancel.is_cancelled() {
        if auto_delete {
            // Same full re-scan-and-delete as the success path below, not just the paths this
            // run tracked in memory: stale FILL_*.tmp files from earlier runs must go too. Uses
            // a fresh handle since `clean_matching`'s workers bail immediately on a cancelled one.
            let _ = clean_matching(dir, &CancelHandle::new(), 4);
            paths.clear();
        }
        return Err(FiledoError::Cancelled);
    }

    if auto_delete {
        let (deleted, _) = clean_matching(dir, cancel, 4)?;
        return Ok(FillResult {
            files_written: deleted,
            bytes_written: total_bytes,
            preserved_paths: Vec::new(),
        });
    }

    Ok(FillResult {
        files_written: paths.len() as u64,
        bytes_written: total_bytes,
        preserved_paths: paths,
    })
}

#[derive(Debug, Clone, Default)]
pub struct CleanResult {
    pub deleted: u64,
    pub bytes_freed: u64,
    pub failures: u64,
}

/// Clean mode: delete every `FILL_*.tmp` / `speedtest_*.txt` in `dir` using a worker pool,
/// reporting progress every 200ms.
pub fn run_clean(dir: &Path, is_network: bool, cancel: &CancelHandle) -> Result<CleanResult, FiledoError> {
    let workers = if is_network {
        FillConsts::CLEAN_WORKERS_NETWORK
    } else {
        FillConsts::CLEAN_WORKERS_LOCAL
    };
    let (deleted, bytes_freed) = clean_matching(dir, cancel, cap_workers_by_fd_limit(workers))?;
    Ok(CleanResult {
        deleted,
        bytes_freed,
        failures: 0,
    })
}

fn clean_matching(dir: &Path, cancel: &CancelHandle, workers: usize) -> Result<(u64, u64), FiledoError> {
    let entries: Vec<(PathBuf, u64)> = std::fs::read_dir(dir)
        .map_err(FiledoError::from_io_or_disk_full)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            glob_match("FILL_*.tmp", &name) || glob_match("speedtest_*.txt", &name)
        })
        .filter_map(|e| e.metadata().ok().map(|m| (e.path(), m.len())))
        .collect();

    let total = entries.len();
    let deleted = Arc::new(AtomicU64::new(0));
    let bytes_freed = Arc::new(AtomicU64::new(0));
    let last_report = Arc::new(std::sync::Mutex::new(Instant::now()));

    let pool = ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|e| FiledoError::Config(e.to_string()))?;

    pool.scope(|scope| {
        for (path, size) in entries {
            let cancel = cancel.context();
            let deleted = Arc::clone(&deleted);
            let bytes_freed = Arc::clone(&bytes_freed);
            let last_report = Arc::clone(&last_report);
            scope.spawn(move |_| {
                if cancel.is_cancelled() {
                    return;
                }
                if std::fs::remove_file(&path).is_ok() {
                    let n = deleted.fetch_add(1, Ordering::Relaxed) + 1;
                    bytes_freed.fetch_add(size, Ordering::Relaxed);
                    let mut last = last_report.lock().unwrap();
                    if last.elapsed() >= Duration::from_millis(FillConsts::CLEAN_PROGRESS_INTERVAL_MS) {
                        println!("{n}/{total}, {} bytes freed", bytes_freed.load(Ordering::Relaxed));
                        *last = Instant::now();
                    }
                }
            });
        }
    });

    Ok((
        deleted.load(Ordering::Relaxed),
        bytes_freed.load(Ordering::Relaxed),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_then_clean_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelHandle::new();
        let result = run_fill(
            dir.path(),
            64 * 1024,
            Some(10 * 1024 * 1024),
            WorkerHint::Hdd,
            16 * 1024,
            false,
            &cancel,
        )
        .unwrap();
        assert!(result.files_written > 0);
        let templates = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("FILL_template_"))
            .count();
        assert_eq!(templates, 0);

        let clean = run_clean(dir.path(), false, &cancel).unwrap();
        assert_eq!(clean.deleted, result.files_written);
    }

    #[test]
    fn cancelled_auto_delete_removes_stale_leftovers_too() {
        let dir = tempfile::tempdir().unwrap();
        // Simulate a leftover from an earlier, unrelated run that this run never tracked.
        std::fs::write(dir.path().join("FILL_09999_stale.tmp"), b"leftover").unwrap();

        let cancel = CancelHandle::new();
        cancel.cancel();
        let err = run_fill(
            dir.path(),
            64 * 1024,
            Some(10 * 1024 * 1024),
            WorkerHint::Hdd,
            16 * 1024,
            true,
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, FiledoError::Cancelled));

        let remaining = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("FILL_"))
            .count();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn clean_ignores_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("FILL_00001_x.tmp"), b"y").unwrap();
        let cancel = CancelHandle::new();
        let clean = run_clean(dir.path(), false, &cancel).unwrap();
        assert_eq!(clean.deleted, 1);
        assert!(dir.path().join("keep.txt").exists());
    }
}
