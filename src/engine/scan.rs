//! Damage-scan engine (C8): streams file-read latencies against an adaptive threshold,
//! maintaining durable allow/block lists with resume support. A walker dispatches over a
//! bounded channel to workers; a single coordinator serializes access to shared state.

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelHandle;
use crate::config::ScanConsts;
use crate::error::FiledoError;
use crate::fs_util::cap_workers_by_fd_limit;
use crate::types::{DamageState, ScanCursor};

impl std::str::FromStr for ScanMode {
    type Err = FiledoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quick" => Ok(ScanMode::Quick),
            "balanced" => Ok(ScanMode::Balanced),
            "deep" => Ok(ScanMode::Deep),
            other => Err(FiledoError::Config(format!("unknown scan mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Quick,
    Balanced,
    Deep,
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub mode: ScanMode,
    pub threshold: Duration,
    pub warmup_grace: Duration,
    pub workers: usize,
    pub include_ext: Vec<String>,
    pub exclude_ext: Vec<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub max_files: Option<usize>,
    pub resume: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            mode: ScanMode::Quick,
            threshold: Duration::from_secs_f64(ScanConsts::DEFAULT_THRESHOLD_SECS),
            warmup_grace: Duration::from_secs_f64(ScanConsts::DEFAULT_WARMUP_SECS),
            workers: ScanConsts::DEFAULT_WORKERS_MIN,
            include_ext: Vec::new(),
            exclude_ext: Vec::new(),
            min_size: None,
            max_size: None,
            max_files: None,
            resume: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanSummary {
    pub files_seen: u64,
    pub files_probed: u64,
    pub files_flagged: u64,
    pub bytes_probed: u64,
    pub duration_secs: f64,
}

/// Probe one file's read latency per `mode`: Quick reads the first 4KiB; Balanced adds a
/// mid-file read; Deep adds a near-end read. Returns total elapsed time across the reads.
fn probe_file(path: &Path, size: u64, mode: ScanMode) -> std::io::Result<(Duration, u64)> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = [0u8; 4096];
    let start = Instant::now();
    let mut bytes_read = 0u64;

    bytes_read += file.read(&mut buf)? as u64;

    if matches!(mode, ScanMode::Balanced | ScanMode::Deep) {
        use std::io::{Seek, SeekFrom};
        file.seek(SeekFrom::Start(size / 2))?;
        bytes_read += file.read(&mut buf)? as u64;
    }
    if matches!(mode, ScanMode::Deep) {
        use std::io::{Seek, SeekFrom};
        let pos = size.saturating_sub(4096);
        file.seek(SeekFrom::Start(pos))?;
        bytes_read += file.read(&mut buf)? as u64;
    }

    Ok((start.elapsed(), bytes_read))
}

fn passes_filters(path: &Path, size: u64, opts: &ScanOptions) -> bool {
    if let Some(min) = opts.min_size
        && size < min {
            return false;
        }
    if let Some(max) = opts.max_size
        && size > max {
            return false;
        }
    let ext = path.extension().map(|e| e.to_string_lossy().to_lowercase());
    if !opts.include_ext.is_empty() {
        let Some(ext) = &ext else { return false };
        if !opts.include_ext.iter().any(|e| e.to_lowercase() == *ext) {
            return false;
        }
    }
    if let Some(ext) = &ext
        && opts.exclude_ext.iter().any(|e| e.to_lowercase() == *ext) {
            return false;
        }
    true
}

struct ProbeRecord {
    path: PathBuf,
    /// Raw `elapsed > threshold`, independent of warm-up.
    exceeds: bool,
    /// True if this probe landed inside the warm-up grace window.
    in_warmup: bool,
    bytes: u64,
}

/// Run a damage scan over `root`, loading/updating durable state in `state_dir`. Filters are
/// applied block-list → allow-list (unless resume disabled) → extension → size.
pub fn run_scan(
    root: &Path,
    state_dir: &Path,
    opts: &ScanOptions,
    mut state: DamageState,
    cursor: Option<ScanCursor>,
    cancel: &CancelHandle,
) -> Result<(ScanSummary, DamageState), FiledoError> {
    let start = Instant::now();
    let mut summary = ScanSummary::default();
    let cursor_path = state_dir.join(crate::config::PackagePaths::get().cursor_filename());

    let skip_until = if opts.resume { cursor.map(|c| c.last_path) } else { None };
    let mut past_cursor = skip_until.is_none();

    let worker_count = cap_workers_by_fd_limit(opts.workers.max(1));
    let (tx, rx) = bounded::<(PathBuf, u64)>(worker_count * 4);
    let results: Arc<Mutex<Vec<ProbeRecord>>> = Arc::new(Mutex::new(Vec::new()));

    let pool = ThreadPoolBuilder::new()
        .num_threads(worker_count)
        .build()
        .map_err(|e| FiledoError::Config(e.to_string()))?;

    let scan_start = start;
    let threshold = opts.threshold;
    let warmup = opts.warmup_grace;
    let mode = opts.mode;

    let worker_cancel = cancel.context();
    let worker_results = Arc::clone(&results);
    let consumer = std::thread::spawn(move || {
        pool.scope(|scope| {
            for _ in 0..worker_count {
                let rx = rx.clone();
                let cancel = worker_cancel.context();
                let results = Arc::clone(&worker_results);
                scope.spawn(move |_| {
                    while let Ok((path, size)) = rx.recv() {
                        if cancel.is_cancelled() {
                            break;
                        }
                        match probe_file(&path, size, mode) {
                            Ok((elapsed, bytes)) => {
                                let in_warmup = scan_start.elapsed() < warmup;
                                let exceeds = elapsed > threshold;
                                results.lock().unwrap().push(ProbeRecord {
                                    path,
                                    exceeds,
                                    in_warmup,
                                    bytes,
                                });
                            }
                            Err(_) => continue,
                        }
                    }
                });
            }
        });
    });

    let mut files_seen = 0u64;
    let mut files_probed = 0u64;
    let mut last_path_seen: Option<PathBuf> = None;
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if cancel.is_cancelled() {
            break;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        files_seen += 1;
        let path = entry.path().to_path_buf();
        last_path_seen = Some(path.clone());

        if files_seen.is_multiple_of(ScanConsts::CURSOR_CHECKPOINT_INTERVAL) {
            let _ = save_cursor(&cursor_path, &ScanCursor { last_path: path.clone(), files_seen });
        }

        if let Some(skip) = &skip_until
            && !past_cursor {
                if &path == skip {
                    past_cursor = true;
                }
                continue;
            }

        if state.block_list.contains(&path) {
            continue;
        }
        if opts.resume && state.allow_list.contains(&path) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if !passes_filters(&path, meta.len(), opts) {
            continue;
        }
        if let Some(max) = opts.max_files
            && files_probed as usize >= max {
                break;
            }

        files_probed += 1;
        if tx.send((path, meta.len())).is_err() {
            break;
        }
    }
    drop(tx);
    let _ = consumer.join();

    // Files that exceeded the threshold while still inside the warm-up window are left
    // provisional (in neither list) rather than allow-listed, then re-probed once the window
    // has genuinely elapsed to decide whether the slowness was just warm-up noise.
    let mut pending_recheck: Vec<PathBuf> = Vec::new();
    for record in results.lock().unwrap().drain(..) {
        summary.bytes_probed += record.bytes;
        if record.exceeds && record.in_warmup {
            pending_recheck.push(record.path);
        } else if record.exceeds {
            state.mark_blocked(record.path);
            summary.files_flagged += 1;
        } else {
            state.mark_allowed(record.path);
        }
    }

    for path in pending_recheck {
        cancel.check()?;
        let Ok(meta) = std::fs::metadata(&path) else { continue };
        match probe_file(&path, meta.len(), mode) {
            Ok((elapsed, bytes)) => {
                summary.bytes_probed += bytes;
                if elapsed > threshold {
                    state.mark_blocked(path);
                    summary.files_flagged += 1;
                } else {
                    state.mark_allowed(path);
                }
            }
            Err(_) => continue,
        }
    }

    summary.files_seen = files_seen;
    summary.files_probed = files_probed;
    summary.duration_secs = start.elapsed().as_secs_f64();

    persist_lists(state_dir, &state)?;
    if !state.is_disjoint() {
        return Err(FiledoError::Config(
            "damage list invariant violated: block/allow overlap".to_string(),
        ));
    }

    if cancel.is_cancelled() {
        if let Some(last_path) = last_path_seen {
            let _ = save_cursor(&cursor_path, &ScanCursor { last_path, files_seen });
        }
        return Err(FiledoError::Cancelled);
    }

    let _ = std::fs::remove_file(&cursor_path);
    Ok((summary, state))
}

fn persist_lists(dir: &Path, state: &DamageState) -> Result<(), FiledoError> {
    write_list(&dir.join("skip_files.list"), &state.block_list)?;
    write_list(&dir.join("check_files.list"), &state.allow_list)?;
    Ok(())
}

fn write_list(path: &Path, paths: &HashSet<PathBuf>) -> Result<(), FiledoError> {
    let mut lines: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    lines.sort();
    let body = lines.join("\n");
    let temp = path.with_extension("list.tmp");
    std::fs::write(&temp, body).map_err(FiledoError::from_io_or_disk_full)?;
    std::fs::rename(&temp, path).map_err(FiledoError::from_io_or_disk_full)?;
    Ok(())
}

pub fn load_list(path: &Path) -> HashSet<PathBuf> {
    std::fs::read_to_string(path)
        .map(|s| s.lines().filter(|l| !l.is_empty()).map(PathBuf::from).collect())
        .unwrap_or_default()
}

/// Atomically persist the resume cursor (write-temp-then-rename), called every
/// [`ScanConsts::CURSOR_CHECKPOINT_INTERVAL`] files by the caller.
pub fn save_cursor(path: &Path, cursor: &ScanCursor) -> Result<(), FiledoError> {
    let temp = path.with_extension("json.tmp");
    let data = serde_json::to_string(cursor).map_err(|e| FiledoError::Config(e.to_string()))?;
    std::fs::write(&temp, data).map_err(FiledoError::from_io_or_disk_full)?;
    std::fs::rename(&temp, path).map_err(FiledoError::from_io_or_disk_full)?;
    Ok(())
}

pub fn load_cursor(path: &Path) -> Option<ScanCursor> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_directory_and_lists_are_disjoint() {
        let root = tempfile::tempdir().unwrap();
        for i in 0..5 {
            std::fs::write(root.path().join(format!("f{i}.bin")), vec![0u8; 8192]).unwrap();
        }
        let cancel = CancelHandle::new();
        let opts = ScanOptions {
            warmup_grace: Duration::from_secs(0),
            threshold: Duration::from_secs(10), // nothing should be flagged in a test
            ..ScanOptions::default()
        };
        let (summary, state) = run_scan(
            root.path(),
            root.path(),
            &opts,
            DamageState::default(),
            None,
            &cancel,
        )
        .unwrap();
        assert_eq!(summary.files_seen, 5);
        assert_eq!(summary.files_probed, 5);
        assert!(state.is_disjoint());
    }

    #[test]
    fn slow_file_during_warmup_is_rechecked_and_still_flagged() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("slow.bin"), vec![0u8; 8192]).unwrap();
        let cancel = CancelHandle::new();
        let opts = ScanOptions {
            threshold: Duration::from_nanos(0), // every probe "exceeds"
            warmup_grace: Duration::from_secs(60), // every probe lands inside warm-up
            ..ScanOptions::default()
        };
        let (summary, state) = run_scan(
            root.path(),
            root.path(),
            &opts,
            DamageState::default(),
            None,
            &cancel,
        )
        .unwrap();
        assert_eq!(summary.files_flagged, 1);
        assert!(state.block_list.contains(&root.path().join("slow.bin")));
        assert!(state.allow_list.is_empty());
    }

    #[test]
    fn cursor_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan_cursor.json");
        let cursor = ScanCursor { last_path: PathBuf::from("/some/file.bin"), files_seen: 42 };
        save_cursor(&path, &cursor).unwrap();
        let loaded = load_cursor(&path).unwrap();
        assert_eq!(loaded.last_path, cursor.last_path);
        assert_eq!(loaded.files_seen, cursor.files_seen);
    }

    #[test]
    fn cursor_is_cleared_after_a_completed_scan() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("f.bin"), vec![0u8; 1024]).unwrap();
        let cursor_path = root.path().join("scan_cursor.json");
        save_cursor(&cursor_path, &ScanCursor { last_path: root.path().join("f.bin"), files_seen: 1 }).unwrap();
        let cancel = CancelHandle::new();
        let opts = ScanOptions {
            threshold: Duration::from_secs(10),
            warmup_grace: Duration::from_secs(0),
            ..ScanOptions::default()
        };
        run_scan(root.path(), root.path(), &opts, DamageState::default(), None, &cancel).unwrap();
        assert!(!cursor_path.exists());
    }

    #[test]
    fn extension_filter_excludes_non_matching_files() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("a.bin"), b"x").unwrap();
        std::fs::write(root.path().join("b.txt"), b"x").unwrap();
        let cancel = CancelHandle::new();
        let opts = ScanOptions {
            include_ext: vec!["bin".to_string()],
            warmup_grace: Duration::from_secs(0),
            ..ScanOptions::default()
        };
        let (summary, _) = run_scan(
            root.path(),
            root.path(),
            &opts,
            DamageState::default(),
            None,
            &cancel,
        )
        .unwrap();
        assert_eq!(summary.files_probed, 1);
    }
}
