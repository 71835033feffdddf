//! Tuning constants and environment-driven configuration, centralized in one place:
//! struct-of-consts per concern, one `OnceLock` for package-derived paths.

use std::sync::OnceLock;

/// Package-derived filenames, built once from `CARGO_PKG_NAME` then cached.
pub struct PackagePaths {
    history_filename: String,
    hash_cache_filename: String,
    block_list_filename: String,
    allow_list_filename: String,
    cursor_filename: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| PackagePaths {
            history_filename: "history.json".to_string(),
            hash_cache_filename: "hash_cache.json".to_string(),
            block_list_filename: "skip_files.list".to_string(),
            allow_list_filename: "check_files.list".to_string(),
            cursor_filename: "scan_cursor.json".to_string(),
        })
    }

    pub fn history_filename(&self) -> &str {
        &self.history_filename
    }
    pub fn hash_cache_filename(&self) -> &str {
        &self.hash_cache_filename
    }
    pub fn block_list_filename(&self) -> &str {
        &self.block_list_filename
    }
    pub fn allow_list_filename(&self) -> &str {
        &self.allow_list_filename
    }
    pub fn cursor_filename(&self) -> &str {
        &self.cursor_filename
    }
}

/// History journal cap: the N most recent records are retained.
pub const HISTORY_MAX: usize = 1000;

/// Buffer calibrator candidate sizes, in bytes, and the size of the file used to test each.
pub struct CalibrationConsts;

impl CalibrationConsts {
    pub const CANDIDATE_SIZES_MIB: &'static [u64] = &[4, 8, 16, 32, 64, 128];
    pub const TEST_FILE_SIZE: u64 = 50 * 1024 * 1024;
    pub const FALLBACK_BUFFER: usize = 16 * 1024 * 1024;
}

/// Fake-capacity engine constants.
pub struct CapacityConsts;

impl CapacityConsts {
    pub const MAX_FILES: u32 = 100;
    pub const MIN_FREE_BYTES: u64 = 100 * 1024 * 1024;
    pub const MIN_FILE_SIZE: u64 = 1024 * 1024;
    pub const BASELINE_SAMPLE_COUNT: u32 = 3;
    pub const SPEED_LOW_FACTOR: f64 = 0.1;
    pub const SPEED_HIGH_FACTOR: f64 = 10.0;
}

/// Fill engine constants.
pub struct FillConsts;

impl FillConsts {
    pub const MAX_SIZE_MB: u64 = 10240;
    pub const MIN_SIZE_MB: u64 = 1;
    pub const NETWORK_SOFT_CAP: u64 = 99_999;
    pub const WORKERS_SSD: usize = 16;
    pub const WORKERS_HDD: usize = 4;
    pub const WORKERS_REMOVABLE_OR_NETWORK: usize = 2;
    pub const CLEAN_WORKERS_NETWORK: usize = 12;
    pub const CLEAN_WORKERS_LOCAL: usize = 4;
    pub const CLEAN_PROGRESS_INTERVAL_MS: u64 = 200;
}

/// Damage-scan engine constants and environment variables.
pub struct ScanConsts;

impl ScanConsts {
    pub const PROBE_CHUNK: usize = 4096;
    pub const DEFAULT_THRESHOLD_SECS: f64 = 2.0;
    pub const DEFAULT_WARMUP_SECS: f64 = 10.0;
    pub const DEFAULT_WORKERS_MIN: usize = 4;
    pub const DEFAULT_WORKERS_MAX: usize = 8;
    pub const CURSOR_CHECKPOINT_INTERVAL: u64 = 1000;
    pub const FLUSH_BATCH_SIZE: usize = 200;
    pub const FLUSH_INTERVAL_MS: u64 = 1000;
}

/// Parsed damage-scan environment configuration (`FILEDO_CHECK_*`). Unknown env vars are
/// ignored; only the keys below are recognized.
#[derive(Debug, Clone)]
pub struct ScanEnvConfig {
    pub mode: Option<String>,
    pub threshold_seconds: Option<f64>,
    pub warmup_seconds: Option<f64>,
    pub workers: Option<usize>,
    pub verbose: Option<bool>,
    pub quiet: Option<bool>,
    pub max_files: Option<usize>,
}

impl ScanEnvConfig {
    pub fn from_env() -> Self {
        ScanEnvConfig {
            mode: std::env::var("FILEDO_CHECK_MODE").ok(),
            threshold_seconds: std::env::var("FILEDO_CHECK_THRESHOLD_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok()),
            warmup_seconds: std::env::var("FILEDO_CHECK_WARMUP_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok()),
            workers: std::env::var("FILEDO_CHECK_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok()),
            verbose: std::env::var("FILEDO_CHECK_VERBOSE")
                .ok()
                .map(|v| v == "1"),
            quiet: std::env::var("FILEDO_CHECK_QUIET").ok().map(|v| v == "1"),
            max_files: std::env::var("FILEDO_CHECK_MAX_FILES")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }
}

/// Duplicate-finder engine constants.
pub struct DedupConsts;

impl DedupConsts {
    pub const MIN_FILE_SIZE: u64 = 16;
    pub const QUICK_HASH_BYTES: usize = 8192;
    pub const MAX_WORKERS: usize = 5;
    pub const HASH_MMAP_THRESHOLD: u64 = 100 * 1024 * 1024;
    pub const HASH_READ_CHUNK_SIZE: usize = 1024 * 1024;
}
