//! Data model shared across engines.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::CodecFailure;
use crate::error::CapacityFailureKind;

/// A resolved, addressable filesystem location. Invariant: by the time an engine runs, it
/// resolves to a single readable, writable location (checked in [`crate::target::resolve`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetRoot {
    Drive(char),
    Directory(PathBuf),
    Share(PathBuf),
}

impl TargetRoot {
    /// Filesystem path to operate against: `X:\` for a drive letter, the path itself otherwise.
    pub fn path(&self) -> PathBuf {
        match self {
            TargetRoot::Drive(letter) => PathBuf::from(format!("{letter}:\\")),
            TargetRoot::Directory(p) | TargetRoot::Share(p) => p.clone(),
        }
    }

    /// Parse CLI-style target syntax: single letter / `X:` → Drive; `\\` or `//` prefix →
    /// Share; existing directory → Directory. Does not touch the filesystem beyond `is_dir`/
    /// `exists` checks (no canonicalization, no space query; that's [`crate::target::resolve`]).
    pub fn parse(raw: &str) -> Option<TargetRoot> {
        let trimmed = raw.trim();
        if trimmed.starts_with("\\\\") || trimmed.starts_with("//") {
            return Some(TargetRoot::Share(PathBuf::from(trimmed)));
        }
        let bytes = trimmed.as_bytes();
        if (bytes.len() == 1 && bytes[0].is_ascii_alphabetic())
            || (bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
        {
            return Some(TargetRoot::Drive(bytes[0].to_ascii_uppercase() as char));
        }
        let path = Path::new(trimmed);
        if path.is_dir() {
            return Some(TargetRoot::Directory(path.to_path_buf()));
        }
        None
    }
}

/// Coarse drive kind as reported by the volume info provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKind {
    Fixed,
    Removable,
    Network,
    Optical,
    Ram,
    Unknown,
}

/// Opaque volume metadata, consumed but never mutated by any engine.
#[derive(Debug, Clone)]
pub struct VolumeInfo {
    pub kind: VolumeKind,
    pub filesystem: String,
    pub label: String,
    pub cluster_size_bytes: u32,
    pub total_bytes: u64,
    pub free_bytes: u64,
}

/// Result of a fake-capacity test run.
#[derive(Debug, Clone)]
pub struct CapacityTestResult {
    pub passed: bool,
    pub files_created: u32,
    pub bytes_written: u64,
    pub baseline_mbps: f64,
    pub avg_mbps: f64,
    pub min_mbps: f64,
    pub max_mbps: f64,
    pub failure: Option<CapacityFailureKind>,
    pub preserved_paths: Vec<PathBuf>,
}

/// Durable damage-scan state: two disjoint sets of paths. Held in memory while a scan
/// runs; flushed to `skip_files.list` / `check_files.list` by [`crate::engine::scan`].
#[derive(Debug, Clone, Default)]
pub struct DamageState {
    pub block_list: std::collections::HashSet<PathBuf>,
    pub allow_list: std::collections::HashSet<PathBuf>,
}

impl DamageState {
    /// Move `path` into the block list, removing it from the allow list if present
    /// (invariant: a path appears in at most one list).
    pub fn mark_blocked(&mut self, path: PathBuf) {
        self.allow_list.remove(&path);
        self.block_list.insert(path);
    }

    /// Move `path` into the allow list, removing it from the block list if present.
    pub fn mark_allowed(&mut self, path: PathBuf) {
        self.block_list.remove(&path);
        self.allow_list.insert(path);
    }

    /// True if the two sets share no path (checked after every flush).
    pub fn is_disjoint(&self) -> bool {
        self.block_list.is_disjoint(&self.allow_list)
    }
}

/// Opaque resume checkpoint for the damage scanner. The walker skips entries up to and
/// including `last_path` before resuming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanCursor {
    pub last_path: PathBuf,
    pub files_seen: u64,
}

/// Cached hash state for one file. Cache key is `(normalized_path, size)`; an entry is
/// valid only while `size` and `mtime` still match the live file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashCacheEntry {
    pub path: PathBuf,
    pub size: u64,
    pub mtime: i64,
    pub quick_hash: Option<String>,
    pub full_hash: Option<String>,
    #[serde(skip)]
    pub last_seen: Option<std::time::Instant>,
}

impl HashCacheEntry {
    /// Entry is usable only when `size` and `mtime` still match the live file.
    pub fn is_valid_for(&self, size: u64, mtime: i64) -> bool {
        self.size == size && self.mtime == mtime
    }
}

/// A reference to one file inside a duplicate group.
#[derive(Debug, Clone)]
pub struct FileRef {
    pub path: PathBuf,
    pub size: u64,
    pub mtime: i64,
    pub is_original: bool,
}

/// A group of files sharing a full content hash. Invariant: `members.len() >= 2` and
/// exactly `members[original_index]` has `is_original == true`.
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub size: u64,
    pub full_hash: String,
    pub members: Vec<FileRef>,
    pub original_index: usize,
}

impl DuplicateGroup {
    pub fn original(&self) -> &FileRef {
        &self.members[self.original_index]
    }

    pub fn duplicates(&self) -> impl Iterator<Item = &FileRef> {
        self.members
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != self.original_index)
            .map(|(_, m)| m)
    }
}

/// One append-only operation record. Serialized into `history.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: String,
    pub command: String,
    pub target: String,
    pub operation: String,
    pub parameters: serde_json::Value,
    pub results: serde_json::Value,
    pub duration_secs: f64,
    pub success: bool,
    pub error: Option<String>,
    pub summary: Option<String>,
}

/// Verification outcome codes surfaced by the codec, re-exported here for convenience in
/// call sites that only need the type, not the codec module's write/verify functions.
pub type VerifyFailure = CodecFailure;

/// Wall-clock-agnostic duration helper: both a monotonic `Duration` (for rate math) and
/// formatted text, so callers never accidentally mix clock sources.
#[derive(Debug, Clone, Copy)]
pub struct Elapsed(pub Duration);

impl Elapsed {
    pub fn mbps(&self, bytes: u64) -> f64 {
        let secs = self.0.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        (bytes as f64 / secs) / (1024.0 * 1024.0)
    }
}
