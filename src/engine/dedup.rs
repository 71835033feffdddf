//! Duplicate-finder engine (C9): size-bucket → quick-hash → full-hash pipeline with a
//! persistent MD5 hash cache, backed by an mmap-vs-chunked read split and a fixed worker pool.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use md5::{Digest, Md5};
use memmap2::Mmap;
use rayon::ThreadPoolBuilder;

use crate::cancel::CancelHandle;
use crate::config::DedupConsts;
use crate::error::FiledoError;
use crate::fs_util::{cap_workers_by_fd_limit, mtime_ns, unique_destination};
use crate::types::{DuplicateGroup, FileRef, HashCacheEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OriginalPolicy {
    OldestMtime,
    #[default]
    NewestMtime,
    FirstAlpha,
    LastAlpha,
}


#[derive(Debug, Clone)]
pub enum ActionPolicy {
    Report,
    Delete,
    Move(PathBuf),
}

/// Hash one file, choosing mmap for large files and chunked reads otherwise.
fn hash_bytes(path: &Path, limit: Option<usize>) -> std::io::Result<String> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    let mut hasher = Md5::new();

    if let Some(n) = limit {
        let mut reader = std::io::BufReader::new(file);
        let mut buf = vec![0u8; n];
        let mut filled = 0usize;
        while filled < n {
            let read = reader.read(&mut buf[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        hasher.update(&buf[..filled]);
    } else if size > DedupConsts::HASH_MMAP_THRESHOLD {
        let mmap = unsafe { Mmap::map(&file)? };
        hasher.update(&mmap);
    } else {
        let mut reader = std::io::BufReader::with_capacity(DedupConsts::HASH_READ_CHUNK_SIZE, file);
        let mut buf = vec![0u8; DedupConsts::HASH_READ_CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

/// In-memory view of an on-disk hash cache, keyed `"<path>:<size>"`.
pub struct HashCache {
    entries: Mutex<HashMap<String, HashCacheEntry>>,
}

fn cache_key(path: &Path, size: u64) -> String {
    format!("{}:{size}", path.display())
}

impl HashCache {
    pub fn new() -> Self {
        HashCache { entries: Mutex::new(HashMap::new()) }
    }

    pub fn load(path: &Path) -> Result<Self, FiledoError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = std::fs::read_to_string(path).map_err(FiledoError::from_io_or_disk_full)?;
        let entries: HashMap<String, HashCacheEntry> =
            serde_json::from_str(&data).map_err(|e| FiledoError::Config(e.to_string()))?;
        Ok(HashCache { entries: Mutex::new(entries) })
    }

    pub fn save(&self, path: &Path) -> Result<(), FiledoError> {
        let entries = self.entries.lock().unwrap();
        let data = serde_json::to_string_pretty(&*entries).map_err(|e| FiledoError::Config(e.to_string()))?;
        let temp = path.with_extension("json.tmp");
        std::fs::write(&temp, data).map_err(FiledoError::from_io_or_disk_full)?;
        std::fs::rename(&temp, path).map_err(FiledoError::from_io_or_disk_full)?;
        Ok(())
    }

    fn lookup(&self, path: &Path, size: u64, mtime: i64) -> Option<HashCacheEntry> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(&cache_key(path, size))
            .filter(|e| e.is_valid_for(size, mtime))
            .cloned()
    }

    fn store_quick(&self, path: &Path, size: u64, mtime: i64, quick_hash: String) {
        let mut entries = self.entries.lock().unwrap();
        let key = cache_key(path, size);
        let entry = entries.entry(key).or_insert_with(|| HashCacheEntry {
            path: path.to_path_buf(),
            size,
            mtime,
            quick_hash: None,
            full_hash: None,
            last_seen: None,
        });
        entry.mtime = mtime;
        entry.quick_hash = Some(quick_hash);
    }

    fn store_full(&self, path: &Path, size: u64, mtime: i64, full_hash: String) {
        let mut entries = self.entries.lock().unwrap();
        let key = cache_key(path, size);
        let entry = entries.entry(key).or_insert_with(|| HashCacheEntry {
            path: path.to_path_buf(),
            size,
            mtime,
            quick_hash: None,
            full_hash: None,
            last_seen: None,
        });
        entry.mtime = mtime;
        entry.full_hash = Some(full_hash);
    }
}

impl Default for HashCache {
    fn default() -> Self {
        Self::new()
    }
}

struct CandidateFile {
    path: PathBuf,
    size: u64,
    mtime: i64,
}

/// Phase 1: walk `root`, bucket regular files `>= 16 bytes` by size, discard singleton buckets.
fn enumerate_and_bucket(root: &Path, cancel: &CancelHandle) -> Result<Vec<Vec<CandidateFile>>, FiledoError> {
    let mut by_size: HashMap<u64, Vec<CandidateFile>> = HashMap::new();
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        cancel.check()?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if meta.len() < DedupConsts::MIN_FILE_SIZE {
            continue;
        }
        by_size.entry(meta.len()).or_default().push(CandidateFile {
            path: entry.path().to_path_buf(),
            size: meta.len(),
            mtime: mtime_ns(&meta),
        });
    }
    Ok(by_size.into_values().filter(|v| v.len() >= 2).collect())
}

fn run_hash_pool<F>(files: Vec<PathBuf>, cancel: &CancelHandle, f: F) -> Vec<(PathBuf, Option<String>)>
where
    F: Fn(&Path) -> Option<String> + Sync,
{
    let workers = cap_workers_by_fd_limit(DedupConsts::MAX_WORKERS.min(rayon::current_num_threads().max(1)));
    let pool = ThreadPoolBuilder::new().num_threads(workers).build().unwrap();
    let results: Mutex<Vec<(PathBuf, Option<String>)>> = Mutex::new(Vec::new());
    pool.install(|| {
        use rayon::prelude::*;
        files.into_par_iter().for_each(|path| {
            if cancel.is_cancelled() {
                return;
            }
            let hash = f(&path);
            results.lock().unwrap().push((path, hash));
        });
    });
    results.into_inner().unwrap()
}

/// Run phases 1-3 and produce the final duplicate groups, using `cache` across phases 2 and 3.
pub fn find_duplicates(
    root: &Path,
    cache: &HashCache,
    policy: OriginalPolicy,
    cancel: &CancelHandle,
) -> Result<Vec<DuplicateGroup>, FiledoError> {
    let size_buckets = enumerate_and_bucket(root, cancel)?;

    // Phase 2: quick hash, rebucket.
    let mut quick_buckets: HashMap<(u64, String), Vec<CandidateFile>> = HashMap::new();
    for bucket in size_buckets {
        cancel.check()?;
        let files: Vec<PathBuf> = bucket.iter().map(|c| c.path.clone()).collect();
        let by_path: HashMap<PathBuf, &CandidateFile> = bucket.iter().map(|c| (c.path.clone(), c)).collect();

        let quick_results = run_hash_pool(files, cancel, |path| {
            let candidate = by_path.get(path)?;
            if let Some(cached) = cache.lookup(path, candidate.size, candidate.mtime)
                && let Some(hash) = cached.quick_hash {
                    return Some(hash);
                }
            hash_bytes(path, Some(DedupConsts::QUICK_HASH_BYTES)).ok()
        });

        for (path, hash) in quick_results {
            let Some(hash) = hash else { continue };
            let candidate = by_path.get(&path).unwrap();
            cache.store_quick(&path, candidate.size, candidate.mtime, hash.clone());
            quick_buckets
                .entry((candidate.size, hash))
                .or_default()
                .push(CandidateFile {
                    path: candidate.path.clone(),
                    size: candidate.size,
                    mtime: candidate.mtime,
                });
        }
    }
    quick_buckets.retain(|_, v| v.len() >= 2);

    // Phase 3: full hash, group.
    let mut groups: HashMap<(u64, String), Vec<FileRef>> = HashMap::new();
    for bucket in quick_buckets.into_values() {
        cancel.check()?;
        let files: Vec<PathBuf> = bucket.iter().map(|c| c.path.clone()).collect();
        let by_path: HashMap<PathBuf, &CandidateFile> = bucket.iter().map(|c| (c.path.clone(), c)).collect();

        let full_results = run_hash_pool(files, cancel, |path| {
            let candidate = by_path.get(path)?;
            if let Some(cached) = cache.lookup(path, candidate.size, candidate.mtime)
                && let Some(hash) = cached.full_hash {
                    return Some(hash);
                }
            hash_bytes(path, None).ok()
        });

        for (path, hash) in full_results {
            let Some(hash) = hash else { continue };
            let candidate = by_path.get(&path).unwrap();
            cache.store_full(&path, candidate.size, candidate.mtime, hash.clone());
            groups.entry((candidate.size, hash)).or_default().push(FileRef {
                path: candidate.path.clone(),
                size: candidate.size,
                mtime: candidate.mtime,
                is_original: false,
            });
        }
    }

    let mut out = Vec::new();
    for ((size, full_hash), mut members) in groups {
        if members.len() < 2 {
            continue;
        }
        let original_index = select_original(&members, policy);
        members[original_index].is_original = true;
        out.push(DuplicateGroup { size, full_hash, members, original_index });
    }
    Ok(out)
}

fn select_original(members: &[FileRef], policy: OriginalPolicy) -> usize {
    match policy {
        OriginalPolicy::OldestMtime => members
            .iter()
            .enumerate()
            .min_by_key(|(_, m)| m.mtime)
            .map(|(i, _)| i)
            .unwrap_or(0),
        OriginalPolicy::NewestMtime => members
            .iter()
            .enumerate()
            .max_by_key(|(_, m)| m.mtime)
            .map(|(i, _)| i)
            .unwrap_or(0),
        OriginalPolicy::FirstAlpha => members
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.path.cmp(&b.path))
            .map(|(i, _)| i)
            .unwrap_or(0),
        OriginalPolicy::LastAlpha => members
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.path.cmp(&b.path))
            .map(|(i, _)| i)
            .unwrap_or(0),
    }
}

/// Apply an action policy to every non-original member of every group. Returns
/// `(files_acted_on, bytes_reclaimed)`. `Report` performs no mutation.
pub fn apply_action(groups: &[DuplicateGroup], action: &ActionPolicy) -> Result<(u64, u64), FiledoError> {
    let mut acted = 0u64;
    let mut bytes = 0u64;
    for group in groups {
        for dup in group.duplicates() {
            match action {
                ActionPolicy::Report => {}
                ActionPolicy::Delete => {
                    std::fs::remove_file(&dup.path).map_err(FiledoError::from_io_or_disk_full)?;
                    acted += 1;
                    bytes += dup.size;
                }
                ActionPolicy::Move(target_dir) => {
                    std::fs::create_dir_all(target_dir).map_err(FiledoError::from_io_or_disk_full)?;
                    let basename = dup.path.file_name().map(PathBuf::from).unwrap_or_default();
                    let dest = unique_destination(target_dir, &basename);
                    std::fs::rename(&dup.path, &dest).map_err(FiledoError::from_io_or_disk_full)?;
                    acted += 1;
                    bytes += dup.size;
                }
            }
        }
    }
    Ok((acted, bytes))
}

/// Re-load duplicate groups from a previously emitted list file: either the plain report
/// this module writes (`render_report`) or a `hash|path|size|mtime` TSV variant.
/// Every member is re-validated against live filesystem metadata; missing files are skipped
/// with a warning and groups left with fewer than two surviving members are dropped.
pub fn load_groups_from_list(path: &Path, policy: OriginalPolicy) -> Result<Vec<DuplicateGroup>, FiledoError> {
    let data = std::fs::read_to_string(path).map_err(FiledoError::from_io_or_disk_full)?;

    let raw_groups = if looks_like_tsv(&data) {
        parse_tsv_groups(&data)
    } else {
        parse_report_groups(&data)
    };

    let mut out = Vec::new();
    for (hash, paths) in raw_groups {
        let mut members = Vec::new();
        for path in paths {
            match std::fs::metadata(&path) {
                Ok(meta) => members.push(FileRef {
                    size: meta.len(),
                    mtime: mtime_ns(&meta),
                    path,
                    is_original: false,
                }),
                Err(_) => log::warn!("skipping missing file from duplicate list: {}", path.display()),
            }
        }
        if members.len() < 2 {
            continue;
        }
        let size = members[0].size;
        let original_index = select_original(&members, policy);
        members[original_index].is_original = true;
        out.push(DuplicateGroup { size, full_hash: hash, members, original_index });
    }
    Ok(out)
}

fn looks_like_tsv(data: &str) -> bool {
    data.lines()
        .find(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .is_some_and(|l| l.matches('|').count() >= 3)
}

fn parse_tsv_groups(data: &str) -> Vec<(String, Vec<PathBuf>)> {
    let mut by_hash: HashMap<String, Vec<PathBuf>> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for line in data.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.splitn(4, '|');
        let (Some(hash), Some(path)) = (fields.next(), fields.next()) else { continue };
        if !by_hash.contains_key(hash) {
            order.push(hash.to_string());
        }
        by_hash.entry(hash.to_string()).or_default().push(PathBuf::from(path));
    }
    order.into_iter().map(|h| (h.clone(), by_hash.remove(&h).unwrap_or_default())).collect()
}

fn parse_report_groups(data: &str) -> Vec<(String, Vec<PathBuf>)> {
    let mut groups = Vec::new();
    let mut current: Option<Vec<PathBuf>> = None;
    let mut index = 0u32;
    for line in data.lines() {
        if line.starts_with("# Group") {
            if let Some(paths) = current.take() {
                groups.push((format!("group-{index}"), paths));
            }
            index += 1;
            current = Some(Vec::new());
        } else if let Some(rest) = line.strip_prefix("* ") {
            current.get_or_insert_with(Vec::new).push(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("  ") {
            current.get_or_insert_with(Vec::new).push(PathBuf::from(rest));
        }
    }
    if let Some(paths) = current.take() {
        groups.push((format!("group-{index}"), paths));
    }
    groups
}

/// Render the duplicate groups as `hash|path|size|mtime` lines, the TSV variant
/// [`load_groups_from_list`] also accepts as an input format.
pub fn render_tsv(groups: &[DuplicateGroup]) -> String {
    let mut out = String::new();
    for group in groups {
        for member in &group.members {
            out.push_str(&format!(
                "{}|{}|{}|{}\n",
                group.full_hash,
                member.path.display(),
                member.size,
                member.mtime
            ));
        }
    }
    out
}

/// Render the human-readable report: one `# Group N (M files, S MiB each)` section per
/// group, `* path` for the original, `  path` for duplicates.
pub fn render_report(groups: &[DuplicateGroup]) -> String {
    let mut out = String::new();
    for (i, group) in groups.iter().enumerate() {
        let mib = group.size as f64 / (1024.0 * 1024.0);
        out.push_str(&format!(
            "# Group {} ({} files, {:.2} MiB each)\n",
            i + 1,
            group.members.len(),
            mib
        ));
        for member in &group.members {
            let prefix = if member.is_original { "* " } else { "  " };
            out.push_str(&format!("{prefix}{}\n", member.path.display()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_duplicate_pair_and_marks_original() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), vec![7u8; 1024]).unwrap();
        std::fs::write(dir.path().join("b.bin"), vec![7u8; 1024]).unwrap();
        std::fs::write(dir.path().join("c.bin"), vec![9u8; 1024]).unwrap();

        let cache = HashCache::new();
        let cancel = CancelHandle::new();
        let groups = find_duplicates(dir.path(), &cache, OriginalPolicy::NewestMtime, &cancel).unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 2);
        assert_eq!(groups.iter().flat_map(|g| g.duplicates()).count(), 1);
    }

    #[test]
    fn delete_action_removes_duplicates_not_original() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), vec![7u8; 1024]).unwrap();
        std::fs::write(dir.path().join("b.bin"), vec![7u8; 1024]).unwrap();

        let cache = HashCache::new();
        let cancel = CancelHandle::new();
        let groups = find_duplicates(dir.path(), &cache, OriginalPolicy::NewestMtime, &cancel).unwrap();
        let (acted, _) = apply_action(&groups, &ActionPolicy::Delete).unwrap();
        assert_eq!(acted, 1);
        let original = groups[0].original();
        assert!(original.path.exists());
    }

    #[test]
    fn report_lists_original_with_star_prefix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), vec![7u8; 1024]).unwrap();
        std::fs::write(dir.path().join("b.bin"), vec![7u8; 1024]).unwrap();
        let cache = HashCache::new();
        let cancel = CancelHandle::new();
        let groups = find_duplicates(dir.path(), &cache, OriginalPolicy::NewestMtime, &cancel).unwrap();
        let report = render_report(&groups);
        assert!(report.contains("# Group 1"));
        assert!(report.lines().any(|l| l.starts_with("* ")));
    }

    #[test]
    fn from_list_round_trips_through_plain_report() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), vec![7u8; 1024]).unwrap();
        std::fs::write(dir.path().join("b.bin"), vec![7u8; 1024]).unwrap();
        let cache = HashCache::new();
        let cancel = CancelHandle::new();
        let groups = find_duplicates(dir.path(), &cache, OriginalPolicy::NewestMtime, &cancel).unwrap();

        let list_path = dir.path().join("report.txt");
        std::fs::write(&list_path, render_report(&groups)).unwrap();

        let reloaded = load_groups_from_list(&list_path, OriginalPolicy::NewestMtime).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded[0].members.len(), 2);
    }

    #[test]
    fn from_list_round_trips_through_tsv_variant() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), vec![7u8; 1024]).unwrap();
        std::fs::write(dir.path().join("b.bin"), vec![7u8; 1024]).unwrap();
        let cache = HashCache::new();
        let cancel = CancelHandle::new();
        let groups = find_duplicates(dir.path(), &cache, OriginalPolicy::NewestMtime, &cancel).unwrap();

        let list_path = dir.path().join("report.tsv");
        std::fs::write(&list_path, render_tsv(&groups)).unwrap();

        let reloaded = load_groups_from_list(&list_path, OriginalPolicy::NewestMtime).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded[0].members.len(), 2);
    }

    #[test]
    fn from_list_drops_groups_with_missing_members() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        std::fs::write(&a, vec![7u8; 1024]).unwrap();
        let b = dir.path().join("missing.bin");

        let list_path = dir.path().join("report.tsv");
        let body = format!("deadbeef|{}|1024|0\ndeadbeef|{}|1024|0\n", a.display(), b.display());
        std::fs::write(&list_path, body).unwrap();

        let reloaded = load_groups_from_list(&list_path, OriginalPolicy::NewestMtime).unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn singleton_size_bucket_is_not_a_group() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("unique.bin"), vec![1u8; 2048]).unwrap();
        let cache = HashCache::new();
        let cancel = CancelHandle::new();
        let groups = find_duplicates(dir.path(), &cache, OriginalPolicy::NewestMtime, &cancel).unwrap();
        assert!(groups.is_empty());
    }
}
