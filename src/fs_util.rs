//! Path and filter helpers shared by the walkers: simple glob matching, mtime-window
//! comparison.

use std::path::{Path, PathBuf};

/// Simple glob pattern matching (supports `*` and `?`), recursive-peekable.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.strip_prefix('!').unwrap_or(pattern);
    let mut pattern_chars = pattern.chars().peekable();
    let mut text_chars = text.chars().peekable();

    while let Some(&p) = pattern_chars.peek() {
        match p {
            '*' => {
                pattern_chars.next();
                if pattern_chars.peek().is_none() {
                    return true;
                }
                while text_chars.peek().is_some() {
                    if glob_match(
                        &pattern_chars.clone().collect::<String>(),
                        &text_chars.clone().collect::<String>(),
                    ) {
                        return true;
                    }
                    text_chars.next();
                }
                return false;
            }
            '?' => {
                pattern_chars.next();
                if text_chars.next().is_none() {
                    return false;
                }
            }
            _ => {
                pattern_chars.next();
                if text_chars.next() != Some(p) {
                    return false;
                }
            }
        }
    }
    text_chars.peek().is_none()
}

/// True if `mtime` differs from `old_mtime` by more than `tolerance_ns`.
pub fn mtime_changed(new_mtime: i64, old_mtime: i64, tolerance_ns: i64) -> bool {
    (new_mtime - old_mtime).abs() > tolerance_ns
}

/// Append `_(k)` before the extension of `path`, starting at `k = start`, returning the first
/// path under `dir` that does not already exist. Used by the dedup engine's Move action.
pub fn unique_destination(dir: &Path, basename: &Path) -> PathBuf {
    let candidate = dir.join(basename);
    if !candidate.exists() {
        return candidate;
    }
    let stem = basename
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = basename.extension().map(|e| e.to_string_lossy().to_string());
    let mut k = 1u32;
    loop {
        let name = match &ext {
            Some(ext) => format!("{stem}_({k}).{ext}"),
            None => format!("{stem}_({k})"),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
        k += 1;
    }
}

/// Estimated number of file descriptors used per walk/worker (dir handles, files, etc.).
pub const FDS_PER_WORKER: usize = 10;

/// Fraction of the process FD limit to use (leave headroom for other code).
const FD_LIMIT_FRACTION: f64 = 0.8;

/// Soft limit for max open file descriptors, or `None` if unavailable (e.g. Windows).
#[cfg(unix)]
fn max_open_fds() -> Option<u64> {
    use std::mem::MaybeUninit;
    let mut rlim = MaybeUninit::<libc::rlimit>::uninit();
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, rlim.as_mut_ptr()) } != 0 {
        return None;
    }
    let rlim = unsafe { rlim.assume_init() };
    let cur = rlim.rlim_cur;
    if cur == libc::RLIM_INFINITY || cur > i64::MAX as u64 {
        return None;
    }
    Some(cur)
}

#[cfg(not(unix))]
fn max_open_fds() -> Option<u64> {
    None
}

/// Cap `requested` worker count so the pool stays under ~80% of the process FD limit.
/// Falls back to `requested` unchanged when no limit is available.
pub fn cap_workers_by_fd_limit(requested: usize) -> usize {
    let Some(limit) = max_open_fds() else {
        return requested;
    };
    let usable = (limit as f64 * FD_LIMIT_FRACTION) as usize;
    let cap = (usable / FDS_PER_WORKER).max(1);
    requested.min(cap)
}

/// File's mtime as nanoseconds since epoch, truncated to local precision.
pub fn mtime_ns(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Compact local-time stamp used in test-file names (`YYYYMMDD_HHMMSS`).
pub fn compact_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_star_matches_anything() {
        assert!(glob_match("*.tmp", "foo.tmp"));
        assert!(!glob_match("*.tmp", "foo.log"));
    }

    #[test]
    fn mtime_window_tolerance() {
        assert!(!mtime_changed(1_000_000_000, 0, 1_000_000_000));
        assert!(mtime_changed(1_000_000_001, 0, 1_000_000_000));
    }

    #[test]
    fn unique_destination_appends_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"x").unwrap();
        let dest = unique_destination(dir.path(), Path::new("a.bin"));
        assert_eq!(dest, dir.path().join("a_(1).bin"));
    }

    #[test]
    fn timestamp_has_expected_shape() {
        let ts = compact_timestamp();
        assert_eq!(ts.len(), 15);
        assert_eq!(ts.as_bytes()[8], b'_');
    }
}
