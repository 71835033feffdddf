//! Append-only operation history journal (C3), capped at [`HISTORY_MAX`] records. Writes go
//! through a write-temp-then-rename pattern applied to a single JSON array file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{HISTORY_MAX, PackagePaths};
use crate::types::HistoryRecord;

fn history_path(dir: &Path) -> PathBuf {
    dir.join(PackagePaths::get().history_filename())
}

fn temp_path(final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "history.json".to_string());
    final_path
        .parent()
        .unwrap_or(Path::new("."))
        .join(format!("{name}.tmp"))
}

fn load(path: &Path) -> Result<Vec<HistoryRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("read history journal at {}", path.display()))?;
    if data.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&data).with_context(|| format!("parse history journal at {}", path.display()))
}

/// Append `record` to the journal in `dir`, evicting the oldest entries past [`HISTORY_MAX`],
/// and atomically replace the file via write-temp-then-rename.
pub fn append(dir: &Path, record: HistoryRecord) -> Result<()> {
    let final_path = history_path(dir);
    let mut records = load(&final_path)?;
    records.push(record);
    if records.len() > HISTORY_MAX {
        let drop = records.len() - HISTORY_MAX;
        records.drain(0..drop);
    }

    let temp = temp_path(&final_path);
    let serialized =
        serde_json::to_string_pretty(&records).context("serialize history journal")?;
    std::fs::write(&temp, serialized)
        .with_context(|| format!("write temp history journal at {}", temp.display()))?;
    std::fs::rename(&temp, &final_path).with_context(|| {
        format!(
            "atomic rename temp history journal to final path ({} -> {})",
            temp.display(),
            final_path.display()
        )
    })?;
    Ok(())
}

/// Read the full journal for `dir`, most-recent last (insertion order).
pub fn read_all(dir: &Path) -> Result<Vec<HistoryRecord>> {
    load(&history_path(dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(op: &str) -> HistoryRecord {
        HistoryRecord {
            timestamp: "20260731_000000".to_string(),
            command: "test".to_string(),
            target: "C".to_string(),
            operation: op.to_string(),
            parameters: serde_json::json!({}),
            results: serde_json::json!({}),
            duration_secs: 1.0,
            success: true,
            error: None,
            summary: None,
        }
    }

    #[test]
    fn appends_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        append(dir.path(), sample("capacity")).unwrap();
        append(dir.path(), sample("fill")).unwrap();
        let records = read_all(dir.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].operation, "fill");
    }

    #[test]
    fn evicts_oldest_past_cap() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..(HISTORY_MAX + 5) {
            append(dir.path(), sample(&format!("op{i}"))).unwrap();
        }
        let records = read_all(dir.path()).unwrap();
        assert_eq!(records.len(), HISTORY_MAX);
        assert_eq!(records[0].operation, "op5");
    }
}
