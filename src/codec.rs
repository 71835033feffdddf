//! Self-describing test-file codec (C5): write/verify a test payload with a header/footer and
//! a repeating ASCII pattern body.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use rand::Rng;

use crate::cancel::CancelHandle;
use crate::error::FiledoError;
use crate::fs_util::compact_timestamp;

/// The 37-character body pattern.
pub const PATTERN: &[u8; 37] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 ";

/// Cancellation is polled every this many written blocks.
const CANCEL_POLL_BLOCKS: u64 = 100;

/// Minimum ratio of pattern-matching bytes within a read window for a position to be
/// considered intact rather than corrupted.
const VALID_RATIO_THRESHOLD: f64 = 0.8;

/// Read window is `4x` the pattern length, centered as closely as possible on the position.
const WINDOW_FACTOR: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum CodecFailure {
    HeaderInvalid,
    HeaderFooterMismatch,
    PatternMismatch { position: u64, valid_ratio: f64 },
    SizeMismatch { expected: u64, actual: u64 },
    ReadError(String),
}

fn header_line(basename: &str, stamp: &str) -> Vec<u8> {
    format!("FILEDO_TEST_{basename}_{stamp}\n").into_bytes()
}

/// Write a test file of exactly `size` bytes at `path`: header, repeating pattern body, footer.
/// Writes go through a prefilled, cluster-aligned buffer and the file is synced once at the end.
pub fn write_test_file(
    path: &Path,
    size: u64,
    buffer_size: usize,
    cancel: &CancelHandle,
) -> Result<(), FiledoError> {
    let basename = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let stamp = compact_timestamp();
    let header = header_line(&basename, &stamp);

    if size < (header.len() as u64) * 2 {
        return Err(FiledoError::InvalidTarget(format!(
            "requested size {size} too small to hold header+footer"
        )));
    }
    let body_len = size - header.len() as u64 * 2;

    let mut file = File::create(path).map_err(FiledoError::from_io_or_disk_full)?;
    file.write_all(&header).map_err(FiledoError::from_io_or_disk_full)?;

    // Buffer length must be a multiple of the pattern length so repeated full-buffer
    // writes continue the pattern seamlessly instead of restarting it at each boundary.
    let aligned_len = (buffer_size.max(PATTERN.len()) / PATTERN.len()) * PATTERN.len();
    let mut buffer = vec![0u8; aligned_len];
    fill_pattern(&mut buffer, 0);

    let mut remaining = body_len;
    let mut blocks_written = 0u64;
    while remaining > 0 {
        let chunk = remaining.min(buffer.len() as u64) as usize;
        file.write_all(&buffer[..chunk])
            .map_err(FiledoError::from_io_or_disk_full)?;
        remaining -= chunk as u64;
        blocks_written += 1;
        if blocks_written.is_multiple_of(CANCEL_POLL_BLOCKS) {
            cancel.check()?;
        }
    }
    file.write_all(&header).map_err(FiledoError::from_io_or_disk_full)?;
    file.sync_all().map_err(FiledoError::from_io_or_disk_full)?;
    Ok(())
}

/// Fill `buffer` with the repeating pattern, starting at pattern offset `start_offset`
/// (so a buffer reused across writes keeps the pattern aligned across the whole file).
fn fill_pattern(buffer: &mut [u8], start_offset: usize) {
    for (i, byte) in buffer.iter_mut().enumerate() {
        *byte = PATTERN[(start_offset + i) % PATTERN.len()];
    }
}

fn read_header_footer(file: &mut File, header_len: usize) -> std::io::Result<(Vec<u8>, Vec<u8>, u64)> {
    let size = file.metadata()?.len();
    let mut header = vec![0u8; header_len.min(size as usize)];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut header)?;

    let footer_start = size.saturating_sub(header_len as u64);
    let mut footer = vec![0u8; header_len.min(size as usize)];
    file.seek(SeekFrom::Start(footer_start))?;
    file.read_exact(&mut footer)?;

    Ok((header, footer, size))
}

fn check_header(header: &[u8]) -> bool {
    header.starts_with(b"FILEDO_TEST_")
}

/// Score a `window`-byte read starting at `position` against the pattern, returning the
/// fraction of bytes that match the expected pattern value at their offset.
fn score_pattern_window(file: &mut File, position: u64, header_len: u64, window: usize) -> std::io::Result<f64> {
    let mut buf = vec![0u8; window];
    file.seek(SeekFrom::Start(position))?;
    let n = file.read(&mut buf)?;
    if n == 0 {
        return Ok(0.0);
    }
    let body_offset = position - header_len;
    let matches = buf[..n]
        .iter()
        .enumerate()
        .filter(|(i, b)| **b == PATTERN[(body_offset as usize + i) % PATTERN.len()])
        .count();
    Ok(matches as f64 / n as f64)
}

fn verify_pattern_positions(
    file: &mut File,
    header_len: u64,
    body_end: u64,
    positions: &[u64],
) -> Result<(), CodecFailure> {
    let window = PATTERN.len() * WINDOW_FACTOR;
    let max_pos = body_end.saturating_sub(window as u64).max(header_len);
    for &pos in positions {
        let pos = pos.clamp(header_len, max_pos);
        let ratio = score_pattern_window(file, pos, header_len, window)
            .map_err(|e| CodecFailure::ReadError(e.to_string()))?;
        if ratio < VALID_RATIO_THRESHOLD {
            return Err(CodecFailure::PatternMismatch {
                position: pos,
                valid_ratio: ratio,
            });
        }
    }
    Ok(())
}

fn body_bounds(size: u64, header_len: u64) -> (u64, u64) {
    (header_len, size.saturating_sub(header_len))
}

/// Full verification: header/footer match, plus five sampled pattern positions (near-start,
/// near-end, three random middle points), each scored over a `4x`-pattern-length window.
pub fn verify_full(path: &Path, expected_size: Option<u64>) -> Result<(), CodecFailure> {
    let mut file = File::open(path).map_err(|e| CodecFailure::ReadError(e.to_string()))?;
    let header_len = header_probe_len(&mut file)?;
    let (header, footer, size) =
        read_header_footer(&mut file, header_len).map_err(|e| CodecFailure::ReadError(e.to_string()))?;

    if let Some(expected) = expected_size
        && expected != size {
            return Err(CodecFailure::SizeMismatch { expected, actual: size });
        }
    if !check_header(&header) {
        return Err(CodecFailure::HeaderInvalid);
    }
    if header != footer {
        return Err(CodecFailure::HeaderFooterMismatch);
    }

    let (body_start, body_end) = body_bounds(size, header_len as u64);
    let mut rng = rand::rng();
    let near_start = body_start + (PATTERN.len() as u64);
    let near_end = body_end.saturating_sub(PATTERN.len() as u64 * 2);
    let mid_positions: Vec<u64> = (0..3)
        .map(|_| rng.random_range(body_start..body_end.max(body_start + 1)))
        .collect();
    let mut positions = vec![near_start, near_end];
    positions.extend(mid_positions);

    verify_pattern_positions(&mut file, body_start, body_end, &positions)
}

/// Quick verification: header/footer match plus one random middle pattern position.
pub fn verify_quick(path: &Path, expected_size: Option<u64>) -> Result<(), CodecFailure> {
    let mut file = File::open(path).map_err(|e| CodecFailure::ReadError(e.to_string()))?;
    let header_len = header_probe_len(&mut file)?;
    let (header, footer, size) =
        read_header_footer(&mut file, header_len).map_err(|e| CodecFailure::ReadError(e.to_string()))?;

    if let Some(expected) = expected_size
        && expected != size {
            return Err(CodecFailure::SizeMismatch { expected, actual: size });
        }
    if !check_header(&header) {
        return Err(CodecFailure::HeaderInvalid);
    }
    if header != footer {
        return Err(CodecFailure::HeaderFooterMismatch);
    }

    let (body_start, body_end) = body_bounds(size, header_len as u64);
    let mut rng = rand::rng();
    let position = rng.random_range(body_start..body_end.max(body_start + 1));
    verify_pattern_positions(&mut file, body_start, body_end, &[position])
}

/// Headers are variable-length (basename/timestamp embedded), so probe the line length by
/// scanning for the first `\n` rather than assuming a fixed width.
fn header_probe_len(file: &mut File) -> Result<usize, CodecFailure> {
    file.seek(SeekFrom::Start(0))
        .map_err(|e| CodecFailure::ReadError(e.to_string()))?;
    let mut probe = vec![0u8; 256];
    let n = file
        .read(&mut probe)
        .map_err(|e| CodecFailure::ReadError(e.to_string()))?;
    probe.truncate(n);
    match probe.iter().position(|&b| b == b'\n') {
        Some(idx) => Ok(idx + 1),
        None => Err(CodecFailure::HeaderInvalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancel() -> CancelHandle {
        CancelHandle::new()
    }

    #[test]
    fn round_trip_passes_full_and_quick_verify() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.bin");
        write_test_file(&path, 64 * 1024, 4096, &cancel()).unwrap();
        verify_full(&path, Some(64 * 1024)).unwrap();
        verify_quick(&path, Some(64 * 1024)).unwrap();
    }

    #[test]
    fn header_mutation_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.bin");
        write_test_file(&path, 64 * 1024, 4096, &cancel()).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] = b'X';
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            verify_full(&path, None),
            Err(CodecFailure::HeaderInvalid)
        ));
    }

    #[test]
    fn footer_mutation_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.bin");
        write_test_file(&path, 64 * 1024, 4096, &cancel()).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] = bytes[last].wrapping_add(1);
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            verify_full(&path, None),
            Err(CodecFailure::HeaderFooterMismatch)
        ));
    }

    #[test]
    fn body_corruption_is_detected() {
        // Corrupt right at the deterministic near-start sample point so detection
        // doesn't depend on the 3 random middle samples happening to land on it.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.bin");
        write_test_file(&path, 64 * 1024, 4096, &cancel()).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        let header_len = bytes.iter().position(|&b| b == b'\n').unwrap() + 1;
        let corrupt_at = header_len + PATTERN.len();
        for b in bytes
            .iter_mut()
            .skip(corrupt_at)
            .take(PATTERN.len() * WINDOW_FACTOR)
        {
            *b = 0;
        }
        std::fs::write(&path, &bytes).unwrap();
        let result = verify_full(&path, None);
        assert!(matches!(result, Err(CodecFailure::PatternMismatch { .. })));
    }

    #[test]
    fn size_mismatch_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.bin");
        write_test_file(&path, 64 * 1024, 4096, &cancel()).unwrap();
        assert!(matches!(
            verify_full(&path, Some(999)),
            Err(CodecFailure::SizeMismatch { .. })
        ));
    }

    #[test]
    fn cancellation_stops_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.bin");
        let handle = cancel();
        handle.cancel();
        let result = write_test_file(&path, 10 * 1024 * 1024, 512, &handle);
        assert!(result.is_err());
    }
}
