//! Target resolution: validates a parsed [`TargetRoot`] against the live filesystem before
//! any engine runs, across all three target kinds (drive, directory, share).

use std::path::PathBuf;

use crate::error::FiledoError;
use crate::types::{TargetRoot, VolumeInfo};
use crate::volume::volume_info_for;

/// A target that has been checked against the live filesystem: the path exists, is a
/// directory, and is writable (a zero-byte probe file is created and removed).
#[derive(Debug)]
pub struct ResolvedTarget {
    pub root: TargetRoot,
    pub path: PathBuf,
    pub volume: VolumeInfo,
}

/// Parse and resolve `raw` into a [`ResolvedTarget`]: a single readable, writable filesystem
/// location, checked before any engine runs.
pub fn resolve(raw: &str) -> Result<ResolvedTarget, FiledoError> {
    let root = TargetRoot::parse(raw)
        .ok_or_else(|| FiledoError::InvalidTarget(format!("unrecognized target: {raw}")))?;
    let path = root.path();

    if !path.is_dir() {
        return Err(FiledoError::InvalidTarget(format!(
            "{} is not an accessible directory",
            path.display()
        )));
    }

    check_writable(&path)?;
    let volume = volume_info_for(&path);
    Ok(ResolvedTarget { root, path, volume })
}

fn check_writable(path: &std::path::Path) -> Result<(), FiledoError> {
    let probe = path.join(format!(".filedo_write_probe_{}", std::process::id()));
    match std::fs::File::create(&probe) {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Err(
            FiledoError::PermissionDenied(format!("{} is not writable", path.display())),
        ),
        Err(e) => Err(FiledoError::from_io_or_disk_full(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(resolved.path, dir.path());
    }

    #[test]
    fn rejects_nonexistent_path() {
        let err = resolve("/definitely/not/a/real/path/xyz").unwrap_err();
        assert!(matches!(err, FiledoError::InvalidTarget(_)));
    }
}
