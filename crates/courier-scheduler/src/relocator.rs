//! Moving processed documents into the target folder.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::RelocateError;

/// The only component allowed to change a document's location.
pub trait Relocator: Send + Sync {
    /// Move `source` into `target_dir`, returning the final path.
    fn relocate(&self, source: &Path, target_dir: &Path) -> Result<PathBuf, RelocateError>;
}

/// Local / network file-system relocator.
///
/// Never overwrites: an existing `RE-1.pdf` in the target makes the new
/// file `RE-1_1.pdf`, then `RE-1_2.pdf`, and so on.
pub struct FsRelocator;

/// First free path for `file_name` inside `dir`.
pub fn unique_target(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    let ext = path.extension().and_then(|e| e.to_str());
    let mut n = 1u32;
    loop {
        let name = match ext {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Copy, flush to disk, then remove the original. Used when `rename`
/// cannot cross file systems. On any failure only `from` is left.
fn copy_then_remove(from: &Path, to: &Path) -> io::Result<()> {
    let mut reader = fs::File::open(from)?;
    let mut writer = fs::File::create_new(to)?;
    let written = io::copy(&mut reader, &mut writer).and_then(|_| writer.sync_all());
    drop(writer);
    if let Err(e) = written {
        let _ = fs::remove_file(to);
        return Err(e);
    }
    if let Err(e) = fs::remove_file(from) {
        // Keep exactly one copy; the source stays authoritative.
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

impl Relocator for FsRelocator {
    fn relocate(&self, source: &Path, target_dir: &Path) -> Result<PathBuf, RelocateError> {
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RelocateError::NoFileName(source.to_path_buf()))?;

        fs::create_dir_all(target_dir).map_err(|e| RelocateError::TargetFolder {
            path: target_dir.to_path_buf(),
            source: e,
        })?;

        let target = unique_target(target_dir, file_name);
        let moved = match fs::rename(source, &target) {
            Ok(()) => Ok(()),
            Err(e) if source.exists() => {
                debug!(error = %e, "rename failed; falling back to copy");
                copy_then_remove(source, &target)
            }
            Err(e) => Err(e),
        };
        moved.map_err(|e| RelocateError::Move {
            from: source.to_path_buf(),
            to: target.clone(),
            source: e,
        })?;

        info!(from = %source.display(), to = %target.display(), "document relocated");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moves_into_created_target() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("RE-1.pdf");
        fs::write(&src, b"pdf").unwrap();
        let target_dir = dir.path().join("RE - Rechnung");

        let moved = FsRelocator.relocate(&src, &target_dir).unwrap();
        assert_eq!(moved, target_dir.join("RE-1.pdf"));
        assert!(!src.exists());
        assert_eq!(fs::read(&moved).unwrap(), b"pdf");
    }

    #[test]
    fn never_clobbers_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let target_dir = dir.path().join("out");
        fs::create_dir(&target_dir).unwrap();
        fs::write(target_dir.join("RE-1.pdf"), b"old").unwrap();
        fs::write(target_dir.join("RE-1_1.pdf"), b"older").unwrap();

        let src = dir.path().join("RE-1.pdf");
        fs::write(&src, b"new").unwrap();
        let moved = FsRelocator.relocate(&src, &target_dir).unwrap();

        assert_eq!(moved, target_dir.join("RE-1_2.pdf"));
        assert_eq!(fs::read(target_dir.join("RE-1.pdf")).unwrap(), b"old");
        assert_eq!(fs::read(moved).unwrap(), b"new");
    }

    #[test]
    fn missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FsRelocator
            .relocate(&dir.path().join("RE-9.pdf"), dir.path())
            .unwrap_err();
        assert!(matches!(err, RelocateError::Move { .. }));
    }

    #[test]
    fn copy_fallback_keeps_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("RE-1.pdf");
        fs::write(&src, b"pdf").unwrap();
        let to = dir.path().join("copy.pdf");

        copy_then_remove(&src, &to).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(&to).unwrap(), b"pdf");
    }

    #[cfg(unix)]
    #[test]
    fn failed_copy_leaves_no_partial_target() {
        let dir = tempfile::tempdir().unwrap();
        // Opening a directory works on unix; reading it does not.
        let unreadable = dir.path().join("RE-2.pdf");
        fs::create_dir(&unreadable).unwrap();
        let to = dir.path().join("out.pdf");

        assert!(copy_then_remove(&unreadable, &to).is_err());
        assert!(!to.exists());
        assert!(unreadable.exists());
    }
}
