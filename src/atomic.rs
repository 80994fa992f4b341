//! Crash-safe file primitives.
//!
//! - [`atomic_write`]: tempfile + fsync + rename; readers see the old or the
//!   new content, never a mix.
//! - [`create_exclusive`]: tempfile + fsync + no-clobber link; the target
//!   appears fully written or not at all, and only one concurrent creator
//!   can win.

use std::io::{self, Write};
use std::path::Path;

fn parent_of(path: &Path) -> io::Result<&Path> {
    path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "Path has no parent directory")
    })
}

fn staged(path: &Path, content: &[u8]) -> io::Result<tempfile::NamedTempFile> {
    // Same directory as the target, so the final rename/link stays on one filesystem.
    let mut temp = tempfile::Builder::new()
        .prefix(".staged-")
        .tempfile_in(parent_of(path)?)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    Ok(temp)
}

/// Replace `path` with `content` atomically.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let temp = staged(path, content)?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create `path` with `content` only if it does not already exist.
///
/// Returns `Ok(false)` when another writer got there first.
pub(crate) fn create_exclusive(path: &Path, content: &[u8]) -> io::Result<bool> {
    let temp = staged(path, content)?;
    match temp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_atomic_write_replaces_content() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("doc.json");
        fs::write(&file_path, b"original content").unwrap();

        atomic_write(&file_path, b"modified").unwrap();
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "modified");
    }

    #[test]
    fn test_create_exclusive_only_first_wins() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("doc.lock");

        assert!(create_exclusive(&file_path, b"first").unwrap());
        assert!(!create_exclusive(&file_path, b"second").unwrap());
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "first");
    }

    #[test]
    fn test_create_exclusive_leaves_no_staging_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("doc.lock");
        create_exclusive(&file_path, b"first").unwrap();
        create_exclusive(&file_path, b"second").unwrap();

        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, ["doc.lock"]);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("missing").join("doc.lock");
        assert!(create_exclusive(&file_path, b"x").is_err());
    }
}
