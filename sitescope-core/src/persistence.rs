//! Shared persistence utilities: exclusive, all-or-nothing file creation.
//!
//! Report files are never overwritten. Content is written to a uniquely named
//! temporary sibling and then hard-linked to the target name, which fails if
//! the target already exists. Readers never observe a half-written file.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Create `path` with `data`, failing with `ErrorKind::AlreadyExists` if it exists.
///
/// Creates parent directories if they don't exist. On filesystems without
/// hard-link support the file is created with `create_new` instead, which is
/// still exclusive but not atomic with respect to readers.
pub fn write_new(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = tmp_sibling(path);
    write_staged(&tmp, |file| {
        file.write_all(data)?;
        file.sync_all()
    })?;
    let linked = std::fs::hard_link(&tmp, path);
    let _ = std::fs::remove_file(&tmp);

    match linked {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
        Err(e) => {
            tracing::debug!(error = %e, path = %path.display(), "Hard link unavailable, falling back to create_new");
            let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
            file.write_all(data)?;
            file.sync_all()
        }
    }
}

/// Create `tmp` and fill it with `fill`; the file is removed if filling fails.
fn write_staged(tmp: &Path, fill: impl FnOnce(&mut File) -> io::Result<()>) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(tmp)?;
    let filled = fill(&mut file);
    drop(file);
    if let Err(e) = filled {
        let _ = std::fs::remove_file(tmp);
        return Err(e);
    }
    Ok(())
}

/// A hidden, uniquely named temporary path next to `path`.
fn tmp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_new_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.md");

        write_new(&path, b"# Report").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Report");
    }

    #[test]
    fn test_write_new_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("dir").join("report.md");

        write_new(&path, b"content").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_write_new_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.md");

        write_new(&path, b"first").unwrap();
        let err = write_new(&path, b"second").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first");
    }

    #[test]
    fn test_write_new_no_tmp_leftover() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.md");

        write_new(&path, b"data").unwrap();
        let _ = write_new(&path, b"again");

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["report.md".to_string()]);
    }

    #[test]
    fn test_failed_staging_removes_tmp_file() {
        let dir = TempDir::new().unwrap();
        let tmp = tmp_sibling(&dir.path().join("report.md"));

        let err = write_staged(&tmp, |file| {
            file.write_all(b"partial")?;
            Err(io::Error::new(io::ErrorKind::StorageFull, "disk full"))
        })
        .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::StorageFull);
        assert!(!tmp.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_staging_keeps_filled_file() {
        let dir = TempDir::new().unwrap();
        let tmp = tmp_sibling(&dir.path().join("report.md"));

        write_staged(&tmp, |file| file.write_all(b"complete")).unwrap();
        assert_eq!(std::fs::read_to_string(&tmp).unwrap(), "complete");
    }

    #[test]
    fn test_tmp_sibling_is_hidden_and_unique() {
        let path = Path::new("/tmp/out/report.md");
        let a = tmp_sibling(path);
        let b = tmp_sibling(path);
        assert_ne!(a, b);
        assert_eq!(a.parent(), path.parent());
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".report.md."));
        assert!(name.ends_with(".tmp"));
    }
}
