//! Atomic file writes
//!
//! Content goes to a sibling `.tmp` file, is synced, then renamed over the
//! destination, so readers see either the old file or the new one.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

/// Atomically replace `path` with whatever `write_fn` writes.
///
/// ```ignore
/// atomic_write_with("data/snapshots/latest.json", |out| {
///     writeln!(out, "{}", meta_json)?;
///     writeln!(out, "{}", state_json)
/// })?;
/// ```
pub fn atomic_write_with<P, F>(path: P, write_fn: F) -> io::Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let path = path.as_ref();
    let temp_path = write_temp(path, write_fn)?;
    fs::rename(&temp_path, path)
}

/// Like [`atomic_write_with`], but an existing `path` is moved to `backup`
/// instead of being overwritten.
pub fn atomic_write_with_backup<P, B, F>(path: P, backup: B, write_fn: F) -> io::Result<()>
where
    P: AsRef<Path>,
    B: AsRef<Path>,
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let path = path.as_ref();
    let temp_path = write_temp(path, write_fn)?;
    rename_with_backup(&temp_path, path, backup.as_ref())
}

/// Write and sync the `.tmp` sibling of `path`; removed again on failure
fn write_temp<F>(path: &Path, write_fn: F) -> io::Result<PathBuf>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let temp_path = path.with_extension("tmp");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut out = BufWriter::new(File::create(&temp_path)?);
    let written = write_fn(&mut out).and_then(|()| {
        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(temp_path)
}

/// Rename `from` onto `to`, first moving an existing `to` to `backup`
fn rename_with_backup(from: &Path, to: &Path, backup: &Path) -> io::Result<()> {
    if to.exists() {
        if backup.exists() {
            fs::remove_file(backup)?;
        }
        fs::rename(to, backup)?;
    }
    fs::rename(from, to)
}

/// Remove `.tmp` files left behind by an interrupted write
pub fn cleanup_temp_files<P: AsRef<Path>>(dir: P) -> io::Result<usize> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(0);
    }

    let mut cleaned = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "tmp") {
            fs::remove_file(&path)?;
            cleaned += 1;
        }
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("state.json");

        atomic_write_with(&path, |out| out.write_all(b"{}")).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_atomic_write_with_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("latest.json");

        atomic_write_with(&path, |out| {
            writeln!(out, "meta")?;
            writeln!(out, "state")
        })
        .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "meta\nstate\n");
    }

    #[test]
    fn test_failed_write_keeps_old_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("latest.json");
        fs::write(&path, "old").unwrap();

        let result = atomic_write_with(&path, |out| {
            write!(out, "partial")?;
            Err(io::Error::new(io::ErrorKind::InvalidData, "encode failed"))
        });

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "old");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_atomic_write_with_backup() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("latest.json");
        let backup = temp_dir.path().join("previous.json");

        atomic_write_with_backup(&path, &backup, |out| write!(out, "first")).unwrap();
        assert!(!backup.exists());
        atomic_write_with_backup(&path, &backup, |out| write!(out, "second")).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "first");
    }

    #[test]
    fn test_rename_with_backup() {
        let temp_dir = TempDir::new().unwrap();
        let from = temp_dir.path().join("latest.tmp");
        let to = temp_dir.path().join("latest.json");
        let backup = temp_dir.path().join("previous.json");
        fs::write(&backup, "oldest").unwrap();
        fs::write(&from, "new").unwrap();
        fs::write(&to, "old").unwrap();

        rename_with_backup(&from, &to, &backup).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read_to_string(&to).unwrap(), "new");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "old");
    }

    #[test]
    fn test_cleanup_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("latest.tmp"), "x").unwrap();
        fs::write(temp_dir.path().join("latest.json"), "y").unwrap();

        assert_eq!(cleanup_temp_files(temp_dir.path()).unwrap(), 1);
        assert!(temp_dir.path().join("latest.json").exists());
        assert_eq!(cleanup_temp_files(temp_dir.path().join("missing")).unwrap(), 0);
    }
}
