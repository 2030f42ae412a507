//! Removal of rotated log files past their retention period.

use log::{debug, info};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub const DEFAULT_RETENTION_DAYS: u64 = 7;

/// Rotated files are named `<file>.log.<YYYY-MM-DD>`.
const ROTATED_MARKER: &str = ".log.";

fn is_rotated_log(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.contains(ROTATED_MARKER))
}

/// Finds rotated log files directly under `dir` whose modification time is
/// older than `retention_days`. They are deleted only when `delete` is set;
/// otherwise the run is a dry run. Returns the matching paths, sorted.
pub fn clean_log_files(dir: &Path, retention_days: u64, delete: bool) -> io::Result<Vec<PathBuf>> {
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(retention_days.saturating_mul(24 * 60 * 60)))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut expired = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() || !is_rotated_log(&path) {
            continue;
        }
        if entry.metadata()?.modified()? < cutoff {
            expired.push(path);
        }
    }
    expired.sort();

    for path in &expired {
        if delete {
            fs::remove_file(path)?;
            info!("deleted {}", path.display());
        } else {
            debug!("would delete {}", path.display());
        }
    }
    Ok(expired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn touch(dir: &Path, name: &str, age_days: u64) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_days * 24 * 60 * 60);
        file.set_modified(mtime).unwrap();
        path
    }

    #[test]
    fn dry_run_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        let old = touch(dir.path(), "app.log.2024-01-01", 30);
        touch(dir.path(), "app.log.2024-03-01", 1);
        touch(dir.path(), "app.log", 30);
        touch(dir.path(), "notes.txt", 30);

        let found = clean_log_files(dir.path(), DEFAULT_RETENTION_DAYS, false).unwrap();
        assert_eq!(found, vec![old.clone()]);
        assert!(old.exists());
    }

    #[test]
    fn delete_removes_only_expired_rotations() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "app.log.2024-01-01", 10);
        let b = touch(dir.path(), "app.log.2024-01-02", 9);
        let fresh = touch(dir.path(), "app.log.2024-03-01", 2);
        let active = touch(dir.path(), "app.log", 40);

        let removed = clean_log_files(dir.path(), 7, true).unwrap();
        assert_eq!(removed, vec![a.clone(), b.clone()]);
        assert!(!a.exists());
        assert!(!b.exists());
        assert!(fresh.exists());
        assert!(active.exists());
    }

    #[test]
    fn missing_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(clean_log_files(&dir.path().join("nope"), 7, false).is_err());
    }
}
