//! Environment directory management.
//!
//! ```text
//! <env_path>/
//! ├─ LOCK          # advisory lock, one process at a time
//! ├─ wal.log       # write-ahead log since the last checkpoint
//! └─ data.snap     # last checkpoint snapshot
//! ```

use crate::error::{EnvError, EnvResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const WAL_FILE: &str = "wal.log";
const SNAPSHOT_FILE: &str = "data.snap";
const SNAPSHOT_TEMP: &str = "data.snap.tmp";

/// Returns true if `file` is one of the environment's data files.
#[must_use]
pub fn is_env_data_file(file: &Path) -> bool {
    matches!(
        file.file_name().and_then(|n| n.to_str()),
        Some(WAL_FILE | SNAPSHOT_FILE)
    )
}

/// An environment directory held under an exclusive lock.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct EnvDir {
    path: PathBuf,
    _lock_file: File,
}

impl EnvDir {
    /// Opens (optionally creating) the directory and takes the lock.
    ///
    /// # Errors
    ///
    /// - [`EnvError::InvalidFormat`] if the path is missing and
    ///   `create_if_missing` is false, or is not a directory
    /// - [`EnvError::EnvLocked`] if another handle holds the lock
    pub fn open(path: &Path, create_if_missing: bool) -> EnvResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(EnvError::invalid_format(format!(
                    "environment directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(EnvError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(EnvError::EnvLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the write-ahead log.
    #[must_use]
    pub fn wal_path(&self) -> PathBuf {
        self.path.join(WAL_FILE)
    }

    /// Path of the checkpoint snapshot.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.path.join(SNAPSHOT_FILE)
    }

    /// Reads the snapshot, or `None` before the first checkpoint.
    pub fn load_snapshot(&self) -> EnvResult<Option<Vec<u8>>> {
        match fs::read(self.snapshot_path()) {
            Ok(data) if data.is_empty() => Ok(None),
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Replaces the snapshot atomically: temp file, fsync, rename, then
    /// fsync of the directory so the rename itself is durable.
    pub fn save_snapshot(&self, data: &[u8]) -> EnvResult<()> {
        let temp_path = self.path.join(SNAPSHOT_TEMP);
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.snapshot_path())?;
        self.sync_directory()
    }

    /// Bytes used by the data files.
    pub fn size_on_disk(&self) -> EnvResult<u64> {
        let mut total = 0;
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if is_env_data_file(&entry.path()) {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> EnvResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> EnvResult<()> {
        // NTFS journals the rename
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();
        let first = EnvDir::open(dir.path(), true).unwrap();
        assert!(matches!(
            EnvDir::open(dir.path(), true),
            Err(EnvError::EnvLocked)
        ));
        drop(first);
        assert!(EnvDir::open(dir.path(), true).is_ok());
    }

    #[test]
    fn missing_dir_without_create_fails() {
        let dir = tempdir().unwrap();
        let result = EnvDir::open(&dir.path().join("absent"), false);
        assert!(matches!(result, Err(EnvError::InvalidFormat { .. })));
    }

    #[test]
    fn snapshot_save_replaces_content() {
        let dir = tempdir().unwrap();
        let env_dir = EnvDir::open(dir.path(), true).unwrap();
        assert!(env_dir.load_snapshot().unwrap().is_none());

        env_dir.save_snapshot(b"first").unwrap();
        env_dir.save_snapshot(b"second").unwrap();
        assert_eq!(env_dir.load_snapshot().unwrap().unwrap(), b"second");
        assert!(!dir.path().join(SNAPSHOT_TEMP).exists());
        assert_eq!(env_dir.size_on_disk().unwrap(), 6);
    }

    #[test]
    fn data_file_names() {
        assert!(is_env_data_file(Path::new("/x/wal.log")));
        assert!(is_env_data_file(Path::new("data.snap")));
        assert!(!is_env_data_file(Path::new("LOCK")));
    }
}
