//! Single-file byte store.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A byte store kept in one OS file.
///
/// `flush` hands data to the OS; `sync` calls `File::sync_all`. The cached
/// size is the append position and is kept under the same lock as the file
/// handle so reads never observe a half-finished append.
///
/// ```no_run
/// use proxyrepo_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut wal = FileBackend::open(Path::new("wal.log")).unwrap();
/// wal.append(b"record").unwrap();
/// wal.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<FileState>,
}

#[derive(Debug)]
struct FileState {
    file: File,
    size: u64,
}

impl FileBackend {
    /// Opens `path`, creating an empty file if it does not exist.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(FileState { file, size }),
        })
    }

    /// Opens `path`, creating missing parent directories first.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut state = self.inner.lock();
        let size = state.size;
        let end = offset.checked_add(len as u64);
        if end.map_or(true, |end| end > size) {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        state.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        state.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut state = self.inner.lock();
        let offset = state.size;
        if data.is_empty() {
            return Ok(offset);
        }

        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(data)?;
        state.size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.lock().file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().size)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut state = self.inner.lock();
        if new_size > state.size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: state.size,
            });
        }

        state.file.set_len(new_size)?;
        state.file.sync_all()?;
        state.size = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_open_creates_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");

        let store = FileBackend::open(&path).unwrap();
        assert_eq!(store.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(store.path(), path);
    }

    #[test]
    fn file_content_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");

        {
            let mut store = FileBackend::open(&path).unwrap();
            store.append(b"first").unwrap();
            store.append(b"second").unwrap();
            store.sync().unwrap();
        }

        let store = FileBackend::open(&path).unwrap();
        assert_eq!(store.size().unwrap(), 11);
        assert_eq!(store.read_at(5, 6).unwrap(), b"second");
    }

    #[test]
    fn file_append_after_truncate_overwrites_tail() {
        let dir = tempdir().unwrap();
        let mut store = FileBackend::open(&dir.path().join("wal.log")).unwrap();
        store.append(b"committed|torn").unwrap();

        store.truncate(10).unwrap();
        assert_eq!(store.append(b"next").unwrap(), 10);
        assert_eq!(store.read_all().unwrap(), b"committed|next");
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut store = FileBackend::open(&dir.path().join("wal.log")).unwrap();
        store.append(b"abc").unwrap();

        assert!(matches!(
            store.read_at(1, 3),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(store.truncate(4).is_err());
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("env").join("nested").join("data.snap");

        let mut store = FileBackend::open_with_create_dirs(&path).unwrap();
        store.replace(b"snapshot").unwrap();
        assert_eq!(store.read_all().unwrap(), b"snapshot");
    }
}
