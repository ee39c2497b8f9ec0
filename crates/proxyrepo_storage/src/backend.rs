//! The byte-store contract.

use crate::error::StorageResult;

/// An append-only byte store.
///
/// The environment keeps two of these: one for the write-ahead log and one
/// for the checkpoint snapshot. Offsets handed out by [`append`] are stable
/// until the store is truncated.
///
/// # Invariants
///
/// - `append` returns the offset the data starts at, equal to the size
///   before the call
/// - `read_at` returns exactly the bytes written at that offset
/// - after `sync` returns, everything appended so far survives a crash
///
/// [`append`]: StorageBackend::append
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range is not
    /// fully inside the store.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes.
    fn size(&self) -> StorageResult<u64>;

    /// Forces data and metadata to stable storage.
    fn sync(&mut self) -> StorageResult<()>;

    /// Cuts the store down to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::StorageError::TruncateBeyondEnd`] if `new_size`
    /// is larger than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads the whole store.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| {
            crate::StorageError::Corrupted(format!("store of {size} bytes does not fit in memory"))
        })?;
        self.read_at(0, len)
    }

    /// Replaces the whole content with `data` and syncs.
    ///
    /// This is not atomic: a crash in the middle leaves a partial store.
    /// Directory-backed environments write snapshots through a rename
    /// instead and only use this for non-file stores.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        self.truncate(0)?;
        self.append(data)?;
        self.sync()
    }
}
