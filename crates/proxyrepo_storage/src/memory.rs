//! Heap-backed byte store.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// A byte store that lives in process memory.
///
/// Used by `Env::open_in_memory` and by recovery tests, which seed a store
/// with hand-built log bytes through [`InMemoryBackend::with_data`].
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    bytes: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `data`.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            bytes: RwLock::new(data),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let bytes = self.bytes.read();
        let size = bytes.len() as u64;
        let start = usize::try_from(offset).map_err(|_| StorageError::ReadPastEnd {
            offset,
            len,
            size,
        })?;
        match start.checked_add(len) {
            Some(end) if end <= bytes.len() => Ok(bytes[start..end].to_vec()),
            _ => Err(StorageError::ReadPastEnd { offset, len, size }),
        }
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut bytes = self.bytes.write();
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut bytes = self.bytes.write();
        let size = bytes.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        // new_size <= len, so the cast cannot truncate
        bytes.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn memory_append_returns_previous_size() {
        let mut store = InMemoryBackend::new();
        assert_eq!(store.append(b"put").unwrap(), 0);
        assert_eq!(store.append(b"commit").unwrap(), 3);
        assert_eq!(store.size().unwrap(), 9);
    }

    #[test]
    fn memory_read_outside_store_fails() {
        let mut store = InMemoryBackend::new();
        store.append(b"abc").unwrap();

        assert!(matches!(
            store.read_at(2, 5),
            Err(StorageError::ReadPastEnd { size: 3, .. })
        ));
        assert!(matches!(
            store.read_at(u64::MAX, 1),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(store.read_at(3, 0).unwrap().is_empty());
    }

    #[test]
    fn memory_truncate_drops_tail() {
        let mut store = InMemoryBackend::with_data(b"keep-drop".to_vec());
        store.truncate(4).unwrap();
        assert_eq!(store.data(), b"keep");
        assert!(matches!(
            store.truncate(10),
            Err(StorageError::TruncateBeyondEnd { requested: 10, size: 4 })
        ));
    }

    #[test]
    fn memory_replace_swaps_content() {
        let mut store = InMemoryBackend::with_data(b"old snapshot".to_vec());
        store.replace(b"new").unwrap();
        assert_eq!(store.read_all().unwrap(), b"new");
    }

    proptest! {
        #[test]
        fn memory_appends_read_back_in_order(chunks in prop::collection::vec(
            prop::collection::vec(any::<u8>(), 0..64), 0..16)) {
            let mut store = InMemoryBackend::new();
            let mut offsets = Vec::new();
            for chunk in &chunks {
                offsets.push(store.append(chunk).unwrap());
            }
            for (chunk, offset) in chunks.iter().zip(offsets) {
                prop_assert_eq!(&store.read_at(offset, chunk.len()).unwrap(), chunk);
            }
        }
    }
}
