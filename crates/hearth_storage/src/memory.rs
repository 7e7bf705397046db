//! Volatile backend over a shared byte buffer.

use crate::backend::{checked_range, StorageBackend};
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::sync::Arc;

/// A backend that keeps its bytes in memory.
///
/// Used by in-memory stores and by tests. Handles created with
/// [`share`](InMemoryBackend::share) point at the same buffer, so a test
/// can drop a store and open a new one over whatever bytes the first one
/// left behind, torn writes included.
///
/// # Example
///
/// ```rust
/// use hearth_storage::{InMemoryBackend, StorageBackend};
///
/// let mut journal = InMemoryBackend::new();
/// let inspector = journal.share();
///
/// journal.append(b"HJNL").unwrap();
/// assert_eq!(inspector.data(), b"HJNL");
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a buffer holding `data`, e.g. a damaged journal.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(data)),
        }
    }

    /// Returns a second handle onto the same buffer.
    #[must_use]
    pub fn share(&self) -> Self {
        self.clone()
    }

    /// Copies out the current bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let bytes = self.bytes.lock();
        let (start, end) = checked_range(offset, len, bytes.len() as u64)?;
        Ok(bytes[start..end].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut bytes = self.bytes.lock();
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.bytes.lock().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut bytes = self.bytes.lock();
        let size = bytes.len() as u64;
        match usize::try_from(new_size) {
            Ok(len) if new_size <= size => {
                bytes.truncate(len);
                Ok(())
            }
            _ => Err(StorageError::InvalidTruncate {
                requested: new_size,
                size,
            }),
        }
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let mut bytes = self.bytes.lock();
        bytes.clear();
        bytes.extend_from_slice(data);
        Ok(())
    }
}
