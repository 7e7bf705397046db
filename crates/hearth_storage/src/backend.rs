//! Storage backend trait definition.

use crate::error::{StorageError, StorageResult};

/// A low-level byte store used by the HearthDB persistence adapter.
///
/// Backends do not interpret what they hold. The journal is written with
/// [`append`](StorageBackend::append) and reclaimed with
/// [`truncate`](StorageBackend::truncate); checkpoint snapshots are written
/// with [`replace`](StorageBackend::replace).
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `replace` is all-or-nothing: a reader sees the old or the new content
/// - Backends must be `Send + Sync`
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read would extend beyond the current size
    /// or an I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes pending writes to the operating system.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs data and metadata to durable storage.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the storage to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the entire content with `data`.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;

    /// Reads the entire content.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size)
            .map_err(|_| StorageError::Corrupted(format!("storage too large: {size}")))?;
        self.read_at(0, len)
    }
}

/// Checks that `len` bytes at `offset` lie within `size` bytes.
///
/// Returns the range as `usize` bounds.
pub(crate) fn checked_range(offset: u64, len: usize, size: u64) -> StorageResult<(usize, usize)> {
    let past_end = || StorageError::ReadPastEnd { offset, len, size };
    let end = offset.checked_add(len as u64).ok_or_else(past_end)?;
    if end > size {
        return Err(past_end());
    }
    let start = usize::try_from(offset).map_err(|_| past_end())?;
    Ok((start, start + len))
}
