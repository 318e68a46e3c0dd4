//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A byte budget shared by every backend of a [`crate::MemoryStore`].
///
/// Appends that would exceed the budget fail with [`StorageError::Full`];
/// truncation gives bytes back. Raising the budget with [`StorageQuota::set`]
/// makes a "full" store writable again, which is how tests simulate a disk
/// that regains free space.
#[derive(Debug, Clone)]
pub struct StorageQuota {
    remaining: Arc<AtomicU64>,
}

impl StorageQuota {
    /// Creates a quota with `bytes` available.
    #[must_use]
    pub fn new(bytes: u64) -> Self {
        Self {
            remaining: Arc::new(AtomicU64::new(bytes)),
        }
    }

    /// Returns the number of bytes still available.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Resets the available byte count.
    pub fn set(&self, bytes: u64) {
        self.remaining.store(bytes, Ordering::Release);
    }

    fn try_consume(&self, bytes: u64) -> StorageResult<()> {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| {
                left.checked_sub(bytes)
            })
            .map(|_| ())
            .map_err(|available| StorageError::Full {
                requested: bytes,
                available,
            })
    }

    fn release(&self, bytes: u64) {
        self.remaining.fetch_add(bytes, Ordering::AcqRel);
    }
}

/// An in-memory storage backend.
///
/// Clones share the same buffer, so a [`crate::MemoryStore`] can hand out
/// several handles to one "file" and keep it alive across a simulated
/// restart of the engine.
///
/// # Example
///
/// ```rust
/// use strata_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
    quota: Option<StorageQuota>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend whose appends draw from `quota`.
    #[must_use]
    pub fn with_quota(quota: StorageQuota) -> Self {
        Self {
            data: Arc::default(),
            quota: Some(quota),
        }
    }

    /// Creates a backend holding `data`.
    ///
    /// Useful for feeding hand-crafted or damaged bytes to recovery.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            quota: None,
        }
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Overwrites the byte at `offset`. Test hook for corruption scenarios.
    ///
    /// Returns false if `offset` is out of range.
    pub fn corrupt_byte(&self, offset: u64, value: u8) -> bool {
        let mut data = self.data.write();
        match usize::try_from(offset).ok().and_then(|o| data.get_mut(o)) {
            Some(byte) => {
                *byte = value;
                true
            }
            None => false,
        }
    }

    /// Returns true if both handles share one buffer.
    #[must_use]
    pub fn shares_buffer_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        // Both bounds were checked against a usize length above.
        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        if let Some(quota) = &self.quota {
            quota.try_consume(new_data.len() as u64)?;
        }
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let current_size = data.len() as u64;

        if new_size > current_size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to size {new_size} which is greater than current size {current_size}"
                ),
            )));
        }

        data.truncate(new_size as usize);
        if let Some(quota) = &self.quota {
            quota.release(current_size - new_size);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.read_at(0, 11).unwrap(), b"hello world");
    }

    #[test]
    fn clones_share_the_buffer() {
        let mut writer = InMemoryBackend::new();
        let reader = writer.clone();
        writer.append(b"shared").unwrap();

        assert!(reader.shares_buffer_with(&writer));
        assert_eq!(reader.read_all().unwrap(), b"shared");
    }

    #[test]
    fn quota_rejects_oversized_append() {
        let quota = StorageQuota::new(8);
        let mut backend = InMemoryBackend::with_quota(quota.clone());

        backend.append(b"12345").unwrap();
        let err = backend.append(b"6789").unwrap_err();
        assert!(matches!(
            err,
            StorageError::Full {
                requested: 4,
                available: 3
            }
        ));
        // A failed append leaves the data untouched.
        assert_eq!(backend.size().unwrap(), 5);

        quota.set(100);
        backend.append(b"6789").unwrap();
        assert_eq!(backend.read_all().unwrap(), b"123456789");
    }

    #[test]
    fn truncate_returns_bytes_to_quota() {
        let quota = StorageQuota::new(10);
        let mut backend = InMemoryBackend::with_quota(quota.clone());
        backend.append(b"0123456789").unwrap();
        assert_eq!(quota.remaining(), 0);

        backend.truncate(4).unwrap();
        assert_eq!(quota.remaining(), 6);
    }

    #[test]
    fn corrupt_byte_in_range_only() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"abc").unwrap();

        assert!(backend.corrupt_byte(1, b'X'));
        assert!(!backend.corrupt_byte(3, b'X'));
        assert_eq!(backend.data(), b"aXc");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn quota_accounts_for_every_accepted_byte(
                budget in 0u64..512,
                writes in prop::collection::vec(0usize..96, 0..16),
            ) {
                let quota = StorageQuota::new(budget);
                let mut backend = InMemoryBackend::with_quota(quota.clone());
                let mut accepted = 0u64;
                for len in writes {
                    let before = backend.size().unwrap();
                    match backend.append(&vec![7u8; len]) {
                        Ok(offset) => {
                            prop_assert_eq!(offset, before);
                            accepted += len as u64;
                        }
                        Err(StorageError::Full { .. }) => {
                            prop_assert_eq!(backend.size().unwrap(), before);
                        }
                        Err(other) => prop_assert!(false, "unexpected error: {}", other),
                    }
                }
                prop_assert_eq!(backend.size().unwrap(), accepted);
                prop_assert_eq!(quota.remaining(), budget - accepted);
            }
        }
    }
}
