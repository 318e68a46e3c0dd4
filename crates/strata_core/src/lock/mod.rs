//! Collection locking.
//!
//! Two locks guard a collection:
//!
//! - the [`CollectionLock`], taken by readers and writers of documents
//! - the [`CompactionLock`], which bulk operations hold to keep the
//!   compactor away
//!
//! Locks are taken in this order: compaction lock, collection lock,
//! segment list, revision cache.

mod collection;
mod coordinator;

pub use collection::{CollectionGuard, CollectionLock, LockOwner};
pub use coordinator::{BlockedGuard, LockCoordinator, LockMode};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Keeps compaction and bulk operations apart.
///
/// Bulk operations take the shared side to prevent compaction; the
/// compactor takes the exclusive side and skips the collection if it
/// cannot get it right away.
#[derive(Debug, Default)]
pub struct CompactionLock {
    inner: RwLock<()>,
}

impl CompactionLock {
    /// Creates an unlocked lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks compaction until the guard is dropped.
    pub fn prevent_compaction(&self) -> RwLockReadGuard<'_, ()> {
        self.inner.read()
    }

    /// Blocks compaction if no compaction is running.
    pub fn try_prevent_compaction(&self) -> Option<RwLockReadGuard<'_, ()>> {
        self.inner.try_read()
    }

    /// Waits for bulk operations to finish and locks them out.
    pub fn lock_for_compaction(&self) -> RwLockWriteGuard<'_, ()> {
        self.inner.write()
    }

    /// Locks bulk operations out if none is running.
    pub fn try_lock_for_compaction(&self) -> Option<RwLockWriteGuard<'_, ()>> {
        self.inner.try_write()
    }
}
