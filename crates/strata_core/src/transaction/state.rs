//! Transaction state.

use super::TransactionManager;
use crate::collection::Collection;
use crate::document::{Document, DocumentOperation, OperationOptions, WriteResult};
use crate::error::{CoreError, CoreResult};
use crate::lock::{CollectionGuard, LockCoordinator, LockMode, LockOwner};
use crate::stats::DatabaseStats;
use crate::types::{CollectionId, TransactionId};
use std::sync::Arc;
use std::time::Duration;
use strata_codec::Value;
use tracing::{debug, warn};

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// A held collection lock.
struct Held {
    collection: Arc<Collection>,
    guard: CollectionGuard,
    needs_sync: bool,
}

/// An active transaction.
///
/// Other transactions see the writes once the locks are released. A
/// transaction is bound to the thread that created it, and dropping it
/// while active aborts it.
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    manager: Arc<TransactionManager>,
    coordinator: Arc<LockCoordinator>,
    stats: Arc<DatabaseStats>,
    lock_timeout: Duration,
    locks: Vec<Held>,
    operations: Vec<DocumentOperation>,
}

impl Transaction {
    pub(crate) fn new(
        manager: Arc<TransactionManager>,
        coordinator: Arc<LockCoordinator>,
        stats: Arc<DatabaseStats>,
        lock_timeout: Duration,
    ) -> Self {
        let id = manager.register();
        debug!(transaction = %id, "transaction started");
        Self {
            id,
            state: TransactionState::Active,
            manager,
            coordinator,
            stats,
            lock_timeout,
            locks: Vec::new(),
            operations: Vec::new(),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Number of writes recorded so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.operations.len()
    }

    /// Collections locked by this transaction and how.
    #[must_use]
    pub fn locked(&self) -> Vec<(CollectionId, LockMode)> {
        self.locks
            .iter()
            .map(|held| (held.guard.collection(), held.guard.mode()))
            .collect()
    }

    /// Locks `collection` for reading.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` or `Deadlock` if the lock cannot be taken.
    pub fn lock_read(&mut self, collection: &Arc<Collection>) -> CoreResult<()> {
        self.lock(collection, LockMode::Read).map(|_| ())
    }

    /// Locks `collection` for writing.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the transaction already holds the read
    /// side, or `LockTimeout` / `Deadlock`.
    pub fn lock_write(&mut self, collection: &Arc<Collection>) -> CoreResult<()> {
        self.lock(collection, LockMode::Write).map(|_| ())
    }

    /// Returns the index of the held lock covering `mode`.
    fn lock(&mut self, collection: &Arc<Collection>, mode: LockMode) -> CoreResult<usize> {
        self.ensure_active()?;
        if let Some(index) = self
            .locks
            .iter()
            .position(|held| held.guard.collection() == collection.id())
        {
            let held = self.locks[index].guard.mode();
            if held == LockMode::Read && mode == LockMode::Write {
                return Err(CoreError::invalid_argument(format!(
                    "transaction {} cannot upgrade its read lock on '{}'",
                    self.id,
                    collection.name()
                )));
            }
            return Ok(index);
        }

        let owner = LockOwner {
            coordinator: &self.coordinator,
            transaction: self.id,
        };
        let guard = collection.acquire(mode, self.lock_timeout, Some(owner))?;
        self.locks.push(Held {
            collection: Arc::clone(collection),
            guard,
            needs_sync: false,
        });
        Ok(self.locks.len() - 1)
    }

    /// Reads a document under this transaction's read lock.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` or a locking error.
    pub fn read(&mut self, collection: &Arc<Collection>, key: &str) -> CoreResult<Document> {
        self.lock(collection, LockMode::Read)?;
        collection.read_locked(key)
    }

    /// Inserts a document.
    ///
    /// # Errors
    ///
    /// See [`Collection::insert`].
    pub fn insert(
        &mut self,
        collection: &Arc<Collection>,
        body: Value,
        options: OperationOptions,
    ) -> CoreResult<WriteResult> {
        self.write(collection, &options, |c| c.insert_locked(body))
    }

    /// Updates a document.
    ///
    /// # Errors
    ///
    /// See [`Collection::update`].
    pub fn update(
        &mut self,
        collection: &Arc<Collection>,
        key: &str,
        patch: Value,
        options: OperationOptions,
    ) -> CoreResult<WriteResult> {
        self.write(collection, &options, |c| c.modify_locked(key, patch, &options, false))
    }

    /// Replaces a document.
    ///
    /// # Errors
    ///
    /// See [`Collection::replace`].
    pub fn replace(
        &mut self,
        collection: &Arc<Collection>,
        key: &str,
        body: Value,
        options: OperationOptions,
    ) -> CoreResult<WriteResult> {
        self.write(collection, &options, |c| c.modify_locked(key, body, &options, true))
    }

    /// Removes a document.
    ///
    /// # Errors
    ///
    /// See [`Collection::remove`].
    pub fn remove(
        &mut self,
        collection: &Arc<Collection>,
        key: &str,
        options: OperationOptions,
    ) -> CoreResult<WriteResult> {
        self.write(collection, &options, |c| c.remove_locked(key, &options))
    }

    fn write<F>(
        &mut self,
        collection: &Arc<Collection>,
        options: &OperationOptions,
        write: F,
    ) -> CoreResult<WriteResult>
    where
        F: FnOnce(&Arc<Collection>) -> CoreResult<(WriteResult, Option<DocumentOperation>)>,
    {
        let index = self.lock(collection, LockMode::Write)?;
        let (result, operation) = write(collection)?;
        if let Some(mut operation) = operation {
            self.operations.push(operation.swap());
            let held = &mut self.locks[index];
            held.needs_sync |= held.collection.needs_sync(options);
        }
        Ok(result)
    }

    /// Makes the writes durable where requested and releases the locks.
    ///
    /// If a sync fails the transaction is aborted instead.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` if already finished, or the sync error.
    pub fn commit(&mut self) -> CoreResult<()> {
        self.ensure_active()?;
        for held in self.locks.iter().filter(|held| held.needs_sync) {
            if let Err(err) = held.collection.sync() {
                warn!(transaction = %self.id, error = %err, "sync failed, aborting");
                self.rollback();
                return Err(err);
            }
        }
        for operation in &mut self.operations {
            operation.handled();
        }
        self.operations.clear();
        self.release(TransactionState::Committed);
        self.stats.record_commit();
        debug!(transaction = %self.id, "transaction committed");
        Ok(())
    }

    /// Reverts every write, newest first, and releases the locks.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` if already finished.
    pub fn abort(&mut self) -> CoreResult<()> {
        self.ensure_active()?;
        self.rollback();
        Ok(())
    }

    fn rollback(&mut self) {
        let count = self.operations.len();
        // A failed revert is logged by the operation; the rest still run.
        for mut operation in self.operations.drain(..).rev() {
            let _ = operation.revert();
        }
        self.release(TransactionState::Aborted);
        self.stats.record_abort();
        debug!(transaction = %self.id, reverted = count, "transaction aborted");
    }

    fn release(&mut self, state: TransactionState) {
        self.locks.clear();
        self.state = state;
        self.manager.finish(self.id);
    }

    fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed | TransactionState::Aborted => {
                Err(CoreError::TransactionInactive)
            }
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_active() {
            self.rollback();
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("locks", &self.locks.len())
            .field("writes", &self.operations.len())
            .finish()
    }
}
