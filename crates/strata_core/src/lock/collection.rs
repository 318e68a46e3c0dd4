//! Timed, deadlock-aware collection locks.

use super::coordinator::{BlockedGuard, LockCoordinator, LockMode};
use crate::error::{CoreError, CoreResult};
use crate::types::{CollectionId, TransactionId};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SPIN_PHASE: Duration = Duration::from_millis(1);
const MIN_BACKOFF: Duration = Duration::from_micros(1);
const MAX_BACKOFF: Duration = Duration::from_micros(32);
const DETECT_EVERY: u32 = 5;

/// A transaction taking part in deadlock detection.
#[derive(Clone, Copy)]
pub struct LockOwner<'a> {
    /// The database's detector.
    pub coordinator: &'a Arc<LockCoordinator>,
    /// The waiting transaction.
    pub transaction: TransactionId,
}

/// Reader/writer lock guarding one collection's documents.
#[derive(Clone)]
pub struct CollectionLock {
    collection: CollectionId,
    inner: Arc<RwLock<()>>,
}

impl CollectionLock {
    /// Creates an unlocked lock.
    #[must_use]
    pub fn new(collection: CollectionId) -> Self {
        Self {
            collection,
            inner: Arc::new(RwLock::new(())),
        }
    }

    fn try_acquire(&self, mode: LockMode) -> Option<GuardKind> {
        match mode {
            LockMode::Read => self.inner.try_read_arc().map(GuardKind::Read),
            LockMode::Write => self.inner.try_write_arc().map(GuardKind::Write),
        }
    }

    /// Acquires the lock within `timeout`.
    ///
    /// Callers that pass an `owner` are registered with its coordinator
    /// while they wait and while they hold the lock.
    ///
    /// # Errors
    ///
    /// Returns `Deadlock` if waiting would close a cycle and `LockTimeout`
    /// if the lock is not free in time.
    pub fn acquire(
        &self,
        mode: LockMode,
        timeout: Duration,
        owner: Option<LockOwner<'_>>,
    ) -> CoreResult<CollectionGuard> {
        let started = Instant::now();
        let mut backoff = MIN_BACKOFF;
        let mut iterations: u32 = 0;
        let mut waiting: Option<BlockedGuard<'_>> = None;

        loop {
            if let Some(kind) = self.try_acquire(mode) {
                let registration = owner.map(|owner| {
                    owner
                        .coordinator
                        .add_holder(owner.transaction, self.collection, mode);
                    Registration {
                        coordinator: Arc::clone(owner.coordinator),
                        transaction: owner.transaction,
                    }
                });
                drop(waiting);
                return Ok(CollectionGuard {
                    collection: self.collection,
                    mode,
                    _kind: kind,
                    registration,
                });
            }

            if let Some(owner) = owner {
                match &waiting {
                    None => {
                        waiting = Some(owner.coordinator.set_blocked(
                            owner.transaction,
                            self.collection,
                            mode,
                        )?);
                    }
                    Some(_) if iterations % DETECT_EVERY == 0 => {
                        if owner.coordinator.detect(owner.transaction) {
                            return Err(CoreError::Deadlock {
                                collection: self.collection,
                            });
                        }
                    }
                    Some(_) => {}
                }
            }
            iterations = iterations.wrapping_add(1);

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(CoreError::LockTimeout {
                    collection: self.collection,
                    timeout,
                });
            }
            if elapsed < SPIN_PHASE {
                thread::yield_now();
            } else {
                thread::sleep(backoff);
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

impl fmt::Debug for CollectionLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionLock")
            .field("collection", &self.collection)
            .field("locked", &self.inner.is_locked())
            .finish()
    }
}

enum GuardKind {
    Read(ArcRwLockReadGuard<RawRwLock, ()>),
    Write(ArcRwLockWriteGuard<RawRwLock, ()>),
}

struct Registration {
    coordinator: Arc<LockCoordinator>,
    transaction: TransactionId,
}

/// A held collection lock. Dropping it unlocks.
#[must_use = "the lock is released when the guard is dropped"]
pub struct CollectionGuard {
    collection: CollectionId,
    mode: LockMode,
    _kind: GuardKind,
    registration: Option<Registration>,
}

impl CollectionGuard {
    /// Collection this guard locks.
    #[must_use]
    pub fn collection(&self) -> CollectionId {
        self.collection
    }

    /// Side of the lock held.
    #[must_use]
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Releases the lock.
    pub fn unlock(self) {}
}

impl Drop for CollectionGuard {
    fn drop(&mut self) {
        if let Some(registration) = &self.registration {
            registration.coordinator.remove_holder(
                registration.transaction,
                self.collection,
                self.mode,
            );
        }
    }
}

impl fmt::Debug for CollectionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionGuard")
            .field("collection", &self.collection)
            .field("mode", &self.mode)
            .finish()
    }
}
