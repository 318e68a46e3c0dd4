//! Wait-for graph of transactions blocked on collection locks.

use crate::error::{CoreError, CoreResult};
use crate::types::{CollectionId, TransactionId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Side of a collection's reader/writer lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared access.
    Read,
    /// Exclusive access.
    Write,
}

#[derive(Debug, Default)]
struct Holders {
    readers: HashSet<TransactionId>,
    writer: Option<TransactionId>,
}

#[derive(Debug, Default)]
struct WaitGraph {
    holders: HashMap<CollectionId, Holders>,
    blocked: HashMap<TransactionId, (CollectionId, LockMode)>,
}

impl WaitGraph {
    /// Transactions that `tx` is waiting for.
    fn waits_for(&self, tx: TransactionId) -> Vec<TransactionId> {
        let Some((collection, mode)) = self.blocked.get(&tx) else {
            return Vec::new();
        };
        let Some(holders) = self.holders.get(collection) else {
            return Vec::new();
        };
        let mut waits: Vec<TransactionId> = holders.writer.into_iter().collect();
        if *mode == LockMode::Write {
            waits.extend(holders.readers.iter().copied());
        }
        waits.retain(|other| *other != tx);
        waits
    }

    fn has_cycle_through(&self, start: TransactionId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = self.waits_for(start);
        while let Some(tx) = stack.pop() {
            if tx == start {
                return true;
            }
            if visited.insert(tx) {
                stack.extend(self.waits_for(tx));
            }
        }
        false
    }
}

/// Per-database deadlock detector.
///
/// Transactions register the locks they hold and the lock they are waiting
/// for. A wait that would close a cycle is refused with `Deadlock`.
#[derive(Debug, Default)]
pub struct LockCoordinator {
    graph: Mutex<WaitGraph>,
}

impl LockCoordinator {
    /// Creates an empty detector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `tx` holds `collection` in `mode`.
    pub fn add_holder(&self, tx: TransactionId, collection: CollectionId, mode: LockMode) {
        let mut graph = self.graph.lock();
        let holders = graph.holders.entry(collection).or_default();
        match mode {
            LockMode::Read => {
                holders.readers.insert(tx);
            }
            LockMode::Write => holders.writer = Some(tx),
        }
    }

    /// Records that `tx` released `collection`.
    pub fn remove_holder(&self, tx: TransactionId, collection: CollectionId, mode: LockMode) {
        let mut graph = self.graph.lock();
        if let Some(holders) = graph.holders.get_mut(&collection) {
            match mode {
                LockMode::Read => {
                    holders.readers.remove(&tx);
                }
                LockMode::Write => {
                    if holders.writer == Some(tx) {
                        holders.writer = None;
                    }
                }
            }
            if holders.readers.is_empty() && holders.writer.is_none() {
                graph.holders.remove(&collection);
            }
        }
    }

    /// Registers `tx` as waiting for `collection`.
    ///
    /// The registration lasts until the returned guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns `Deadlock` (and registers nothing) if the wait closes a cycle.
    pub fn set_blocked(
        &self,
        tx: TransactionId,
        collection: CollectionId,
        mode: LockMode,
    ) -> CoreResult<BlockedGuard<'_>> {
        let mut graph = self.graph.lock();
        graph.blocked.insert(tx, (collection, mode));
        if graph.has_cycle_through(tx) {
            graph.blocked.remove(&tx);
            debug!(%tx, %collection, ?mode, "refusing wait that closes a lock cycle");
            return Err(CoreError::Deadlock { collection });
        }
        Ok(BlockedGuard {
            coordinator: self,
            tx,
        })
    }

    /// True if `tx` is waiting as part of a cycle.
    #[must_use]
    pub fn detect(&self, tx: TransactionId) -> bool {
        let graph = self.graph.lock();
        graph.blocked.contains_key(&tx) && graph.has_cycle_through(tx)
    }

    /// Number of registered waiters.
    #[must_use]
    pub fn blocked_count(&self) -> usize {
        self.graph.lock().blocked.len()
    }

    /// Number of collections with registered holders.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.graph.lock().holders.len()
    }
}

/// Keeps a waiter registered; unregisters on drop.
#[derive(Debug)]
pub struct BlockedGuard<'a> {
    coordinator: &'a LockCoordinator,
    tx: TransactionId,
}

impl Drop for BlockedGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.graph.lock().blocked.remove(&self.tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: CollectionId = CollectionId::new(1);
    const B: CollectionId = CollectionId::new(2);
    const T1: TransactionId = TransactionId::new(1);
    const T2: TransactionId = TransactionId::new(2);
    const T3: TransactionId = TransactionId::new(3);

    #[test]
    fn crossing_writers_deadlock() {
        let coordinator = LockCoordinator::new();
        coordinator.add_holder(T1, A, LockMode::Write);
        coordinator.add_holder(T2, B, LockMode::Write);

        let waiting = coordinator.set_blocked(T1, B, LockMode::Write).unwrap();
        assert!(!coordinator.detect(T1));

        let err = coordinator.set_blocked(T2, A, LockMode::Write).unwrap_err();
        assert!(matches!(err, CoreError::Deadlock { collection } if collection == A));
        assert_eq!(coordinator.blocked_count(), 1);

        drop(waiting);
        assert_eq!(coordinator.blocked_count(), 0);
    }

    #[test]
    fn readers_do_not_wait_for_readers() {
        let coordinator = LockCoordinator::new();
        coordinator.add_holder(T1, A, LockMode::Read);
        coordinator.add_holder(T2, B, LockMode::Read);

        let _t1 = coordinator.set_blocked(T1, B, LockMode::Read).unwrap();
        assert!(coordinator.set_blocked(T2, A, LockMode::Read).is_ok());
    }

    #[test]
    fn three_way_cycle() {
        let coordinator = LockCoordinator::new();
        let c = CollectionId::new(3);
        coordinator.add_holder(T1, A, LockMode::Write);
        coordinator.add_holder(T2, B, LockMode::Write);
        coordinator.add_holder(T3, c, LockMode::Read);

        let _t1 = coordinator.set_blocked(T1, B, LockMode::Read).unwrap();
        let _t2 = coordinator.set_blocked(T2, c, LockMode::Write).unwrap();
        assert!(coordinator.set_blocked(T3, A, LockMode::Read).is_err());
    }

    #[test]
    fn holders_are_released() {
        let coordinator = LockCoordinator::new();
        coordinator.add_holder(T1, A, LockMode::Write);
        coordinator.remove_holder(T1, A, LockMode::Write);
        assert_eq!(coordinator.held_count(), 0);

        coordinator.add_holder(T2, A, LockMode::Write);
        let _t1 = coordinator.set_blocked(T1, A, LockMode::Write).unwrap();
        coordinator.add_holder(T2, B, LockMode::Read);
        // T2 does not wait for anything, so no cycle.
        assert!(!coordinator.detect(T1));
    }
}
