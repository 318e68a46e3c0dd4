//! Transaction id allocation and bookkeeping.

use crate::types::TransactionId;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out transaction ids and tracks which transactions are running.
#[derive(Debug)]
pub struct TransactionManager {
    next_id: AtomicU64,
    active: Mutex<BTreeSet<TransactionId>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            active: Mutex::new(BTreeSet::new()),
        }
    }
}

impl TransactionManager {
    /// Creates a manager whose first id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an id and registers it as running.
    pub(crate) fn register(&self) -> TransactionId {
        let id = TransactionId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.active.lock().insert(id);
        id
    }

    /// Unregisters a finished transaction.
    pub(crate) fn finish(&self, id: TransactionId) {
        self.active.lock().remove(&id);
    }

    /// Number of running transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Ids of running transactions, in start order.
    #[must_use]
    pub fn active(&self) -> Vec<TransactionId> {
        self.active.lock().iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sequential_and_tracked() {
        let manager = TransactionManager::new();
        let a = manager.register();
        let b = manager.register();
        assert_eq!(b.as_u64(), a.as_u64() + 1);
        assert_eq!(manager.active(), vec![a, b]);

        manager.finish(a);
        assert_eq!(manager.active_count(), 1);
        manager.finish(a);
        assert_eq!(manager.active(), vec![b]);
    }
}
