//! Database-wide operation counters.
//!
//! ```rust,ignore
//! let stats = db.stats();
//! println!("inserts: {}, conflicts: {}", stats.inserts, stats.conflicts);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every collection of a database.
///
/// All counters are atomic and can be read while operations are running.
#[derive(Debug, Default)]
pub struct DatabaseStats {
    reads: AtomicU64,
    bytes_read: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    replaces: AtomicU64,
    removes: AtomicU64,
    bytes_written: AtomicU64,

    conflicts: AtomicU64,
    rollbacks: AtomicU64,
    deadlocks: AtomicU64,
    lock_timeouts: AtomicU64,

    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,

    compaction_runs: AtomicU64,
    segments_compacted: AtomicU64,
    bytes_reclaimed: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl DatabaseStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self, bytes: u64) {
        bump(&self.reads, 1);
        bump(&self.bytes_read, bytes);
    }

    pub(crate) fn record_insert(&self) {
        bump(&self.inserts, 1);
    }

    pub(crate) fn record_update(&self) {
        bump(&self.updates, 1);
    }

    pub(crate) fn record_replace(&self) {
        bump(&self.replaces, 1);
    }

    pub(crate) fn record_remove(&self) {
        bump(&self.removes, 1);
    }

    pub(crate) fn record_bytes_written(&self, bytes: u64) {
        bump(&self.bytes_written, bytes);
    }

    pub(crate) fn record_conflict(&self) {
        bump(&self.conflicts, 1);
    }

    pub(crate) fn record_rollback(&self) {
        bump(&self.rollbacks, 1);
    }

    /// Counts lock failures by kind; other errors are ignored.
    pub(crate) fn record_lock_error(&self, err: &crate::error::CoreError) {
        match err {
            crate::error::CoreError::Deadlock { .. } => bump(&self.deadlocks, 1),
            crate::error::CoreError::LockTimeout { .. } => bump(&self.lock_timeouts, 1),
            _ => {}
        }
    }

    pub(crate) fn record_commit(&self) {
        bump(&self.transactions_committed, 1);
    }

    pub(crate) fn record_abort(&self) {
        bump(&self.transactions_aborted, 1);
    }

    pub(crate) fn record_compaction(&self, segments: u64, reclaimed: u64) {
        bump(&self.compaction_runs, 1);
        bump(&self.segments_compacted, segments);
        bump(&self.bytes_reclaimed, reclaimed);
    }

    /// Returns the number of document reads.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Returns the number of expected-revision conflicts.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Returns the number of rolled back document operations.
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            reads: load(&self.reads),
            bytes_read: load(&self.bytes_read),
            inserts: load(&self.inserts),
            updates: load(&self.updates),
            replaces: load(&self.replaces),
            removes: load(&self.removes),
            bytes_written: load(&self.bytes_written),
            conflicts: load(&self.conflicts),
            rollbacks: load(&self.rollbacks),
            deadlocks: load(&self.deadlocks),
            lock_timeouts: load(&self.lock_timeouts),
            transactions_committed: load(&self.transactions_committed),
            transactions_aborted: load(&self.transactions_aborted),
            compaction_runs: load(&self.compaction_runs),
            segments_compacted: load(&self.segments_compacted),
            bytes_reclaimed: load(&self.bytes_reclaimed),
        }
    }
}

/// A point-in-time copy of [`DatabaseStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Document reads.
    pub reads: u64,
    /// Body bytes read.
    pub bytes_read: u64,
    /// Inserted documents.
    pub inserts: u64,
    /// Updated documents.
    pub updates: u64,
    /// Replaced documents.
    pub replaces: u64,
    /// Removed documents.
    pub removes: u64,
    /// Marker bytes appended to journals.
    pub bytes_written: u64,
    /// Expected-revision conflicts.
    pub conflicts: u64,
    /// Rolled back document operations.
    pub rollbacks: u64,
    /// Lock waits refused because of a cycle.
    pub deadlocks: u64,
    /// Lock waits that timed out.
    pub lock_timeouts: u64,
    /// Committed transactions.
    pub transactions_committed: u64,
    /// Aborted transactions.
    pub transactions_aborted: u64,
    /// Compaction batches merged.
    pub compaction_runs: u64,
    /// Input segments consumed by compaction.
    pub segments_compacted: u64,
    /// Bytes freed by compaction.
    pub bytes_reclaimed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::types::CollectionId;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn default_stats_are_zero() {
        assert_eq!(DatabaseStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn lock_errors_are_split_by_kind() {
        let stats = DatabaseStats::new();
        let collection = CollectionId::new(1);
        stats.record_lock_error(&CoreError::Deadlock { collection });
        stats.record_lock_error(&CoreError::LockTimeout {
            collection,
            timeout: Duration::from_secs(1),
        });
        stats.record_lock_error(&CoreError::DatabaseClosed);

        let snap = stats.snapshot();
        assert_eq!((snap.deadlocks, snap.lock_timeouts), (1, 1));
    }

    #[test]
    fn compaction_totals() {
        let stats = DatabaseStats::new();
        stats.record_compaction(3, 4096);
        stats.record_compaction(1, 100);

        let snap = stats.snapshot();
        assert_eq!(snap.compaction_runs, 2);
        assert_eq!(snap.segments_compacted, 4);
        assert_eq!(snap.bytes_reclaimed, 4196);
    }

    #[test]
    fn concurrent_updates() {
        let stats = Arc::new(DatabaseStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        s.record_read(2);
                        s.record_insert();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.reads, 800);
        assert_eq!(snap.bytes_read, 1600);
        assert_eq!(snap.inserts, 800);
    }
}
