//! Per-segment statistics.
//!
//! Compaction picks candidates from these counters alone, so they are kept
//! exact on every write, rollback, recovery step and compaction swap
//! instead of being recomputed by scanning.

use crate::types::SegmentId;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;

/// Counters for one segment. Sizes are aligned on-disk marker sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SegmentStats {
    /// Document markers that are the current version of their key.
    pub number_alive: u64,
    /// Bytes of alive markers.
    pub size_alive: u64,
    /// Document markers superseded or removed since they were written.
    pub number_dead: u64,
    /// Bytes of dead markers.
    pub size_dead: u64,
    /// Remove markers.
    pub number_deletions: u64,
    /// Markers written since the segment was last synced.
    pub number_uncollected: u64,
}

impl SegmentStats {
    /// True if the segment holds no document or remove markers at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.number_alive == 0 && self.number_dead == 0 && self.number_deletions == 0
    }

    /// Adds `other` to these counters.
    pub fn accumulate(&mut self, other: &Self) {
        self.number_alive += other.number_alive;
        self.size_alive += other.size_alive;
        self.number_dead += other.number_dead;
        self.size_dead += other.size_dead;
        self.number_deletions += other.number_deletions;
        self.number_uncollected += other.number_uncollected;
    }

    fn add_alive(&mut self, size: u64) {
        self.number_alive += 1;
        self.size_alive += size;
    }

    fn retire(&mut self, size: u64) {
        self.number_alive = self.number_alive.saturating_sub(1);
        self.size_alive = self.size_alive.saturating_sub(size);
        self.number_dead += 1;
        self.size_dead += size;
    }
}

/// Statistics for every segment of one collection.
#[derive(Debug, Default)]
pub struct SegmentStatistics {
    entries: Mutex<BTreeMap<SegmentId, SegmentStats>>,
}

impl SegmentStatistics {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes sure `id` has an entry.
    pub fn create(&self, id: SegmentId) {
        self.entries.lock().entry(id).or_default();
    }

    /// Drops the entry for `id`.
    pub fn remove(&self, id: SegmentId) {
        self.entries.lock().remove(&id);
    }

    /// Replaces the entry for `id`.
    pub fn replace(&self, id: SegmentId, stats: SegmentStats) {
        self.entries.lock().insert(id, stats);
    }

    /// Returns the counters for `id` (zeroes if unknown).
    #[must_use]
    pub fn get(&self, id: SegmentId) -> SegmentStats {
        self.entries.lock().get(&id).copied().unwrap_or_default()
    }

    /// Returns every entry, ordered by segment id.
    #[must_use]
    pub fn all(&self) -> Vec<(SegmentId, SegmentStats)> {
        self.entries.lock().iter().map(|(id, s)| (*id, *s)).collect()
    }

    /// Returns the sum over all segments.
    #[must_use]
    pub fn total(&self) -> SegmentStats {
        let mut total = SegmentStats::default();
        for stats in self.entries.lock().values() {
            total.accumulate(stats);
        }
        total
    }

    /// Counts a newly written current document marker.
    pub fn add_alive(&self, id: SegmentId, size: u64) {
        self.entries.lock().entry(id).or_default().add_alive(size);
    }

    /// Moves a marker from alive to dead.
    pub fn retire(&self, id: SegmentId, size: u64) {
        self.entries.lock().entry(id).or_default().retire(size);
    }

    /// Counts a remove marker.
    pub fn add_deletion(&self, id: SegmentId) {
        self.entries.lock().entry(id).or_default().number_deletions += 1;
    }

    /// Counts a marker not yet synced to disk.
    pub fn add_uncollected(&self, id: SegmentId) {
        self.entries.lock().entry(id).or_default().number_uncollected += 1;
    }

    /// Clears the unsynced-marker counter after a sync or seal.
    pub fn reset_uncollected(&self, id: SegmentId) {
        if let Some(stats) = self.entries.lock().get_mut(&id) {
            stats.number_uncollected = 0;
        }
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alive_dead_bookkeeping() {
        let stats = SegmentStatistics::new();
        let a = SegmentId::new(1);
        let b = SegmentId::new(2);

        stats.add_alive(a, 40);
        stats.add_alive(a, 48);
        stats.retire(a, 40);
        stats.add_alive(b, 40);
        stats.add_deletion(b);

        assert_eq!(
            stats.get(a),
            SegmentStats {
                number_alive: 1,
                size_alive: 48,
                number_dead: 1,
                size_dead: 40,
                ..SegmentStats::default()
            }
        );
        let total = stats.total();
        assert_eq!(total.number_alive, 2);
        assert_eq!(total.number_deletions, 1);
    }

    #[test]
    fn retire_never_underflows() {
        let stats = SegmentStatistics::new();
        let id = SegmentId::new(3);
        stats.retire(id, 64);
        assert_eq!(stats.get(id).number_alive, 0);
        assert_eq!(stats.get(id).size_dead, 64);
    }

    #[test]
    fn uncollected_resets() {
        let stats = SegmentStatistics::new();
        let id = SegmentId::new(4);
        stats.create(id);
        stats.add_uncollected(id);
        stats.add_uncollected(id);
        assert_eq!(stats.get(id).number_uncollected, 2);

        stats.reset_uncollected(id);
        assert_eq!(stats.get(id).number_uncollected, 0);
        assert!(stats.get(id).is_empty());
    }

    #[test]
    fn unknown_segment_reads_as_zero() {
        let stats = SegmentStatistics::new();
        assert_eq!(stats.get(SegmentId::new(99)), SegmentStats::default());
    }
}
