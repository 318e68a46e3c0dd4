//! The revision position cache.
//!
//! Maps every cached revision to the marker holding its body. It is the
//! only place that knows where a document lives; the primary index maps
//! keys to revisions and goes through here for the body.

use crate::error::{CoreError, CoreResult};
use crate::segment::aligned_size;
use crate::types::{RevisionId, SegmentId};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

/// Location of one document marker.
///
/// Positions name a segment by id and never hold a reference into its
/// bytes. Readers resolve the id through the collection's segment set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DocumentPosition {
    /// Revision stored at this position.
    pub revision: RevisionId,
    /// Segment holding the marker.
    pub segment: SegmentId,
    /// Byte offset of the marker within the segment.
    pub offset: u64,
    /// Unpadded marker size.
    pub size: u32,
    /// True while the segment is still the collection's journal.
    pub in_journal: bool,
}

impl DocumentPosition {
    /// Size the marker occupies on disk.
    #[must_use]
    pub const fn aligned_size(&self) -> u64 {
        aligned_size(self.size as u64)
    }

    /// True if this position points at `segment` / `offset`.
    #[must_use]
    pub fn is_at(&self, segment: SegmentId, offset: u64) -> bool {
        self.segment == segment && self.offset == offset
    }
}

/// Revision id to position map.
#[derive(Debug, Default)]
pub struct RevisionCache {
    positions: RwLock<HashMap<RevisionId, DocumentPosition>>,
}

impl RevisionCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a mapping for a new revision.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the revision is already cached; revision ids
    /// are never reused.
    pub fn insert(&self, position: DocumentPosition) -> CoreResult<()> {
        let mut positions = self.positions.write();
        if positions.contains_key(&position.revision) {
            return Err(CoreError::internal(format!(
                "revision {} is already cached",
                position.revision
            )));
        }
        positions.insert(position.revision, position);
        Ok(())
    }

    /// Returns the position of `revision`.
    #[must_use]
    pub fn lookup(&self, revision: RevisionId) -> Option<DocumentPosition> {
        self.positions.read().get(&revision).copied()
    }

    /// Moves a cached revision to a new location.
    ///
    /// Returns false if the revision is not cached.
    pub fn update(
        &self,
        revision: RevisionId,
        segment: SegmentId,
        offset: u64,
        in_journal: bool,
    ) -> bool {
        match self.positions.write().get_mut(&revision) {
            Some(position) => {
                position.segment = segment;
                position.offset = offset;
                position.in_journal = in_journal;
                true
            }
            None => false,
        }
    }

    /// Removes a revision and returns where it was.
    pub fn remove(&self, revision: RevisionId) -> Option<DocumentPosition> {
        self.positions.write().remove(&revision)
    }

    /// Clears the journal flag of every position in `segment`.
    pub fn mark_sealed(&self, segment: SegmentId) {
        for position in self.positions.write().values_mut() {
            if position.segment == segment {
                position.in_journal = false;
            }
        }
    }

    /// Number of cached revisions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.read().len()
    }

    /// True if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every mapping.
    pub fn clear(&self) {
        self.positions.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(revision: u64, segment: u64, offset: u64) -> DocumentPosition {
        DocumentPosition {
            revision: RevisionId::new(revision),
            segment: SegmentId::new(segment),
            offset,
            size: 30,
            in_journal: true,
        }
    }

    #[test]
    fn insert_rejects_reused_revision() {
        let cache = RevisionCache::new();
        cache.insert(position(1, 10, 56)).unwrap();
        assert!(matches!(
            cache.insert(position(1, 10, 96)),
            Err(CoreError::Internal { .. })
        ));
        assert_eq!(cache.lookup(RevisionId::new(1)).unwrap().offset, 56);
    }

    #[test]
    fn update_and_remove() {
        let cache = RevisionCache::new();
        cache.insert(position(1, 10, 56)).unwrap();

        assert!(cache.update(RevisionId::new(1), SegmentId::new(20), 88, false));
        assert!(!cache.update(RevisionId::new(2), SegmentId::new(20), 88, false));
        let moved = cache.lookup(RevisionId::new(1)).unwrap();
        assert!(moved.is_at(SegmentId::new(20), 88));
        assert!(!moved.in_journal);

        assert_eq!(cache.remove(RevisionId::new(1)).unwrap().segment, SegmentId::new(20));
        assert!(cache.remove(RevisionId::new(1)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn sealing_clears_journal_flag_for_one_segment() {
        let cache = RevisionCache::new();
        cache.insert(position(1, 10, 56)).unwrap();
        cache.insert(position(2, 11, 56)).unwrap();

        cache.mark_sealed(SegmentId::new(10));
        assert!(!cache.lookup(RevisionId::new(1)).unwrap().in_journal);
        assert!(cache.lookup(RevisionId::new(2)).unwrap().in_journal);
        assert_eq!(cache.lookup(RevisionId::new(1)).unwrap().aligned_size(), 32);
    }
}
