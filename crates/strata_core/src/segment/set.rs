//! The list of segments owned by one collection.

use super::datafile::Segment;
use crate::types::SegmentId;
use std::sync::Arc;

/// Sealed datafiles, the current journal and the running compaction output.
///
/// Datafiles are kept in ascending id order, which is also replay order.
/// The compaction output is not addressable by [`SegmentSet::get`] until
/// it has been swapped in.
#[derive(Debug, Default)]
pub struct SegmentSet {
    datafiles: Vec<Arc<Segment>>,
    journal: Option<Arc<Segment>>,
    compactor: Option<Arc<Segment>>,
}

impl SegmentSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sealed datafiles in id order.
    #[must_use]
    pub fn datafiles(&self) -> &[Arc<Segment>] {
        &self.datafiles
    }

    /// The current journal.
    #[must_use]
    pub fn journal(&self) -> Option<&Arc<Segment>> {
        self.journal.as_ref()
    }

    /// The running compaction output.
    #[must_use]
    pub fn compactor(&self) -> Option<&Arc<Segment>> {
        self.compactor.as_ref()
    }

    /// Resolves a segment id to a datafile or the journal.
    #[must_use]
    pub fn get(&self, id: SegmentId) -> Option<Arc<Segment>> {
        if let Some(journal) = &self.journal {
            if journal.id() == id {
                return Some(Arc::clone(journal));
            }
        }
        self.datafiles
            .binary_search_by_key(&id, |s| s.id())
            .ok()
            .map(|idx| Arc::clone(&self.datafiles[idx]))
    }

    /// Datafiles followed by the journal.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Segment>> {
        let mut all = self.datafiles.clone();
        all.extend(self.journal.iter().cloned());
        all
    }

    /// Number of addressable segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.datafiles.len() + usize::from(self.journal.is_some())
    }

    /// True if the collection has no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds a sealed datafile, keeping id order.
    pub fn add_datafile(&mut self, segment: Arc<Segment>) {
        let idx = self
            .datafiles
            .partition_point(|existing| existing.id() < segment.id());
        self.datafiles.insert(idx, segment);
    }

    /// Installs a new journal and returns the previous one.
    pub fn set_journal(&mut self, journal: Option<Arc<Segment>>) -> Option<Arc<Segment>> {
        std::mem::replace(&mut self.journal, journal)
    }

    /// Installs or clears the compaction output.
    pub fn set_compactor(&mut self, compactor: Option<Arc<Segment>>) -> Option<Arc<Segment>> {
        std::mem::replace(&mut self.compactor, compactor)
    }

    /// Replaces the datafile with the same id as `segment`.
    ///
    /// Returns the replaced segment, or `None` if there was none.
    pub fn replace_datafile(&mut self, segment: Arc<Segment>) -> Option<Arc<Segment>> {
        match self.datafiles.binary_search_by_key(&segment.id(), |s| s.id()) {
            Ok(idx) => Some(std::mem::replace(&mut self.datafiles[idx], segment)),
            Err(_) => None,
        }
    }

    /// Removes a datafile from the set.
    pub fn remove_datafile(&mut self, id: SegmentId) -> Option<Arc<Segment>> {
        self.datafiles
            .binary_search_by_key(&id, |s| s.id())
            .ok()
            .map(|idx| self.datafiles.remove(idx))
    }

    /// Removes every segment and returns them.
    pub fn drain(&mut self) -> Vec<Arc<Segment>> {
        let mut all: Vec<_> = self.datafiles.drain(..).collect();
        all.extend(self.journal.take());
        all.extend(self.compactor.take());
        all
    }
}
