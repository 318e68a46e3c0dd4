//! Per-collection settings.

use crate::config::{DEFAULT_JOURNAL_SIZE, MIN_JOURNAL_SIZE};
use serde::{Deserialize, Serialize};

/// Settings stored with each collection in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionProperties {
    /// Initial size of new journals.
    pub journal_size: u32,
    /// Sync the journal after every write.
    pub wait_for_sync: bool,
    /// Let the compactor process this collection.
    pub do_compact: bool,
    /// Keep segments in memory only; the collection is empty after reopen.
    pub is_volatile: bool,
}

impl Default for CollectionProperties {
    fn default() -> Self {
        Self {
            journal_size: DEFAULT_JOURNAL_SIZE,
            wait_for_sync: false,
            do_compact: true,
            is_volatile: false,
        }
    }
}

impl CollectionProperties {
    /// Default properties.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the journal size; values below the minimum are raised to it.
    #[must_use]
    pub fn journal_size(mut self, size: u32) -> Self {
        self.journal_size = size.max(MIN_JOURNAL_SIZE);
        self
    }

    /// Raises fields set directly below their minimum.
    #[must_use]
    pub(crate) fn normalized(self) -> Self {
        let size = self.journal_size;
        self.journal_size(size)
    }

    /// Syncs after every write.
    #[must_use]
    pub const fn wait_for_sync(mut self, value: bool) -> Self {
        self.wait_for_sync = value;
        self
    }

    /// Enables or disables compaction.
    #[must_use]
    pub const fn do_compact(mut self, value: bool) -> Self {
        self.do_compact = value;
        self
    }

    /// Keeps the collection in memory only.
    #[must_use]
    pub const fn is_volatile(mut self, value: bool) -> Self {
        self.is_volatile = value;
        self
    }
}
