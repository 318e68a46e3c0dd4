//! Core type definitions for Strata.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Creates an id from its raw value.
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the raw id value.
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of one document version.
    ///
    /// Revision ids are drawn from the database tick generator, so they are
    /// strictly increasing and never reused.
    RevisionId,
    "rev"
);

id_type!(
    /// Identifier of a segment file.
    ///
    /// Segment ids are ticks too, so sorting by id sorts by creation order.
    SegmentId,
    "seg"
);

id_type!(
    /// Identifier of a collection, stable for the life of the collection.
    CollectionId,
    "col"
);

id_type!(
    /// Identifier of a transaction.
    TransactionId,
    "txn"
);

id_type!(
    /// Identifier of a secondary index within its collection.
    IndexId,
    "idx"
);

/// Largest tick that fits in a marker header.
pub const MAX_TICK: u64 = (1 << 56) - 1;

/// Source of monotonically increasing ticks.
///
/// One generator per database hands out revision ids, segment ids, marker
/// ticks and generated document keys. Recovery feeds every tick it sees
/// back through [`TickGenerator::track`] so new values never collide with
/// persisted ones.
#[derive(Debug, Default)]
pub struct TickGenerator {
    current: AtomicU64,
}

impl TickGenerator {
    /// Creates a generator whose next tick is `start + 1`.
    #[must_use]
    pub fn new(start: u64) -> Self {
        Self {
            current: AtomicU64::new(start),
        }
    }

    /// Returns a fresh tick.
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns a fresh revision id.
    pub fn next_revision(&self) -> RevisionId {
        RevisionId(self.next())
    }

    /// Returns the last tick handed out (or tracked).
    #[must_use]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Makes sure future ticks are greater than `observed`.
    pub fn track(&self, observed: u64) {
        self.current.fetch_max(observed, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_display() {
        assert_eq!(CollectionId::new(42).to_string(), "col:42");
        assert_eq!(RevisionId::new(7).to_string(), "rev:7");
        assert_eq!(SegmentId::new(3).to_string(), "seg:3");
        assert_eq!(TransactionId::new(1).to_string(), "txn:1");
    }

    #[test]
    fn revision_ordering() {
        assert!(RevisionId::new(1) < RevisionId::new(2));
    }

    #[test]
    fn ticks_increase() {
        let ticks = TickGenerator::new(10);
        assert_eq!(ticks.next(), 11);
        assert_eq!(ticks.next_revision(), RevisionId::new(12));
        assert_eq!(ticks.current(), 12);
    }

    #[test]
    fn track_only_moves_forward() {
        let ticks = TickGenerator::new(0);
        ticks.track(100);
        ticks.track(50);
        assert_eq!(ticks.next(), 101);
    }

    #[test]
    fn concurrent_ticks_are_unique() {
        use std::collections::HashSet;
        use std::sync::Arc;
        use std::thread;

        let ticks = Arc::new(TickGenerator::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let t = Arc::clone(&ticks);
                thread::spawn(move || (0..250).map(|_| t.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for tick in h.join().unwrap() {
                assert!(seen.insert(tick));
            }
        }
        assert_eq!(seen.len(), 1000);
    }
}
