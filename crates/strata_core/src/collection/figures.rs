//! Collection figures for monitoring and the CLI.

use super::Collection;
use crate::segment::{SegmentKind, SegmentStats};
use crate::types::SegmentId;
use serde::Serialize;

/// Outcome of the last compaction attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompactionStatus {
    /// Human-readable result, such as "nothing to compact".
    pub message: String,
    /// Seconds since the Unix epoch.
    pub time: Option<u64>,
}

/// File counts and sizes for one kind of segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FileFigures {
    /// Number of files.
    pub count: u64,
    /// Bytes written to them.
    pub file_size: u64,
}

/// One segment as seen by [`CollectionFigures`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentFigures {
    /// Segment id.
    pub id: SegmentId,
    /// Current file name.
    pub name: String,
    /// Role.
    pub kind: SegmentKind,
    /// Bytes written.
    pub size: u64,
    /// Size limit.
    pub max_size: u32,
    /// Footer written.
    pub sealed: bool,
    /// Statistics counters.
    pub stats: SegmentStats,
}

/// A summary of a collection's storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionFigures {
    /// Live documents.
    pub documents: u64,
    /// Totals over every segment.
    pub totals: SegmentStats,
    /// Sealed datafiles.
    pub datafiles: FileFigures,
    /// The journal (0 or 1).
    pub journals: FileFigures,
    /// A running compaction output (0 or 1).
    pub compactors: FileFigures,
    /// Cached revisions.
    pub revisions: u64,
    /// Per-segment detail, datafiles first.
    pub segments: Vec<SegmentFigures>,
    /// Last compaction attempt.
    pub compaction: CompactionStatus,
}

impl Collection {
    /// Collects figures about documents, segments and compaction.
    #[must_use]
    pub fn figures(&self) -> CollectionFigures {
        let segments = self.segments.read();
        let mut figures = CollectionFigures {
            documents: self.primary.len() as u64,
            totals: self.statistics.total(),
            datafiles: FileFigures::default(),
            journals: FileFigures::default(),
            compactors: FileFigures::default(),
            revisions: self.revisions.len() as u64,
            segments: Vec::new(),
            compaction: self.compaction.lock().status.clone(),
        };

        let all = segments.all().into_iter().chain(segments.compactor().cloned());
        for segment in all {
            let size = segment.size();
            let kind = segment.kind();
            let bucket = match kind {
                SegmentKind::Datafile => &mut figures.datafiles,
                SegmentKind::Journal => &mut figures.journals,
                SegmentKind::Compactor => &mut figures.compactors,
            };
            bucket.count += 1;
            bucket.file_size += size;
            figures.segments.push(SegmentFigures {
                id: segment.id(),
                name: segment.name(),
                kind,
                size,
                max_size: segment.max_size(),
                sealed: segment.is_sealed(),
                stats: self.statistics.get(segment.id()),
            });
        }
        figures
    }
}
