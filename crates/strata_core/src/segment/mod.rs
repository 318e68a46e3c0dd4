//! Segment files: markers, scanning, naming and per-segment statistics.
//!
//! A collection's data lives in a series of append-only segments. The
//! newest one is the journal and receives all writes; once full it is
//! sealed with a footer marker and becomes a read-only datafile. The
//! compactor merges datafiles into a fresh segment that takes the place of
//! the first one it consumed.

mod datafile;
mod iterator;
mod marker;
mod naming;
mod set;
mod statistics;

pub use datafile::{Segment, SegmentKind, TickRange};
pub use iterator::{MarkerIterator, MarkerRef, ScanEnd};
pub use marker::{
    aligned_size, decode_collection_header, encode_collection_header, encode_footer,
    encode_marker, verify_marker, DatafileHeader, MarkerHeader, MarkerType,
    COLLECTION_HEADER_SIZE, DATAFILE_HEADER_SIZE, FOOTER_SIZE, FORMAT_VERSION,
    MARKER_ALIGNMENT, MARKER_HEADER_SIZE, SEGMENT_OVERHEAD,
};
pub use naming::{compaction_name, datafile_name, dead_name, journal_name, temp_name, SegmentFile};
pub use set::SegmentSet;
pub use statistics::{SegmentStatistics, SegmentStats};
