//! Segment file names.
//!
//! ```text
//! temp-<id>.db        journal being initialised
//! journal-<id>.db     active journal
//! datafile-<id>.db    sealed segment
//! compaction-<id>.db  compaction output, <id> = first input segment
//! *.dead              awaiting physical removal
//! ```

use crate::types::SegmentId;

const EXTENSION: &str = ".db";
const DEAD_SUFFIX: &str = ".dead";

/// A classified segment file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFile {
    /// A journal that never finished initialising.
    Temp(SegmentId),
    /// An active (or crashed) journal.
    Journal(SegmentId),
    /// A sealed segment.
    Datafile(SegmentId),
    /// Output of an unfinished or unpublished compaction.
    Compaction(SegmentId),
    /// A file scheduled for removal.
    Dead,
}

impl SegmentFile {
    /// Classifies `name`, or returns `None` for files the engine does not own.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        if name.ends_with(DEAD_SUFFIX) {
            return Some(Self::Dead);
        }
        let stem = name.strip_suffix(EXTENSION)?;
        let (prefix, id) = stem.split_once('-')?;
        let id = SegmentId::new(id.parse().ok()?);
        match prefix {
            "temp" => Some(Self::Temp(id)),
            "journal" => Some(Self::Journal(id)),
            "datafile" => Some(Self::Datafile(id)),
            "compaction" => Some(Self::Compaction(id)),
            _ => None,
        }
    }
}

/// Name of a journal that is being initialised.
#[must_use]
pub fn temp_name(id: SegmentId) -> String {
    format!("temp-{}{EXTENSION}", id.as_u64())
}

/// Name of an active journal.
#[must_use]
pub fn journal_name(id: SegmentId) -> String {
    format!("journal-{}{EXTENSION}", id.as_u64())
}

/// Name of a sealed segment.
#[must_use]
pub fn datafile_name(id: SegmentId) -> String {
    format!("datafile-{}{EXTENSION}", id.as_u64())
}

/// Name of a compaction output that will take over segment `id`.
#[must_use]
pub fn compaction_name(id: SegmentId) -> String {
    format!("compaction-{}{EXTENSION}", id.as_u64())
}

/// Name a file takes while it waits for removal.
#[must_use]
pub fn dead_name(name: &str) -> String {
    format!("{name}{DEAD_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_back() {
        let id = SegmentId::new(1234);
        assert_eq!(SegmentFile::parse(&temp_name(id)), Some(SegmentFile::Temp(id)));
        assert_eq!(SegmentFile::parse(&journal_name(id)), Some(SegmentFile::Journal(id)));
        assert_eq!(SegmentFile::parse(&datafile_name(id)), Some(SegmentFile::Datafile(id)));
        assert_eq!(
            SegmentFile::parse(&compaction_name(id)),
            Some(SegmentFile::Compaction(id))
        );
        assert_eq!(
            SegmentFile::parse(&dead_name(&datafile_name(id))),
            Some(SegmentFile::Dead)
        );
    }

    #[test]
    fn foreign_files_are_ignored() {
        assert_eq!(SegmentFile::parse("parameters.json"), None);
        assert_eq!(SegmentFile::parse("datafile-abc.db"), None);
        assert_eq!(SegmentFile::parse("index-12.db"), None);
        assert_eq!(SegmentFile::parse("datafile-12.tmp"), None);
    }
}
