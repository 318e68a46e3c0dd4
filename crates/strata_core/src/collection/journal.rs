//! Journal reservation, rotation and sealing.

use super::Collection;
use crate::config::MIN_JOURNAL_SIZE;
use crate::error::{CoreError, CoreResult};
use crate::segment::{
    aligned_size, datafile_name, Segment, SegmentKind, SegmentSet, FOOTER_SIZE, SEGMENT_OVERHEAD,
};
use crate::types::SegmentId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Slack kept free in every new journal beyond the marker that caused it.
const JOURNAL_SLACK: u64 = 256;

/// Size of a new journal that must hold a marker of `marker_size` bytes.
///
/// Starts at the configured journal size, never below [`MIN_JOURNAL_SIZE`],
/// and doubles until the marker, both header markers and the footer fit
/// with some slack.
pub(crate) fn journal_target_size(journal_size: u32, marker_size: u64) -> CoreResult<u32> {
    let needed = aligned_size(marker_size) + SEGMENT_OVERHEAD + FOOTER_SIZE;
    let mut target = u64::from(journal_size.max(MIN_JOURNAL_SIZE));
    while target.saturating_sub(JOURNAL_SLACK) < needed {
        target *= 2;
    }
    u32::try_from(target).map_err(|_| {
        CoreError::invalid_argument(format!("marker of {marker_size} bytes is too large for a segment"))
    })
}

impl Collection {
    /// Appends one marker to the journal, creating or rotating it as needed.
    pub(crate) fn append_marker(&self, marker: &[u8]) -> CoreResult<(SegmentId, u64)> {
        let journal = self.reserve(marker.len() as u64)?;
        let offset = journal.write_marker(marker)?;
        self.statistics.add_uncollected(journal.id());
        self.context.stats.record_bytes_written(marker.len() as u64);
        Ok((journal.id(), offset))
    }

    /// Returns a journal with room for `size` more bytes.
    fn reserve(&self, size: u64) -> CoreResult<Arc<Segment>> {
        if let Some(journal) = self.segments.read().journal() {
            if journal.has_room(size) {
                return Ok(Arc::clone(journal));
            }
        }

        let mut segments = self.segments.write();
        if let Some(journal) = segments.journal() {
            if journal.has_room(size) {
                return Ok(Arc::clone(journal));
            }
            self.seal_journal(&mut segments)?;
        }

        let journal_size = self.properties.read().journal_size;
        let max_size = journal_target_size(journal_size, size)?;
        let id = SegmentId::new(self.context.ticks.next());
        let journal = Arc::new(Segment::create(
            Arc::clone(&self.store),
            SegmentKind::Journal,
            id,
            max_size,
            self.id,
        )?);
        self.statistics.create(id);
        segments.set_journal(Some(Arc::clone(&journal)));
        debug!(collection = %self.name, segment = %id, max_size, "created journal");
        Ok(journal)
    }

    /// Seals the journal and moves it to the datafiles.
    ///
    /// Returns false if there was no journal.
    pub(crate) fn seal_journal(&self, segments: &mut SegmentSet) -> CoreResult<bool> {
        let Some(journal) = segments.set_journal(None) else {
            return Ok(false);
        };
        if let Err(err) = journal.seal() {
            segments.set_journal(Some(journal));
            return Err(err);
        }
        // A sealed journal is recognised by its footer on restart, so a
        // failed rename only leaves the old name behind.
        if let Err(err) = journal.rename(datafile_name(journal.id())) {
            warn!(collection = %self.name, segment = %journal.id(), error = %err, "failed to rename sealed journal");
        }
        journal.set_kind(SegmentKind::Datafile);
        self.revisions.mark_sealed(journal.id());
        self.statistics.reset_uncollected(journal.id());
        debug!(collection = %self.name, segment = %journal.id(), size = journal.size(), "sealed journal");
        segments.add_datafile(journal);
        Ok(true)
    }

    /// Seals the current journal; the next write starts a new one.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if there is no journal, or the seal error.
    pub fn rotate_journal(&self) -> CoreResult<()> {
        let _guard = self.lock_write(Duration::ZERO)?;
        self.rotate_journal_locked()
    }

    pub(crate) fn rotate_journal_locked(&self) -> CoreResult<()> {
        self.ensure_usable()?;
        let mut segments = self.segments.write();
        if !self.seal_journal(&mut segments)? {
            return Err(CoreError::invalid_argument(format!(
                "collection '{}' has no journal to rotate",
                self.name
            )));
        }
        Ok(())
    }
}
