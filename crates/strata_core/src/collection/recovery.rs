//! Rebuilding a collection from its segment files.
//!
//! Opening runs in two steps. The inventory settles what an interrupted
//! journal initialisation or compaction swap left behind. Replay then
//! reads every segment in id order, datafiles before journals, and feeds
//! each marker into the primary index, revision cache and statistics as
//! if it were being written again.

use super::{Collection, CollectionContext, CollectionProperties};
use crate::document::{track_key, DocumentPosition};
use crate::error::{CoreError, CoreResult};
use crate::index::IndexDefinition;
use crate::segment::{
    compaction_name, datafile_name, decode_collection_header, journal_name, MarkerIterator, MarkerType,
    ScanEnd, Segment, SegmentFile, SegmentKind, SegmentSet,
};
use crate::types::{CollectionId, RevisionId, SegmentId};
use std::sync::Arc;
use strata_codec::{decode_identity, DocumentIdentity};
use strata_storage::SegmentStore;
use tracing::{debug, info, warn};

/// A segment file that survived the inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SegmentEntry {
    pub(crate) id: SegmentId,
    pub(crate) name: String,
    pub(crate) kind: SegmentKind,
}

/// Cleans up leftovers and lists the segments to replay, in replay order.
///
/// Temporary journals and `.dead` files are deleted. A compaction output
/// whose datafile still exists never got published and is deleted; one
/// whose datafile is gone was half swapped and takes the datafile's name.
pub(crate) fn inventory(store: &dyn SegmentStore) -> CoreResult<Vec<SegmentEntry>> {
    let mut datafiles = Vec::new();
    let mut journals = Vec::new();
    let mut compactions = Vec::new();

    for name in store.list()? {
        match SegmentFile::parse(&name) {
            Some(SegmentFile::Temp(_) | SegmentFile::Dead) => {
                debug!(file = %name, "removing leftover file");
                store.remove(&name)?;
            }
            Some(SegmentFile::Journal(id)) => journals.push(id),
            Some(SegmentFile::Datafile(id)) => datafiles.push(id),
            Some(SegmentFile::Compaction(id)) => compactions.push(id),
            None => {}
        }
    }

    for id in compactions {
        let name = compaction_name(id);
        if datafiles.contains(&id) {
            debug!(file = %name, "removing unpublished compaction output");
            store.remove(&name)?;
        } else {
            info!(file = %name, "finishing interrupted compaction swap");
            store.rename(&name, &datafile_name(id))?;
            datafiles.push(id);
        }
    }

    datafiles.sort_unstable();
    journals.sort_unstable();
    let entries = datafiles
        .into_iter()
        .map(|id| SegmentEntry {
            id,
            name: datafile_name(id),
            kind: SegmentKind::Datafile,
        })
        .chain(journals.into_iter().map(|id| SegmentEntry {
            id,
            name: journal_name(id),
            kind: SegmentKind::Journal,
        }))
        .collect();
    Ok(entries)
}

/// A marker as replay needs it.
#[derive(Debug)]
enum Replayed {
    Header,
    Document {
        offset: u64,
        size: u32,
        identity: DocumentIdentity,
    },
    Remove {
        identity: DocumentIdentity,
    },
    Other,
}

/// A segment that was scanned end to end without finding damage.
#[derive(Debug)]
struct ScannedSegment {
    segment: Arc<Segment>,
    markers: Vec<(MarkerType, u64, Replayed)>,
    end: ScanEnd,
    valid_end: u64,
}

/// Reads and checks every marker of `segment` before anything is applied,
/// so a damaged segment can be skipped as a whole.
fn scan(segment: Segment, collection: CollectionId) -> CoreResult<ScannedSegment> {
    let data = segment.read_all()?;
    let mut iter = MarkerIterator::new(&data);
    let mut markers = Vec::new();

    for marker in iter.by_ref() {
        let marker = marker?;
        let replayed = match marker.marker_type() {
            MarkerType::Header => Replayed::Header,
            MarkerType::CollectionHeader => {
                let owner = decode_collection_header(marker.payload())?;
                if owner != collection {
                    return Err(CoreError::corrupt(format!(
                        "segment {} belongs to collection {owner}",
                        segment.name()
                    )));
                }
                Replayed::Other
            }
            MarkerType::Document => Replayed::Document {
                offset: marker.offset,
                size: marker.header.size,
                identity: decode_identity(marker.payload())?,
            },
            MarkerType::Remove => Replayed::Remove {
                identity: decode_identity(marker.payload())?,
            },
            MarkerType::Footer | MarkerType::Blank => Replayed::Other,
        };
        markers.push((marker.marker_type(), marker.header.tick, replayed));
    }

    Ok(ScannedSegment {
        end: iter.end().unwrap_or(ScanEnd::EndOfData),
        valid_end: iter.valid_end(),
        markers,
        segment: Arc::new(segment),
    })
}

impl Collection {
    /// Opens a collection from whatever `store` holds.
    ///
    /// An empty store yields an empty collection. Segments with damaged
    /// markers fail the open with `CorruptData`, or are skipped with a
    /// warning when `ignore_errors` is set.
    pub(crate) fn open(
        id: CollectionId,
        name: String,
        properties: CollectionProperties,
        store: Arc<dyn SegmentStore>,
        context: CollectionContext,
        definitions: Vec<IndexDefinition>,
        ignore_errors: bool,
    ) -> CoreResult<Arc<Self>> {
        let entries = inventory(store.as_ref())?;
        let collection = Arc::new(Self::new(id, name, properties, store, context));
        collection.replay(entries, ignore_errors)?;
        collection.restore_indexes(definitions, &collection.context.evaluators)?;

        let segments = collection.segments.read().len();
        info!(
            collection = %collection.name,
            documents = collection.count(),
            segments,
            "opened collection"
        );
        Ok(collection)
    }

    fn replay(&self, entries: Vec<SegmentEntry>, ignore_errors: bool) -> CoreResult<()> {
        let mut scanned = Vec::with_capacity(entries.len());
        for entry in entries {
            self.context.ticks.track(entry.id.as_u64());
            let result = Segment::open(Arc::clone(&self.store), &entry.name, entry.id, entry.kind)
                .and_then(|segment| scan(segment, self.id));
            match result {
                Ok(segment) => scanned.push(segment),
                Err(err) if ignore_errors && err.is_corruption() => {
                    warn!(collection = %self.name, file = %entry.name, error = %err, "skipping damaged segment");
                }
                Err(err) => return Err(err),
            }
        }

        // Only the newest journal without a footer stays writable.
        let journal = scanned
            .iter()
            .rev()
            .find(|s| s.segment.kind() == SegmentKind::Journal && s.end != ScanEnd::Footer)
            .map(|s| s.segment.id());

        let mut segments = self.segments.write();
        for scanned in scanned {
            let in_journal = Some(scanned.segment.id()) == journal;
            let segment_id = scanned.segment.id();
            for (marker_type, tick, replayed) in scanned.markers {
                scanned.segment.observe(marker_type, tick);
                self.replay_marker(segment_id, tick, replayed, in_journal)?;
            }
            self.finish_segment(&mut segments, scanned.segment, scanned.end, scanned.valid_end, in_journal)?;
        }
        Ok(())
    }

    fn replay_marker(
        &self,
        segment: SegmentId,
        tick: u64,
        replayed: Replayed,
        in_journal: bool,
    ) -> CoreResult<()> {
        let ticks = &self.context.ticks;
        ticks.track(tick);
        match replayed {
            Replayed::Header => self.statistics.create(segment),
            Replayed::Document {
                offset,
                size,
                identity,
            } => {
                let revision = RevisionId::new(identity.revision);
                ticks.track(identity.revision);
                track_key(ticks, &identity.key);

                match self.primary.lookup(&identity.key) {
                    Some(current) => {
                        self.retire_revision(current);
                        self.primary.update_revision(&identity.key, revision)?;
                    }
                    None => self.primary.insert(&identity.key, revision)?,
                }
                // A rolled back write stores its previous version again.
                self.retire_revision(revision);

                let position = DocumentPosition {
                    revision,
                    segment,
                    offset,
                    size,
                    in_journal,
                };
                self.revisions.insert(position)?;
                self.statistics.add_alive(segment, position.aligned_size());
            }
            Replayed::Remove { identity } => {
                ticks.track(identity.revision);
                track_key(ticks, &identity.key);
                if let Some(current) = self.primary.remove(&identity.key) {
                    self.retire_revision(current);
                }
                self.statistics.add_deletion(segment);
            }
            Replayed::Other => {}
        }
        Ok(())
    }

    fn retire_revision(&self, revision: RevisionId) {
        if let Some(old) = self.revisions.remove(revision) {
            self.statistics.retire(old.segment, old.aligned_size());
        }
    }

    /// Settles a replayed segment: cuts a torn tail, seals whatever is not
    /// the journal and files it in the segment set.
    fn finish_segment(
        &self,
        segments: &mut SegmentSet,
        segment: Arc<Segment>,
        end: ScanEnd,
        valid_end: u64,
        in_journal: bool,
    ) -> CoreResult<()> {
        if end == ScanEnd::Footer {
            segment.mark_sealed();
        } else {
            let size = segment.size();
            if valid_end < size {
                warn!(
                    collection = %self.name,
                    segment = %segment.id(),
                    valid_end,
                    size,
                    "truncating torn segment tail"
                );
                segment.truncate(valid_end)?;
            }
            if in_journal {
                segments.set_journal(Some(segment));
                return Ok(());
            }
            segment.seal()?;
        }

        if segment.kind() == SegmentKind::Journal {
            segment.rename(datafile_name(segment.id()))?;
            segment.set_kind(SegmentKind::Datafile);
        }
        self.revisions.mark_sealed(segment.id());
        segments.add_datafile(segment);
        Ok(())
    }
}
