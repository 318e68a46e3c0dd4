//! Copying the live markers of a batch into one segment and swapping it in.
//!
//! The caller holds the collection's read lock for the whole merge, so
//! the primary index and revision cache cannot change underneath it.
//! Cache entries are repointed only at the swap, under the segment list
//! write lock, so readers resolve either the old segments or the new one.

use super::select::Candidate;
use crate::collection::Collection;
use crate::error::{CoreError, CoreResult};
use crate::segment::{
    aligned_size, datafile_name, dead_name, MarkerIterator, MarkerType, Segment, SegmentKind,
    SegmentSet, SegmentStats, FOOTER_SIZE, SEGMENT_OVERHEAD,
};
use crate::types::{RevisionId, SegmentId};
use std::sync::Arc;
use strata_codec::decode_identity;
use tracing::{debug, warn};

/// A marker that survives compaction.
#[derive(Debug, Clone, Copy)]
struct Retained {
    offset: u64,
    size: u32,
    /// Set for documents, unset for remove markers.
    revision: Option<RevisionId>,
}

/// An input segment's image and the markers to copy out of it.
struct Scanned {
    data: Vec<u8>,
    retained: Vec<Retained>,
}

/// What a merge did.
#[derive(Debug, Default)]
pub(crate) struct MergeOutcome {
    pub(crate) output: Option<SegmentId>,
    pub(crate) documents: u64,
    pub(crate) deletions: u64,
    pub(crate) bytes_before: u64,
    pub(crate) bytes_after: u64,
}

/// Finds the markers of `candidate` that must be kept.
///
/// A document is kept if its key still maps to its revision and the cache
/// still places that revision at this very marker.
fn scan(collection: &Collection, candidate: &Candidate) -> CoreResult<Scanned> {
    let id = candidate.segment.id();
    let data = candidate.segment.read_all()?;
    let mut retained = Vec::new();

    for marker in MarkerIterator::new(&data) {
        let marker = marker?;
        let revision = match marker.marker_type() {
            MarkerType::Document => {
                let identity = decode_identity(marker.payload())?;
                let revision = RevisionId::new(identity.revision);
                let current = collection.primary.lookup(&identity.key) == Some(revision)
                    && collection
                        .revisions
                        .lookup(revision)
                        .is_some_and(|position| position.is_at(id, marker.offset));
                if !current {
                    continue;
                }
                Some(revision)
            }
            MarkerType::Remove if candidate.keep_deletions => None,
            _ => continue,
        };
        retained.push(Retained {
            offset: marker.offset,
            size: marker.header.size,
            revision,
        });
    }
    Ok(Scanned { data, retained })
}

/// Merges `batch` and publishes the result.
pub(crate) fn merge(collection: &Collection, batch: &[Candidate]) -> CoreResult<MergeOutcome> {
    let Some(first) = batch.first() else {
        return Ok(MergeOutcome::default());
    };
    let scanned = batch
        .iter()
        .map(|candidate| scan(collection, candidate))
        .collect::<CoreResult<Vec<_>>>()?;

    let mut outcome = MergeOutcome {
        bytes_before: batch.iter().map(|c| c.segment.size()).sum(),
        ..MergeOutcome::default()
    };
    let payload: u64 = scanned
        .iter()
        .flat_map(|s| &s.retained)
        .map(|r| aligned_size(u64::from(r.size)))
        .sum();

    if payload == 0 {
        let mut segments = collection.segments.write();
        for candidate in batch {
            discard(collection, &mut segments, &candidate.segment);
        }
        debug!(collection = %collection.name(), inputs = batch.len(), "compaction left nothing to keep");
        return Ok(outcome);
    }

    let target = first.segment.id();
    let max_size = u32::try_from(payload + SEGMENT_OVERHEAD + FOOTER_SIZE).map_err(|_| {
        CoreError::resource_exhausted(format!("compaction output of {payload} bytes is too large"))
    })?;
    let output = Arc::new(Segment::create(
        Arc::clone(&collection.store),
        SegmentKind::Compactor,
        target,
        max_size,
        collection.id(),
    )?);
    collection
        .segments
        .write()
        .set_compactor(Some(Arc::clone(&output)));

    let copied = copy(&output, &scanned);
    let (relocations, stats) = match copied {
        Ok(copied) => copied,
        Err(err) => {
            abandon(collection, &output);
            return Err(err);
        }
    };

    let mut segments = collection.segments.write();
    if let Err(err) = swap(&mut segments, &first.segment, &output) {
        drop(segments);
        abandon(collection, &output);
        return Err(err);
    }
    for (revision, offset) in &relocations {
        collection.revisions.update(*revision, target, *offset, false);
    }
    collection.statistics.replace(target, stats);
    for candidate in &batch[1..] {
        discard(collection, &mut segments, &candidate.segment);
    }

    outcome.output = Some(target);
    outcome.documents = stats.number_alive;
    outcome.deletions = stats.number_deletions;
    outcome.bytes_after = output.size();
    Ok(outcome)
}

/// Writes the retained markers and seals the output.
fn copy(output: &Segment, scanned: &[Scanned]) -> CoreResult<(Vec<(RevisionId, u64)>, SegmentStats)> {
    let mut relocations = Vec::new();
    let mut stats = SegmentStats::default();

    for input in scanned {
        for retained in &input.retained {
            let aligned = aligned_size(u64::from(retained.size));
            let start = retained.offset as usize;
            let marker = input
                .data
                .get(start..start + aligned as usize)
                .ok_or_else(|| CoreError::corrupt(format!("marker at {start} runs past its segment")))?;
            let offset = output.write_marker(marker)?;
            match retained.revision {
                Some(revision) => {
                    relocations.push((revision, offset));
                    stats.number_alive += 1;
                    stats.size_alive += aligned;
                }
                None => stats.number_deletions += 1,
            }
        }
    }
    output.seal()?;
    Ok((relocations, stats))
}

/// Gives `output` the identity of `first`.
///
/// `first` is renamed out of the way before `output` takes its name. A
/// crash between the two renames leaves only the compaction file, which
/// the next open finishes renaming.
fn swap(segments: &mut SegmentSet, first: &Arc<Segment>, output: &Arc<Segment>) -> CoreResult<()> {
    let id = first.id();
    let name = first.name();
    first.rename(dead_name(&name))?;
    if let Err(err) = output.rename(datafile_name(id)) {
        if let Err(undo) = first.rename(name) {
            warn!(segment = %id, error = %undo, "failed to restore segment name after aborted swap");
        }
        return Err(err);
    }
    first.mark_for_removal();
    output.set_kind(SegmentKind::Datafile);
    segments.set_compactor(None);
    segments.replace_datafile(Arc::clone(output));
    Ok(())
}

/// Unlinks an input segment; its file goes when the last handle does.
fn discard(collection: &Collection, segments: &mut SegmentSet, segment: &Arc<Segment>) {
    let name = segment.name();
    if let Err(err) = segment.rename(dead_name(&name)) {
        warn!(file = %name, error = %err, "failed to rename compacted segment");
    }
    segment.mark_for_removal();
    segments.remove_datafile(segment.id());
    collection.statistics.remove(segment.id());
}

fn abandon(collection: &Collection, output: &Arc<Segment>) {
    output.mark_for_removal();
    let mut segments = collection.segments.write();
    if segments
        .compactor()
        .is_some_and(|compactor| Arc::ptr_eq(compactor, output))
    {
        segments.set_compactor(None);
    }
}
