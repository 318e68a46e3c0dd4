//! Background compaction of sealed segments.
//!
//! A pass over one collection picks a batch of consecutive sealed
//! segments from their statistics ([`select`]), copies the markers that
//! are still current into a fresh segment and swaps it in under the first
//! input's id ([`merge`]). A collection that is busy is skipped rather
//! than waited for.

mod merge;
mod select;

pub use select::CompactionReason;

use crate::collection::{Collection, CompactionStatus};
use crate::config::CompactionConfig;
use crate::error::{CoreError, CoreResult};
use crate::lock::LockMode;
use crate::types::SegmentId;
use parking_lot::{Condvar, Mutex};
use select::SegmentInfo;
use serde::Serialize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// What one compaction of one collection did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    /// Collection name.
    pub collection: String,
    /// Input segments, oldest first.
    pub segments: Vec<SegmentId>,
    /// Why each input was picked.
    pub reasons: Vec<CompactionReason>,
    /// The segment that now holds the kept markers, if any were kept.
    pub output: Option<SegmentId>,
    /// Documents copied.
    pub documents: u64,
    /// Remove markers copied.
    pub deletions: u64,
    /// Bytes of the inputs.
    pub bytes_before: u64,
    /// Bytes of the output.
    pub bytes_after: u64,
}

impl CompactionReport {
    /// Bytes freed once the inputs are deleted.
    #[must_use]
    pub fn reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

fn set_status(collection: &Collection, message: impl Into<String>) {
    collection.compaction.lock().status = CompactionStatus {
        message: message.into(),
        time: Some(unix_now()),
    };
}

/// Runs one selection and merge over `collection`.
///
/// Returns `None` if nothing was compacted. Unless `force` is set, a
/// collection compacted less than `collection_interval` ago is left alone.
pub(crate) fn compact_collection(
    collection: &Collection,
    config: &CompactionConfig,
    force: bool,
) -> CoreResult<Option<CompactionReport>> {
    if collection.is_dropped() || !collection.properties().do_compact {
        return Ok(None);
    }
    if !force {
        let state = collection.compaction.lock();
        if state
            .last_attempt
            .is_some_and(|at| at.elapsed() < config.collection_interval)
        {
            return Ok(None);
        }
    }

    let Some(_exclusive) = collection.compaction_lock.try_lock_for_compaction() else {
        set_status(collection, "skipped: bulk operation running");
        return Ok(None);
    };
    let _guard = match collection.lock.acquire(LockMode::Read, config.lock_timeout, None) {
        Ok(guard) => guard,
        Err(err) if err.is_retryable() => {
            set_status(collection, "skipped: collection busy");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };

    let resume_index = collection.compaction.lock().resume_index;
    let journal_size = collection.properties().journal_size;
    let selection = {
        let Some(segments) = collection.segments.try_read() else {
            set_status(collection, "skipped: segment list busy");
            return Ok(None);
        };
        if segments.compactor().is_some() {
            set_status(collection, "skipped: compaction output pending");
            return Ok(None);
        }
        if let Some(failed) = segments.all().iter().find(|s| s.last_error().is_some()) {
            set_status(collection, format!("skipped: segment {} has a write error", failed.id()));
            return Ok(None);
        }
        let sealed: Vec<_> = segments
            .datafiles()
            .iter()
            .filter(|segment| segment.is_sealed())
            .map(|segment| {
                let info = SegmentInfo {
                    stats: collection.statistics.get(segment.id()),
                    file_size: segment.size(),
                    max_size: u64::from(segment.max_size()),
                };
                (Arc::clone(segment), info)
            })
            .collect();
        select::select(&sealed, resume_index, collection.count() == 0, journal_size, config)
    };
    {
        let mut state = collection.compaction.lock();
        state.resume_index = selection.resume_index;
        state.last_attempt = Some(Instant::now());
    }
    if selection.batch.is_empty() {
        set_status(collection, "nothing to compact");
        return Ok(None);
    }

    let inputs: Vec<_> = selection.batch.iter().map(|c| c.segment.id()).collect();
    debug!(collection = %collection.name(), segments = ?inputs, "compacting");
    let outcome = match merge::merge(collection, &selection.batch) {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(collection = %collection.name(), error = %err, "compaction failed");
            set_status(collection, format!("failed: {err}"));
            return Err(err);
        }
    };

    let report = CompactionReport {
        collection: collection.name().to_string(),
        reasons: selection.batch.iter().map(|c| c.reason).collect(),
        segments: inputs,
        output: outcome.output,
        documents: outcome.documents,
        deletions: outcome.deletions,
        bytes_before: outcome.bytes_before,
        bytes_after: outcome.bytes_after,
    };
    collection
        .context
        .stats
        .record_compaction(report.segments.len() as u64, report.reclaimed());
    set_status(
        collection,
        format!("compacted {} segments, reclaimed {} bytes", report.segments.len(), report.reclaimed()),
    );
    info!(
        collection = %report.collection,
        segments = report.segments.len(),
        documents = report.documents,
        reclaimed = report.reclaimed(),
        "compaction finished"
    );
    Ok(Some(report))
}

#[derive(Debug, Default)]
struct Signal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// The background compactor.
///
/// Sleeps for `sleep_time` between passes. Stopping interrupts the sleep;
/// a batch that is being copied is finished first.
#[derive(Debug)]
pub struct CompactorThread {
    signal: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl CompactorThread {
    /// Starts the thread. `collections` is asked for the current
    /// collections at the start of every pass.
    pub(crate) fn spawn<F>(config: CompactionConfig, collections: F) -> CoreResult<Self>
    where
        F: Fn() -> Vec<Arc<Collection>> + Send + 'static,
    {
        let signal = Arc::new(Signal::default());
        let shared = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("strata-compactor".into())
            .spawn(move || run(&shared, &config, &collections))
            .map_err(CoreError::Io)?;
        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Starts the next pass now.
    pub fn wake(&self) {
        self.signal.wake.notify_all();
    }

    /// Stops the thread and waits for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("compactor thread panicked");
            }
        }
    }
}

impl Drop for CompactorThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<F>(signal: &Signal, config: &CompactionConfig, collections: &F)
where
    F: Fn() -> Vec<Arc<Collection>>,
{
    info!(sleep = ?config.sleep_time, "compactor started");
    loop {
        {
            let mut stopped = signal.stopped.lock();
            if *stopped {
                break;
            }
            signal.wake.wait_for(&mut stopped, config.sleep_time);
            if *stopped {
                break;
            }
        }

        for collection in collections() {
            if *signal.stopped.lock() {
                break;
            }
            if let Err(err) = compact_collection(&collection, config, false) {
                warn!(collection = %collection.name(), error = %err, "compaction pass failed");
            }
        }
    }
    info!("compactor stopped");
}
