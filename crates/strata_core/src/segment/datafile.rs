//! A single segment file.

use super::marker::{
    encode_collection_header, encode_footer, DatafileHeader, MarkerHeader, MarkerType,
    FOOTER_SIZE, FORMAT_VERSION, MARKER_HEADER_SIZE,
};
use super::naming::{compaction_name, datafile_name, journal_name, temp_name};
use crate::error::{CoreError, CoreResult};
use crate::types::{CollectionId, SegmentId};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_storage::{SegmentStore, StorageBackend, StorageError};
use tracing::{debug, warn};

/// Role of a segment within its collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    /// The collection's write target.
    Journal,
    /// Sealed and read-only.
    Datafile,
    /// Output of a running compaction.
    Compactor,
}

/// Tick ranges observed in a segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickRange {
    /// Smallest tick of any marker.
    pub tick_min: u64,
    /// Largest tick of any marker.
    pub tick_max: u64,
    /// Smallest tick of a document or remove marker.
    pub data_min: u64,
    /// Largest tick of a document or remove marker.
    pub data_max: u64,
}

impl TickRange {
    /// Widens the range to include a marker.
    pub fn observe(&mut self, marker_type: MarkerType, tick: u64) {
        widen(&mut self.tick_min, &mut self.tick_max, tick);
        if marker_type.is_data() {
            widen(&mut self.data_min, &mut self.data_max, tick);
        }
    }
}

fn widen(min: &mut u64, max: &mut u64, tick: u64) {
    if *min == 0 || tick < *min {
        *min = tick;
    }
    if tick > *max {
        *max = tick;
    }
}

#[derive(Debug)]
struct SegmentState {
    name: String,
    kind: SegmentKind,
    sealed: bool,
    ticks: TickRange,
    last_error: Option<String>,
}

/// An append-only segment file.
///
/// Segments are shared as `Arc<Segment>`. The collection's segment set
/// holds one reference; every reader that resolved a document position
/// holds another for as long as it reads. A segment dropped by compaction
/// is only marked for removal: its file disappears when the last `Arc`
/// goes away, so an in-flight reader never sees its bytes vanish.
pub struct Segment {
    id: SegmentId,
    max_size: u32,
    store: Arc<dyn SegmentStore>,
    backend: RwLock<Box<dyn StorageBackend>>,
    state: Mutex<SegmentState>,
    doomed: AtomicBool,
}

impl Segment {
    /// Creates a new segment and writes its header markers.
    ///
    /// Journals are initialised under a temporary name and renamed to
    /// `journal-<id>.db` once their headers are in place. If writing the
    /// headers fails the file is removed again.
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhausted` if there is no room, or the storage error.
    pub fn create(
        store: Arc<dyn SegmentStore>,
        kind: SegmentKind,
        id: SegmentId,
        max_size: u32,
        collection: CollectionId,
    ) -> CoreResult<Self> {
        let name = match kind {
            SegmentKind::Journal => temp_name(id),
            SegmentKind::Compactor => compaction_name(id),
            SegmentKind::Datafile => datafile_name(id),
        };
        let mut backend = store.create(&name)?;

        let header = DatafileHeader {
            version: FORMAT_VERSION,
            max_size,
            segment_id: id,
        };
        let written = header
            .encode()
            .and_then(|bytes| backend.append(&bytes).map_err(CoreError::from))
            .and_then(|_| encode_collection_header(collection, id.as_u64()))
            .and_then(|bytes| backend.append(&bytes).map_err(CoreError::from));

        if let Err(err) = written {
            drop(backend);
            if let Err(cleanup) = store.remove(&name) {
                warn!(file = %name, error = %cleanup, "failed to remove half-written segment");
            }
            return Err(err);
        }

        let mut ticks = TickRange::default();
        ticks.observe(MarkerType::Header, id.as_u64());

        let segment = Self {
            id,
            max_size,
            store,
            backend: RwLock::new(backend),
            state: Mutex::new(SegmentState {
                name,
                kind,
                sealed: false,
                ticks,
                last_error: None,
            }),
            doomed: AtomicBool::new(false),
        };

        if kind == SegmentKind::Journal {
            if let Err(err) = segment.rename(journal_name(id)) {
                segment.mark_for_removal();
                return Err(err);
            }
        }
        debug!(segment = %id, ?kind, max_size, "created segment");
        Ok(segment)
    }

    /// Opens an existing segment and validates its header marker.
    ///
    /// The returned segment is unsealed; recovery seals it once it has
    /// scanned the footer.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the header is missing, damaged, or names a
    /// different segment id.
    pub fn open(
        store: Arc<dyn SegmentStore>,
        name: &str,
        id: SegmentId,
        kind: SegmentKind,
    ) -> CoreResult<Self> {
        let backend = store.open(name)?;
        let size = backend.size()?;
        let header_len = super::marker::DATAFILE_HEADER_SIZE;
        if size < header_len {
            return Err(CoreError::corrupt(format!(
                "segment {name} is too short for a header ({size} bytes)"
            )));
        }

        let bytes = backend.read_at(0, header_len as usize)?;
        let marker = MarkerHeader::decode(&bytes)?;
        if marker.marker_type != MarkerType::Header || u64::from(marker.size) > header_len {
            return Err(CoreError::corrupt(format!(
                "segment {name} does not start with a header marker"
            )));
        }
        super::marker::verify_marker(&marker, &bytes[..marker.size as usize])?;
        let header = DatafileHeader::decode_payload(&bytes[MARKER_HEADER_SIZE..])?;
        if header.segment_id != id {
            return Err(CoreError::corrupt(format!(
                "segment {name} claims id {} in its header",
                header.segment_id
            )));
        }

        Ok(Self {
            id,
            max_size: header.max_size,
            store,
            backend: RwLock::new(backend),
            state: Mutex::new(SegmentState {
                name: name.to_string(),
                kind,
                sealed: false,
                ticks: TickRange::default(),
                last_error: None,
            }),
            doomed: AtomicBool::new(false),
        })
    }

    /// Segment id.
    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Current file name.
    #[must_use]
    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    /// Current role.
    #[must_use]
    pub fn kind(&self) -> SegmentKind {
        self.state.lock().kind
    }

    /// Changes the role (file names are changed separately).
    pub fn set_kind(&self, kind: SegmentKind) {
        self.state.lock().kind = kind;
    }

    /// Maximum size the segment may grow to.
    #[must_use]
    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    /// Bytes written so far; the next marker goes here.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.backend.read().size().unwrap_or(0)
    }

    /// True once the footer is written.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.state.lock().sealed
    }

    /// Tick ranges seen so far.
    #[must_use]
    pub fn ticks(&self) -> TickRange {
        self.state.lock().ticks
    }

    /// Widens the tick ranges (used by recovery).
    pub fn observe(&self, marker_type: MarkerType, tick: u64) {
        self.state.lock().ticks.observe(marker_type, tick);
    }

    /// The last write error, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    /// True if a marker of `len` padded bytes still fits before the footer.
    #[must_use]
    pub fn has_room(&self, len: u64) -> bool {
        !self.is_sealed() && self.size() + len + FOOTER_SIZE <= u64::from(self.max_size)
    }

    /// Appends one padded marker and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the segment is sealed or full, or the storage
    /// error (disk full becomes `ResourceExhausted`).
    pub fn write_marker(&self, marker: &[u8]) -> CoreResult<u64> {
        let header = MarkerHeader::decode(marker)?;
        let mut backend = self.backend.write();
        {
            let state = self.state.lock();
            if state.sealed {
                return Err(CoreError::internal(format!(
                    "write to sealed segment {}",
                    self.id
                )));
            }
        }
        let size = backend.size()?;
        if size + marker.len() as u64 + FOOTER_SIZE > u64::from(self.max_size) {
            return Err(CoreError::internal(format!(
                "segment {} has no room for {} bytes",
                self.id,
                marker.len()
            )));
        }

        match backend.append(marker) {
            Ok(offset) => {
                self.state.lock().ticks.observe(header.marker_type, header.tick);
                Ok(offset)
            }
            Err(err) => {
                if !err.is_full() {
                    self.state.lock().last_error = Some(err.to_string());
                }
                Err(err.into())
            }
        }
    }

    /// Reads the unpadded marker at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is outside the segment.
    pub fn read_marker(&self, offset: u64, size: u32) -> CoreResult<Vec<u8>> {
        Ok(self.backend.read().read_at(offset, size as usize)?)
    }

    /// Reads the whole segment image.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the read fails.
    pub fn read_all(&self) -> CoreResult<Vec<u8>> {
        Ok(self.backend.read().read_all()?)
    }

    /// Flushes and syncs written markers.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the sync fails.
    pub fn sync(&self) -> CoreResult<()> {
        let mut backend = self.backend.write();
        backend.flush()?;
        backend.sync()?;
        Ok(())
    }

    /// Writes the footer and syncs. Sealing a sealed segment is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the footer cannot be written.
    pub fn seal(&self) -> CoreResult<()> {
        let mut backend = self.backend.write();
        let tick = {
            let state = self.state.lock();
            if state.sealed {
                return Ok(());
            }
            state.ticks.tick_max.max(self.id.as_u64())
        };

        let footer = encode_footer(tick)?;
        backend.append(&footer)?;
        backend.flush()?;
        backend.sync()?;

        let mut state = self.state.lock();
        state.sealed = true;
        state.ticks.observe(MarkerType::Footer, tick);
        debug!(segment = %self.id, size = backend.size().unwrap_or(0), "sealed segment");
        Ok(())
    }

    /// Marks a segment as sealed without writing (its footer is on disk).
    pub fn mark_sealed(&self) {
        self.state.lock().sealed = true;
    }

    /// Cuts the file back to `size` bytes (torn tail after a crash).
    ///
    /// # Errors
    ///
    /// Returns the storage error if truncation fails.
    pub fn truncate(&self, size: u64) -> CoreResult<()> {
        self.backend.write().truncate(size)?;
        Ok(())
    }

    /// Renames the underlying file.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the rename fails.
    pub fn rename(&self, new_name: String) -> CoreResult<()> {
        let mut state = self.state.lock();
        self.store.rename(&state.name, &new_name)?;
        state.name = new_name;
        Ok(())
    }

    /// Schedules the file for removal once the last handle is dropped.
    pub fn mark_for_removal(&self) {
        self.doomed.store(true, Ordering::Release);
    }

    /// True if the file will be removed on drop.
    #[must_use]
    pub fn is_marked_for_removal(&self) -> bool {
        self.doomed.load(Ordering::Acquire)
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if !self.doomed.load(Ordering::Acquire) {
            return;
        }
        let name = self.state.get_mut().name.clone();
        match self.store.remove(&name) {
            Ok(()) => debug!(segment = %self.id, file = %name, "removed segment file"),
            Err(StorageError::NotFound { .. }) => {}
            Err(err) => warn!(segment = %self.id, file = %name, error = %err, "failed to remove segment file"),
        }
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("name", &state.name)
            .field("kind", &state.kind)
            .field("sealed", &state.sealed)
            .field("max_size", &self.max_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::super::marker::{encode_marker, SEGMENT_OVERHEAD};
    use super::*;
    use strata_storage::{MemoryStore, StorageQuota};

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn journal_is_renamed_after_headers() {
        let store = store();
        let segment = Segment::create(
            store.clone(),
            SegmentKind::Journal,
            SegmentId::new(5),
            4096,
            CollectionId::new(1),
        )
        .unwrap();

        assert_eq!(segment.name(), "journal-5.db");
        assert!(store.exists("journal-5.db"));
        assert!(!store.exists("temp-5.db"));
        assert_eq!(segment.size(), SEGMENT_OVERHEAD);
    }

    #[test]
    fn failed_header_write_removes_file() {
        let store = Arc::new(MemoryStore::with_quota(StorageQuota::new(40)));
        let err = Segment::create(
            store.clone(),
            SegmentKind::Journal,
            SegmentId::new(6),
            4096,
            CollectionId::new(1),
        )
        .unwrap_err();

        assert!(matches!(err, CoreError::ResourceExhausted { .. }));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn write_read_and_capacity() {
        let segment = Segment::create(
            store(),
            SegmentKind::Journal,
            SegmentId::new(7),
            128,
            CollectionId::new(1),
        )
        .unwrap();

        let marker = encode_marker(MarkerType::Document, 8, b"0123456789").unwrap();
        assert!(segment.has_room(marker.len() as u64));
        let offset = segment.write_marker(&marker).unwrap();
        assert_eq!(offset, SEGMENT_OVERHEAD);
        assert_eq!(segment.read_marker(offset, 26).unwrap(), marker[..26]);
        assert_eq!(segment.ticks().data_max, 8);

        // 56 + 32 + 32 + 16 > 128
        assert!(!segment.has_room(marker.len() as u64));
        assert!(segment.write_marker(&marker).is_err());
    }

    #[test]
    fn seal_is_idempotent_and_blocks_writes() {
        let segment = Segment::create(
            store(),
            SegmentKind::Journal,
            SegmentId::new(9),
            4096,
            CollectionId::new(1),
        )
        .unwrap();

        segment.seal().unwrap();
        let sealed_size = segment.size();
        segment.seal().unwrap();
        assert_eq!(segment.size(), sealed_size);
        assert_eq!(sealed_size, SEGMENT_OVERHEAD + FOOTER_SIZE);

        let marker = encode_marker(MarkerType::Document, 10, b"late").unwrap();
        assert!(segment.write_marker(&marker).is_err());
    }

    #[test]
    fn open_validates_header() {
        let store = store();
        let id = SegmentId::new(11);
        {
            let segment = Segment::create(
                store.clone(),
                SegmentKind::Journal,
                id,
                4096,
                CollectionId::new(2),
            )
            .unwrap();
            segment.seal().unwrap();
            segment.rename(datafile_name(id)).unwrap();
        }

        let reopened =
            Segment::open(store.clone(), "datafile-11.db", id, SegmentKind::Datafile).unwrap();
        assert_eq!(reopened.max_size(), 4096);

        let wrong_id = Segment::open(store.clone(), "datafile-11.db", SegmentId::new(12), SegmentKind::Datafile);
        assert!(wrong_id.unwrap_err().is_corruption());

        store.handle("datafile-11.db").unwrap().corrupt_byte(20, 0xee);
        let damaged = Segment::open(store, "datafile-11.db", id, SegmentKind::Datafile);
        assert!(damaged.unwrap_err().is_corruption());
    }

    #[test]
    fn doomed_segment_is_removed_with_last_handle() {
        let store = store();
        let segment = Arc::new(
            Segment::create(
                store.clone(),
                SegmentKind::Journal,
                SegmentId::new(13),
                4096,
                CollectionId::new(1),
            )
            .unwrap(),
        );
        let reader = Arc::clone(&segment);

        segment.mark_for_removal();
        drop(segment);
        assert!(store.exists("journal-13.db"));
        assert_eq!(reader.read_all().unwrap().len() as u64, SEGMENT_OVERHEAD);

        drop(reader);
        assert!(!store.exists("journal-13.db"));
    }
}
