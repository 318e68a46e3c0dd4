//! Collections: the component every document read and write goes through.
//!
//! A collection owns its segments, their statistics, the revision cache,
//! the primary index and any secondary indexes. Writers hold the
//! collection's write lock from the revision check until the indexes are
//! updated, so marker order in the journal equals the order in which the
//! cache and indexes observe the writes.

mod crud;
mod figures;
mod journal;
mod properties;
mod recovery;

pub use figures::{CollectionFigures, CompactionStatus, FileFigures, SegmentFigures};
pub use properties::CollectionProperties;

use crate::config::DEFAULT_LOCK_TIMEOUT;
use crate::document::{Document, DocumentPosition, RevisionCache};
use crate::error::{CoreError, CoreResult};
use crate::hooks::{EvaluatorRegistry, InvalidationHook, ValueEvaluator};
use crate::index::{build_index, IndexDefinition, PrimaryIndex, SecondaryIndex};
use crate::lock::{CollectionGuard, CollectionLock, CompactionLock, LockCoordinator, LockMode, LockOwner};
use crate::segment::{verify_marker, MarkerHeader, SegmentSet, SegmentStatistics, MARKER_HEADER_SIZE};
use crate::stats::DatabaseStats;
use crate::types::{CollectionId, RevisionId, TickGenerator};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_codec::Value;
use strata_storage::SegmentStore;

/// Database-wide services a collection uses.
#[derive(Clone)]
pub(crate) struct CollectionContext {
    pub(crate) ticks: Arc<TickGenerator>,
    pub(crate) stats: Arc<DatabaseStats>,
    pub(crate) coordinator: Arc<LockCoordinator>,
    pub(crate) hook: Arc<InvalidationHook>,
    pub(crate) evaluators: EvaluatorRegistry,
    pub(crate) lock_timeout: Duration,
    pub(crate) wait_for_sync: bool,
}

/// Compactor bookkeeping for one collection.
#[derive(Debug, Default)]
pub(crate) struct CompactionState {
    /// Sealed-segment index the next candidate scan starts from.
    pub(crate) resume_index: usize,
    /// Outcome of the last attempt.
    pub(crate) status: CompactionStatus,
    /// When the collection was last considered.
    pub(crate) last_attempt: Option<std::time::Instant>,
}

/// A named set of documents.
pub struct Collection {
    pub(crate) id: CollectionId,
    pub(crate) name: String,
    pub(crate) store: Arc<dyn SegmentStore>,
    pub(crate) context: CollectionContext,
    pub(crate) properties: RwLock<CollectionProperties>,
    pub(crate) lock: CollectionLock,
    pub(crate) compaction_lock: CompactionLock,
    pub(crate) segments: RwLock<SegmentSet>,
    pub(crate) statistics: SegmentStatistics,
    pub(crate) revisions: RevisionCache,
    pub(crate) primary: PrimaryIndex,
    pub(crate) indexes: RwLock<Vec<Arc<dyn SecondaryIndex>>>,
    pub(crate) compaction: Mutex<CompactionState>,
    pub(crate) dropped: AtomicBool,
}

impl Collection {
    fn new(
        id: CollectionId,
        name: String,
        properties: CollectionProperties,
        store: Arc<dyn SegmentStore>,
        context: CollectionContext,
    ) -> Self {
        Self {
            id,
            name,
            store,
            context,
            properties: RwLock::new(properties),
            lock: CollectionLock::new(id),
            compaction_lock: CompactionLock::new(),
            segments: RwLock::new(SegmentSet::new()),
            statistics: SegmentStatistics::new(),
            revisions: RevisionCache::new(),
            primary: PrimaryIndex::new(),
            indexes: RwLock::new(Vec::new()),
            compaction: Mutex::new(CompactionState::default()),
            dropped: AtomicBool::new(false),
        }
    }

    /// Collection id.
    #[must_use]
    pub fn id(&self) -> CollectionId {
        self.id
    }

    /// Collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current properties.
    #[must_use]
    pub fn properties(&self) -> CollectionProperties {
        self.properties.read().clone()
    }

    pub(crate) fn set_properties(&self, properties: CollectionProperties) {
        *self.properties.write() = properties;
    }

    /// Number of live documents.
    #[must_use]
    pub fn count(&self) -> usize {
        self.primary.len()
    }

    /// True once the collection was dropped.
    #[must_use]
    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    fn ensure_usable(&self) -> CoreResult<()> {
        if self.is_dropped() {
            return Err(CoreError::CollectionNotFound {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    fn effective_timeout(&self, timeout: Duration) -> Duration {
        if !timeout.is_zero() {
            timeout
        } else if !self.context.lock_timeout.is_zero() {
            self.context.lock_timeout
        } else {
            DEFAULT_LOCK_TIMEOUT
        }
    }

    pub(crate) fn acquire(
        &self,
        mode: LockMode,
        timeout: Duration,
        owner: Option<LockOwner<'_>>,
    ) -> CoreResult<CollectionGuard> {
        self.lock
            .acquire(mode, self.effective_timeout(timeout), owner)
            .inspect_err(|err| self.context.stats.record_lock_error(err))
    }

    /// Takes the shared side of the collection lock.
    ///
    /// A zero timeout means the configured default.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the lock is not free in time.
    pub fn lock_read(&self, timeout: Duration) -> CoreResult<CollectionGuard> {
        self.acquire(LockMode::Read, timeout, None)
    }

    /// Takes the exclusive side of the collection lock.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the lock is not free in time.
    pub fn lock_write(&self, timeout: Duration) -> CoreResult<CollectionGuard> {
        self.acquire(LockMode::Write, timeout, None)
    }

    /// Keeps the compactor away from this collection until the guard drops.
    pub fn prevent_compaction(&self) -> parking_lot::RwLockReadGuard<'_, ()> {
        self.compaction_lock.prevent_compaction()
    }

    /// Like [`Collection::prevent_compaction`] but fails instead of waiting.
    pub fn try_prevent_compaction(&self) -> Option<parking_lot::RwLockReadGuard<'_, ()>> {
        self.compaction_lock.try_prevent_compaction()
    }

    /// Resolves a revision to its position and segment and reads the body.
    ///
    /// The cache lookup and the segment lookup happen under the segment
    /// list lock, so a concurrent compaction swap is seen either entirely
    /// or not at all. The read itself runs on the cloned segment handle.
    pub(crate) fn load(&self, revision: RevisionId) -> CoreResult<(DocumentPosition, Vec<u8>)> {
        let (position, segment) = {
            let segments = self.segments.read();
            let position = self.revisions.lookup(revision).ok_or_else(|| {
                CoreError::not_found(revision.to_string())
            })?;
            let segment = segments.get(position.segment).ok_or_else(|| {
                CoreError::internal(format!(
                    "{revision} points at unknown segment {}",
                    position.segment
                ))
            })?;
            (position, segment)
        };

        let mut marker = segment.read_marker(position.offset, position.size)?;
        let header = MarkerHeader::decode(&marker)?;
        verify_marker(&header, &marker)?;
        self.context.stats.record_read(marker.len() as u64);
        Ok((position, marker.split_off(MARKER_HEADER_SIZE)))
    }

    pub(crate) fn load_document(&self, revision: RevisionId) -> CoreResult<(DocumentPosition, Document)> {
        let (position, payload) = self.load(revision)?;
        Ok((position, Document::decode(&payload)?))
    }

    /// Reads the current version of `key`.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` if the key is not live.
    pub fn read(&self, key: &str) -> CoreResult<Document> {
        let _guard = self.lock_read(Duration::ZERO)?;
        self.read_locked(key)
    }

    pub(crate) fn read_locked(&self, key: &str) -> CoreResult<Document> {
        self.ensure_usable()?;
        let revision = self
            .primary
            .lookup(key)
            .ok_or_else(|| CoreError::not_found(key))?;
        Ok(self.load_document(revision)?.1)
    }

    /// Returns the stored body bytes of `key`.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` if the key is not live.
    pub fn read_raw(&self, key: &str) -> CoreResult<Vec<u8>> {
        let _guard = self.lock_read(Duration::ZERO)?;
        self.ensure_usable()?;
        let revision = self
            .primary
            .lookup(key)
            .ok_or_else(|| CoreError::not_found(key))?;
        Ok(self.load(revision)?.1)
    }

    /// Reads a specific revision while its position is still cached.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` if the revision is not cached.
    pub fn read_revision(&self, revision: RevisionId) -> CoreResult<Document> {
        let _guard = self.lock_read(Duration::ZERO)?;
        self.ensure_usable()?;
        Ok(self.load_document(revision)?.1)
    }

    /// Position of the current version of `key`.
    #[must_use]
    pub fn position(&self, key: &str) -> Option<DocumentPosition> {
        let revision = self.primary.lookup(key)?;
        self.revisions.lookup(revision)
    }

    /// Every live document, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    pub fn documents(&self) -> CoreResult<Vec<Document>> {
        let _guard = self.lock_read(Duration::ZERO)?;
        self.documents_locked()
    }

    pub(crate) fn documents_locked(&self) -> CoreResult<Vec<Document>> {
        self.ensure_usable()?;
        self.primary
            .entries()
            .into_iter()
            .map(|(_, revision)| self.load_document(revision).map(|(_, doc)| doc))
            .collect()
    }

    /// Documents whose index key equals `value`.
    ///
    /// # Errors
    ///
    /// Returns `IndexNotFound` if no index has this name.
    pub fn lookup_by_index(&self, index: &str, value: &Value) -> CoreResult<Vec<Document>> {
        let _guard = self.lock_read(Duration::ZERO)?;
        self.ensure_usable()?;
        let index = self.index(index)?;
        index
            .lookup(value)?
            .into_iter()
            .map(|revision| self.load_document(revision).map(|(_, doc)| doc))
            .collect()
    }

    /// Documents for which `predicate` evaluates to `true`.
    ///
    /// # Errors
    ///
    /// Returns the first read or evaluation error.
    pub fn filter(&self, predicate: &dyn ValueEvaluator) -> CoreResult<Vec<Document>> {
        let mut matches = Vec::new();
        for document in self.documents()? {
            if predicate.evaluate(&document.body)? == Value::Bool(true) {
                matches.push(document);
            }
        }
        Ok(matches)
    }

    fn index(&self, name: &str) -> CoreResult<Arc<dyn SecondaryIndex>> {
        self.indexes
            .read()
            .iter()
            .find(|index| index.definition().name == name)
            .cloned()
            .ok_or_else(|| CoreError::IndexNotFound {
                name: name.to_string(),
            })
    }

    /// Definitions of the secondary indexes, in declaration order.
    #[must_use]
    pub fn index_definitions(&self) -> Vec<IndexDefinition> {
        self.indexes
            .read()
            .iter()
            .map(|index| index.definition().clone())
            .collect()
    }

    /// Builds a new index and fills it from the live documents.
    ///
    /// Nothing changes if filling fails, e.g. on a unique violation.
    pub(crate) fn add_index(&self, definition: IndexDefinition) -> CoreResult<()> {
        let _guard = self.lock_write(Duration::ZERO)?;
        self.ensure_usable()?;
        if self
            .indexes
            .read()
            .iter()
            .any(|index| index.definition().name == definition.name)
        {
            return Err(CoreError::invalid_argument(format!(
                "index '{}' already exists",
                definition.name
            )));
        }
        let index = build_index(definition, &self.context.evaluators)?;
        for document in self.documents_locked()? {
            index.insert(document.revision, &document)?;
        }
        self.indexes.write().push(index);
        Ok(())
    }

    pub(crate) fn remove_index(&self, name: &str) -> CoreResult<IndexDefinition> {
        let _guard = self.lock_write(Duration::ZERO)?;
        let mut indexes = self.indexes.write();
        let position = indexes
            .iter()
            .position(|index| index.definition().name == name)
            .ok_or_else(|| CoreError::IndexNotFound {
                name: name.to_string(),
            })?;
        Ok(indexes.remove(position).definition().clone())
    }

    /// Registers persisted index definitions and fills them.
    pub(crate) fn restore_indexes(
        &self,
        definitions: Vec<IndexDefinition>,
        evaluators: &EvaluatorRegistry,
    ) -> CoreResult<()> {
        let built = definitions
            .into_iter()
            .map(|definition| build_index(definition, evaluators))
            .collect::<CoreResult<Vec<_>>>()?;
        for document in self.documents_locked()? {
            for index in &built {
                index.insert(document.revision, &document)?;
            }
        }
        *self.indexes.write() = built;
        Ok(())
    }

    /// Syncs the journal and clears its uncollected counter.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the sync fails.
    pub fn sync(&self) -> CoreResult<()> {
        let journal = self.segments.read().journal().cloned();
        if let Some(journal) = journal {
            journal.sync()?;
            self.statistics.reset_uncollected(journal.id());
        }
        Ok(())
    }

    /// Detaches every segment and schedules its file for removal.
    pub(crate) fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
        let segments = self.segments.write().drain();
        for segment in &segments {
            segment.mark_for_removal();
        }
        self.revisions.clear();
        self.primary.clear();
        self.statistics.clear();
        for index in self.indexes.read().iter() {
            index.clear();
        }
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("documents", &self.primary.len())
            .field("dropped", &self.is_dropped())
            .finish()
    }
}
