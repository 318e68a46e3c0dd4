//! Document writes and their rollback.
//!
//! Every write appends its marker first and only then touches the cache
//! and indexes. If an index step fails, the write is undone through the
//! same path a transaction abort takes: a compensating marker is appended
//! so that replaying the journal reproduces the undone state.

use super::Collection;
use crate::document::{
    generate_key, has_user_fields, merged_body, replaced_body, stamp_body, track_key,
    validate_key, Document, DocumentOperation, DocumentPosition, OperationKind, OperationOptions,
    RevisionSnapshot, RollbackTarget, WriteResult,
};
use crate::error::{CoreError, CoreResult};
use crate::index::PRIMARY_INDEX_NAME;
use crate::lock::LockMode;
use crate::segment::{encode_marker, MarkerType, MARKER_HEADER_SIZE};
use crate::types::RevisionId;
use std::sync::Arc;
use std::time::Duration;
use strata_codec::{encode_body, encode_identity, MergeOptions, Value, KEY_FIELD};
use tracing::error;

/// Outcome of a write performed under an already held write lock.
pub(crate) type LockedWrite = (WriteResult, Option<DocumentOperation>);

fn object(body: Value) -> CoreResult<strata_codec::Map<String, Value>> {
    match body {
        Value::Object(fields) => Ok(fields),
        _ => Err(CoreError::invalid_argument("document body must be an object")),
    }
}

impl Collection {
    /// Inserts a new document.
    ///
    /// The key comes from `_key` or is generated. Any `_rev` in the body
    /// is replaced by the new revision.
    ///
    /// # Errors
    ///
    /// Returns `UniqueConstraintViolated` if the key or a unique index
    /// value is taken; nothing is left behind in that case.
    pub fn insert(self: &Arc<Self>, body: Value, options: OperationOptions) -> CoreResult<WriteResult> {
        self.single_write(&options, |collection| collection.insert_locked(body))
    }

    /// Applies a patch to an existing document.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` for unknown keys and `Conflict` if the
    /// expected revision is not current.
    pub fn update(
        self: &Arc<Self>,
        key: &str,
        patch: Value,
        options: OperationOptions,
    ) -> CoreResult<WriteResult> {
        self.single_write(&options, |collection| {
            collection.modify_locked(key, patch, &options, false)
        })
    }

    /// Replaces an existing document; only its key is kept.
    ///
    /// # Errors
    ///
    /// Same as [`Collection::update`].
    pub fn replace(
        self: &Arc<Self>,
        key: &str,
        body: Value,
        options: OperationOptions,
    ) -> CoreResult<WriteResult> {
        self.single_write(&options, |collection| {
            collection.modify_locked(key, body, &options, true)
        })
    }

    /// Removes a document.
    ///
    /// # Errors
    ///
    /// Same as [`Collection::update`].
    pub fn remove(self: &Arc<Self>, key: &str, options: OperationOptions) -> CoreResult<WriteResult> {
        self.single_write(&options, |collection| collection.remove_locked(key, &options))
    }

    /// Removes every document and returns how many there were.
    ///
    /// Compaction is kept away for the duration. If any removal fails the
    /// ones already done are rolled back.
    ///
    /// # Errors
    ///
    /// Returns the first removal error.
    pub fn truncate(self: &Arc<Self>, options: OperationOptions) -> CoreResult<u64> {
        let _prevent = self.compaction_lock.prevent_compaction();
        let _guard = self.acquire(LockMode::Write, Duration::ZERO, None)?;
        self.ensure_usable()?;

        let options = options.ignore_revisions(true);
        let mut operations = Vec::new();
        for (key, _) in self.primary.entries() {
            match self.remove_locked(&key, &options) {
                Ok((_, operation)) => operations.extend(operation),
                Err(err) => {
                    for mut operation in operations.into_iter().rev() {
                        // A failed revert is logged by the operation.
                        let _ = operation.revert();
                    }
                    return Err(err);
                }
            }
        }
        self.finish(&mut operations, &options)?;
        self.context.hook.collection_changed(self.id);
        Ok(operations.len() as u64)
    }

    /// Runs one write under a private write lock and completes it.
    fn single_write<F>(self: &Arc<Self>, options: &OperationOptions, write: F) -> CoreResult<WriteResult>
    where
        F: FnOnce(&Arc<Self>) -> CoreResult<LockedWrite>,
    {
        let _guard = self.acquire(LockMode::Write, Duration::ZERO, None)?;
        self.ensure_usable()?;
        let (result, operation) = write(self)?;
        let mut operations: Vec<_> = operation.into_iter().collect();
        self.finish(&mut operations, options)?;
        Ok(result)
    }

    /// Syncs if requested and marks the operations handled.
    ///
    /// A failed sync reverts the operations.
    fn finish(&self, operations: &mut [DocumentOperation], options: &OperationOptions) -> CoreResult<()> {
        if !operations.is_empty() && self.needs_sync(options) {
            if let Err(err) = self.sync() {
                for operation in operations.iter_mut().rev() {
                    let _ = operation.revert();
                }
                return Err(err);
            }
        }
        for operation in operations {
            operation.handled();
        }
        Ok(())
    }

    pub(crate) fn needs_sync(&self, options: &OperationOptions) -> bool {
        options.wait_for_sync || self.context.wait_for_sync || self.properties.read().wait_for_sync
    }

    pub(crate) fn insert_locked(self: &Arc<Self>, body: Value) -> CoreResult<LockedWrite> {
        let mut fields = object(body)?;
        let ticks = &self.context.ticks;
        let key = match fields.remove(KEY_FIELD) {
            Some(Value::String(key)) => {
                validate_key(&key)?;
                track_key(ticks, &key);
                key
            }
            Some(other) => {
                return Err(CoreError::InvalidDocumentKey {
                    key: other.to_string(),
                })
            }
            None => generate_key(ticks),
        };
        if self.primary.lookup(&key).is_some() {
            return Err(CoreError::UniqueConstraintViolated {
                index: PRIMARY_INDEX_NAME.to_string(),
                key,
            });
        }

        let revision = ticks.next_revision();
        let new = self.write_document(Document {
            key: key.clone(),
            revision,
            body: stamp_body(fields, &key, revision),
        })?;
        let result = WriteResult {
            key,
            revision,
            old_revision: None,
            position: Some(new.position),
        };
        let operation = self.apply(OperationKind::Insert { new })?;
        self.context.stats.record_insert();
        Ok((result, Some(operation)))
    }

    pub(crate) fn modify_locked(
        self: &Arc<Self>,
        key: &str,
        patch: Value,
        options: &OperationOptions,
        replace: bool,
    ) -> CoreResult<LockedWrite> {
        let patch = object(patch)?;
        let current = self
            .primary
            .lookup(key)
            .ok_or_else(|| CoreError::not_found(key))?;
        if let Err(err) = options.check_revision(key, current) {
            self.context.stats.record_conflict();
            return Err(err);
        }
        let old = self.snapshot(current)?;

        if !replace && !has_user_fields(&patch) {
            let result = WriteResult {
                key: key.to_string(),
                revision: current,
                old_revision: Some(current),
                position: Some(old.position),
            };
            return Ok((result, None));
        }

        let fields = if replace {
            replaced_body(patch)
        } else {
            let merge = MergeOptions {
                keep_null: options.keep_null,
                merge_objects: options.merge_objects,
            };
            merged_body(&old.document.body, &patch, merge)
        };
        let revision = self.context.ticks.next_revision();
        let new = self.write_document(Document {
            key: key.to_string(),
            revision,
            body: stamp_body(fields, key, revision),
        })?;
        self.statistics
            .retire(old.position.segment, old.position.aligned_size());

        let result = WriteResult {
            key: key.to_string(),
            revision,
            old_revision: Some(current),
            position: Some(new.position),
        };
        let kind = if replace {
            OperationKind::Replace { old, new }
        } else {
            OperationKind::Update { old, new }
        };
        let operation = self.apply(kind)?;
        if replace {
            self.context.stats.record_replace();
        } else {
            self.context.stats.record_update();
        }
        Ok((result, Some(operation)))
    }

    pub(crate) fn remove_locked(
        self: &Arc<Self>,
        key: &str,
        options: &OperationOptions,
    ) -> CoreResult<LockedWrite> {
        let current = self
            .primary
            .lookup(key)
            .ok_or_else(|| CoreError::not_found(key))?;
        if let Err(err) = options.check_revision(key, current) {
            self.context.stats.record_conflict();
            return Err(err);
        }
        let old = self.snapshot(current)?;

        self.write_tombstone(key, current)?;
        self.statistics
            .retire(old.position.segment, old.position.aligned_size());

        let result = WriteResult {
            key: key.to_string(),
            revision: current,
            old_revision: Some(current),
            position: None,
        };
        let operation = self.apply(OperationKind::Remove { old })?;
        self.context.stats.record_remove();
        Ok((result, Some(operation)))
    }

    /// Reads the current version of a revision for an undo record.
    fn snapshot(&self, revision: RevisionId) -> CoreResult<RevisionSnapshot> {
        let (position, document) = self.load_document(revision)?;
        Ok(RevisionSnapshot { document, position })
    }

    /// Appends a document marker and counts it alive.
    fn write_document(&self, document: Document) -> CoreResult<RevisionSnapshot> {
        let payload = encode_body(&document.body)?;
        let marker = encode_marker(MarkerType::Document, self.context.ticks.next(), &payload)?;
        let (segment, offset) = self.append_marker(&marker)?;
        let position = DocumentPosition {
            revision: document.revision,
            segment,
            offset,
            size: (MARKER_HEADER_SIZE + payload.len()) as u32,
            in_journal: true,
        };
        self.statistics.add_alive(segment, position.aligned_size());
        Ok(RevisionSnapshot { document, position })
    }

    /// Appends a remove marker and counts the deletion.
    fn write_tombstone(&self, key: &str, revision: RevisionId) -> CoreResult<()> {
        let payload = encode_identity(key, revision.as_u64())?;
        let marker = encode_marker(MarkerType::Remove, self.context.ticks.next(), &payload)?;
        let (segment, _) = self.append_marker(&marker)?;
        self.statistics.add_deletion(segment);
        Ok(())
    }

    /// Updates cache and indexes for a written marker, undoing the write on
    /// failure.
    fn apply(self: &Arc<Self>, kind: OperationKind) -> CoreResult<DocumentOperation> {
        match self.index_operation(&kind) {
            Ok(()) => {
                let target: Arc<dyn RollbackTarget> = Arc::clone(self) as Arc<dyn RollbackTarget>;
                let mut operation = DocumentOperation::new(target, kind);
                operation.indexed();
                Ok(operation)
            }
            Err(err) => {
                if let Err(rollback) = self.rollback_operation(&kind) {
                    error!(collection = %self.name, op = kind.name(), key = kind.key(), error = %rollback, "rollback after failed write failed");
                }
                Err(err)
            }
        }
    }

    /// Applies a write to the cache and indexes, in declaration order for
    /// inserts and reverse order for removals.
    fn index_operation(&self, kind: &OperationKind) -> CoreResult<()> {
        let indexes = self.indexes.read().clone();
        match kind {
            OperationKind::Insert { new } => {
                self.revisions.insert(new.position)?;
                self.primary.insert(&new.document.key, new.revision())?;
                for index in &indexes {
                    index.insert(new.revision(), &new.document)?;
                }
            }
            OperationKind::Update { old, new } | OperationKind::Replace { old, new } => {
                self.revisions.insert(new.position)?;
                self.primary.update_revision(&new.document.key, new.revision())?;
                for index in &indexes {
                    index.remove(old.revision(), &old.document)?;
                    index.insert(new.revision(), &new.document)?;
                }
                self.revisions.remove(old.revision());
            }
            OperationKind::Remove { old } => {
                for index in indexes.iter().rev() {
                    index.remove(old.revision(), &old.document)?;
                }
                self.primary.remove(&old.document.key);
                self.revisions.remove(old.revision());
            }
        }
        Ok(())
    }

    /// Drops a written revision from the cache and counts it dead where it
    /// currently lives. A later rollback may have moved it.
    fn retire_written(&self, written: &RevisionSnapshot) {
        let position = self
            .revisions
            .remove(written.revision())
            .unwrap_or(written.position);
        self.statistics
            .retire(position.segment, position.aligned_size());
    }

    /// Writes `document` again at the end of the journal and makes that
    /// copy the cached position of its revision.
    fn restore_version(&self, document: &Document) -> CoreResult<()> {
        let restored = self.write_document(document.clone())?;
        self.revisions.remove(document.revision);
        self.revisions.insert(restored.position)?;
        self.primary.upsert(&document.key, document.revision);
        Ok(())
    }
}

impl RollbackTarget for Collection {
    fn rollback_operation(&self, kind: &OperationKind) -> CoreResult<()> {
        let indexes = self.indexes.read().clone();
        match kind {
            OperationKind::Insert { new } => {
                for index in indexes.iter().rev() {
                    index.remove(new.revision(), &new.document)?;
                }
                if self.primary.lookup(&new.document.key) == Some(new.revision()) {
                    self.primary.remove(&new.document.key);
                }
                self.write_tombstone(&new.document.key, new.revision())?;
                self.retire_written(new);
            }
            OperationKind::Update { old, new } | OperationKind::Replace { old, new } => {
                for index in indexes.iter().rev() {
                    index.remove(new.revision(), &new.document)?;
                }
                self.retire_written(new);
                self.restore_version(&old.document)?;
                for index in &indexes {
                    index.insert(old.revision(), &old.document)?;
                }
            }
            OperationKind::Remove { old } => {
                self.restore_version(&old.document)?;
                for index in &indexes {
                    index.insert(old.revision(), &old.document)?;
                }
            }
        }
        self.context.stats.record_rollback();
        Ok(())
    }
}
