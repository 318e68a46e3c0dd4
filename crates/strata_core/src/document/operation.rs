//! Undo records for single document writes.

use super::{Document, DocumentPosition};
use crate::error::CoreResult;
use crate::types::RevisionId;
use std::fmt;
use std::sync::Arc;
use tracing::error;

/// One version of a document as seen by a write.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionSnapshot {
    /// The document body.
    pub document: Document,
    /// Where its marker was written.
    pub position: DocumentPosition,
}

impl RevisionSnapshot {
    /// Revision id of this version.
    #[must_use]
    pub fn revision(&self) -> RevisionId {
        self.position.revision
    }
}

/// What a write did, with the versions needed to undo it.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationKind {
    /// A new document.
    Insert {
        /// The inserted version.
        new: RevisionSnapshot,
    },
    /// A patch applied to an existing document.
    Update {
        /// The version that was current before.
        old: RevisionSnapshot,
        /// The version written.
        new: RevisionSnapshot,
    },
    /// A full replacement of an existing document.
    Replace {
        /// The version that was current before.
        old: RevisionSnapshot,
        /// The version written.
        new: RevisionSnapshot,
    },
    /// A removed document.
    Remove {
        /// The version that was removed.
        old: RevisionSnapshot,
    },
}

impl OperationKind {
    /// Key of the document written.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Insert { new } => &new.document.key,
            Self::Update { old, .. } | Self::Replace { old, .. } | Self::Remove { old } => {
                &old.document.key
            }
        }
    }

    /// Operation name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Replace { .. } => "replace",
            Self::Remove { .. } => "remove",
        }
    }
}

/// Lifecycle of a [`DocumentOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    /// The marker may be written but indexes are not updated yet.
    Created,
    /// Cache and indexes reflect the write.
    Indexed,
    /// The write completed and can be committed.
    Handled,
    /// Ownership moved to another operation; reverting does nothing.
    Swapped,
    /// The write was undone.
    Reverted,
}

/// Applies the inverse of a write.
pub trait RollbackTarget: Send + Sync {
    /// Undoes `kind`. Called with the collection's write lock held.
    ///
    /// # Errors
    ///
    /// Returns an error if the compensating marker cannot be written.
    fn rollback_operation(&self, kind: &OperationKind) -> CoreResult<()>;
}

/// Undo record of one document write.
pub struct DocumentOperation {
    target: Arc<dyn RollbackTarget>,
    kind: Option<OperationKind>,
    status: OperationStatus,
}

impl DocumentOperation {
    /// Starts tracking a write against `target`.
    pub fn new(target: Arc<dyn RollbackTarget>, kind: OperationKind) -> Self {
        Self {
            target,
            kind: Some(kind),
            status: OperationStatus::Created,
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> OperationStatus {
        self.status
    }

    /// The write being tracked; `None` once swapped away.
    #[must_use]
    pub fn kind(&self) -> Option<&OperationKind> {
        self.kind.as_ref()
    }

    /// Records that cache and indexes were updated.
    pub fn indexed(&mut self) {
        if self.status == OperationStatus::Created {
            self.status = OperationStatus::Indexed;
        }
    }

    /// Records that the write completed.
    pub fn handled(&mut self) {
        if self.status == OperationStatus::Indexed {
            self.status = OperationStatus::Handled;
        }
    }

    /// Moves the write into a new operation and leaves this one `Swapped`.
    #[must_use]
    pub fn swap(&mut self) -> Self {
        let moved = Self {
            target: Arc::clone(&self.target),
            kind: self.kind.take(),
            status: self.status,
        };
        self.status = OperationStatus::Swapped;
        moved
    }

    /// Undoes the write.
    ///
    /// Only `Indexed` and `Handled` operations have anything to undo;
    /// every other status makes this a no-op, so reverting twice is the
    /// same as reverting once.
    ///
    /// # Errors
    ///
    /// Returns the rollback error; the operation keeps its status so the
    /// caller can see that nothing was undone.
    pub fn revert(&mut self) -> CoreResult<()> {
        if !matches!(
            self.status,
            OperationStatus::Indexed | OperationStatus::Handled
        ) {
            return Ok(());
        }
        let Some(kind) = self.kind.as_ref() else {
            return Ok(());
        };
        if let Err(err) = self.target.rollback_operation(kind) {
            error!(op = kind.name(), key = kind.key(), error = %err, "failed to roll back document operation");
            return Err(err);
        }
        self.status = OperationStatus::Reverted;
        Ok(())
    }
}

impl fmt::Debug for DocumentOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentOperation")
            .field("kind", &self.kind)
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SegmentId;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        undone: Mutex<Vec<String>>,
    }

    impl RollbackTarget for Recorder {
        fn rollback_operation(&self, kind: &OperationKind) -> CoreResult<()> {
            self.undone.lock().push(format!("{} {}", kind.name(), kind.key()));
            Ok(())
        }
    }

    fn snapshot(key: &str, revision: u64) -> RevisionSnapshot {
        RevisionSnapshot {
            document: Document {
                key: key.to_string(),
                revision: RevisionId::new(revision),
                body: json!({"_key": key, "_rev": revision}),
            },
            position: DocumentPosition {
                revision: RevisionId::new(revision),
                segment: SegmentId::new(1),
                offset: 56,
                size: 40,
                in_journal: true,
            },
        }
    }

    #[test]
    fn revert_is_idempotent() {
        let recorder = Arc::new(Recorder::default());
        let mut op = DocumentOperation::new(
            recorder.clone(),
            OperationKind::Insert { new: snapshot("a", 5) },
        );
        op.indexed();
        op.handled();

        op.revert().unwrap();
        op.revert().unwrap();
        assert_eq!(op.status(), OperationStatus::Reverted);
        assert_eq!(*recorder.undone.lock(), vec!["insert a".to_string()]);
    }

    #[test]
    fn created_operation_has_nothing_to_revert() {
        let recorder = Arc::new(Recorder::default());
        let mut op = DocumentOperation::new(
            recorder.clone(),
            OperationKind::Remove { old: snapshot("b", 2) },
        );
        op.revert().unwrap();
        assert_eq!(op.status(), OperationStatus::Created);
        assert!(recorder.undone.lock().is_empty());
    }

    #[test]
    fn swapped_operation_is_not_reverted() {
        let recorder = Arc::new(Recorder::default());
        let mut op = DocumentOperation::new(
            recorder.clone(),
            OperationKind::Update {
                old: snapshot("c", 1),
                new: snapshot("c", 2),
            },
        );
        op.indexed();

        let mut moved = op.swap();
        assert_eq!(op.status(), OperationStatus::Swapped);
        assert!(op.kind().is_none());
        op.revert().unwrap();
        assert!(recorder.undone.lock().is_empty());

        assert_eq!(moved.status(), OperationStatus::Indexed);
        moved.revert().unwrap();
        assert_eq!(*recorder.undone.lock(), vec!["update c".to_string()]);
    }
}
