//! Documents, write options and the revision position cache.

mod body;
mod key;
mod operation;
mod position;

pub use body::{has_user_fields, merged_body, replaced_body, stamp_body};
pub use key::{generate_key, track_key, validate_key, MAX_KEY_LENGTH};
pub use operation::{
    DocumentOperation, OperationKind, OperationStatus, RevisionSnapshot, RollbackTarget,
};
pub use position::{DocumentPosition, RevisionCache};

use crate::error::{CoreError, CoreResult};
use crate::types::RevisionId;
use serde::Serialize;
use strata_codec::{decode_body, get_path, Value, KEY_FIELD, REV_FIELD};

/// One version of a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    /// Document key.
    pub key: String,
    /// Revision id of this version.
    pub revision: RevisionId,
    /// Full body, `_key` and `_rev` included.
    pub body: Value,
}

impl Document {
    /// Builds a document from a stamped body.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if `_key` or `_rev` is missing.
    pub fn from_body(body: Value) -> CoreResult<Self> {
        let key = body
            .get(KEY_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::corrupt("document body without _key"))?
            .to_string();
        let revision = body
            .get(REV_FIELD)
            .and_then(Value::as_u64)
            .ok_or_else(|| CoreError::corrupt(format!("document '{key}' without _rev")))?;
        Ok(Self {
            key,
            revision: RevisionId::new(revision),
            body,
        })
    }

    /// Decodes a document marker payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid body.
    pub fn decode(payload: &[u8]) -> CoreResult<Self> {
        Self::from_body(decode_body(payload)?)
    }

    /// Resolves a dotted attribute path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        get_path(&self.body, path)
    }
}

/// Per-call write options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationOptions {
    /// Sync the journal before the write (or its transaction) returns.
    pub wait_for_sync: bool,
    /// Skip the expected-revision check.
    pub ignore_revisions: bool,
    /// Revision the caller believes is current.
    pub expected_revision: Option<RevisionId>,
    /// Keep `null` attributes in update patches.
    pub keep_null: bool,
    /// Merge nested objects on update.
    pub merge_objects: bool,
}

impl Default for OperationOptions {
    fn default() -> Self {
        Self {
            wait_for_sync: false,
            ignore_revisions: false,
            expected_revision: None,
            keep_null: true,
            merge_objects: true,
        }
    }
}

impl OperationOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Syncs before returning.
    #[must_use]
    pub const fn wait_for_sync(mut self, value: bool) -> Self {
        self.wait_for_sync = value;
        self
    }

    /// Disables the expected-revision check.
    #[must_use]
    pub const fn ignore_revisions(mut self, value: bool) -> Self {
        self.ignore_revisions = value;
        self
    }

    /// Requires `revision` to be current.
    #[must_use]
    pub const fn expect(mut self, revision: RevisionId) -> Self {
        self.expected_revision = Some(revision);
        self
    }

    /// Sets null handling for updates.
    #[must_use]
    pub const fn keep_null(mut self, value: bool) -> Self {
        self.keep_null = value;
        self
    }

    /// Sets nested object merging for updates.
    #[must_use]
    pub const fn merge_objects(mut self, value: bool) -> Self {
        self.merge_objects = value;
        self
    }

    pub(crate) fn check_revision(&self, key: &str, actual: RevisionId) -> CoreResult<()> {
        match self.expected_revision {
            Some(expected) if !self.ignore_revisions && expected != actual => {
                Err(CoreError::Conflict {
                    key: key.to_string(),
                    expected,
                    actual,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Outcome of a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteResult {
    /// Document key.
    pub key: String,
    /// Revision written (for removes, the revision that was removed).
    pub revision: RevisionId,
    /// Revision that was current before the write.
    pub old_revision: Option<RevisionId>,
    /// Where the new body lives; `None` for removes.
    pub position: Option<DocumentPosition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_from_body() {
        let doc = Document::from_body(json!({"_key": "a", "_rev": 3u64, "n": {"x": 1}})).unwrap();
        assert_eq!(doc.key, "a");
        assert_eq!(doc.revision, RevisionId::new(3));
        assert_eq!(doc.get("n.x"), Some(&json!(1)));

        assert!(Document::from_body(json!({"_key": "a"})).unwrap_err().is_corruption());
    }

    #[test]
    fn revision_check() {
        let options = OperationOptions::new().expect(RevisionId::new(1));
        assert!(options.check_revision("a", RevisionId::new(1)).is_ok());
        let err = options.check_revision("a", RevisionId::new(2)).unwrap_err();
        assert!(err.is_retryable());

        let ignored = options.ignore_revisions(true);
        assert!(ignored.check_revision("a", RevisionId::new(2)).is_ok());
        assert!(OperationOptions::new().check_revision("a", RevisionId::new(9)).is_ok());
    }
}
