//! Error types for Strata core.

use crate::types::{CollectionId, RevisionId};
use std::io;
use std::time::Duration;
use strata_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Strata core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// Document body codec error.
    #[error("codec error: {0}")]
    Codec(#[from] strata_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The caller's expected revision is not the current one.
    #[error("conflict on document '{key}': expected revision {expected}, current is {actual}")]
    Conflict {
        /// Document key.
        key: String,
        /// Revision the caller expected.
        expected: RevisionId,
        /// Revision that is actually current.
        actual: RevisionId,
    },

    /// No document with this key (or revision) exists.
    #[error("document not found: '{key}'")]
    DocumentNotFound {
        /// Key (or revision) that was looked up.
        key: String,
    },

    /// A unique index already holds the value.
    #[error("unique constraint violated in index '{index}' for document '{key}'")]
    UniqueConstraintViolated {
        /// Name of the violated index (`primary` for the key index).
        index: String,
        /// Key of the document that could not be indexed.
        key: String,
    },

    /// A collection lock could not be acquired in time.
    #[error("timed out after {timeout:?} waiting for lock on collection {collection}")]
    LockTimeout {
        /// Collection whose lock was requested.
        collection: CollectionId,
        /// The timeout that expired.
        timeout: Duration,
    },

    /// Acquiring the lock would close a cycle of waiting transactions.
    #[error("deadlock detected while locking collection {collection}")]
    Deadlock {
        /// Collection whose lock was requested.
        collection: CollectionId,
    },

    /// Disk or memory ran out while writing.
    #[error("resource exhausted: {message}")]
    ResourceExhausted {
        /// Description of the exhausted resource.
        message: String,
    },

    /// Persisted data is damaged.
    #[error("corrupt data: {message}")]
    CorruptData {
        /// Description of the damage.
        message: String,
    },

    /// A marker checksum did not match its content.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the marker.
        expected: u32,
        /// Checksum computed over the marker.
        actual: u32,
    },

    /// An engine invariant was violated.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },

    /// An argument or request was not acceptable.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// A document key does not follow the key rules.
    #[error("invalid document key: '{key}'")]
    InvalidDocumentKey {
        /// The rejected key.
        key: String,
    },

    /// Collection not found.
    #[error("collection not found: {name}")]
    CollectionNotFound {
        /// Name of the collection.
        name: String,
    },

    /// A collection with this name already exists.
    #[error("collection already exists: {name}")]
    CollectionExists {
        /// Name of the collection.
        name: String,
    },

    /// Index not found.
    #[error("index not found: {name}")]
    IndexNotFound {
        /// Name or id of the index.
        name: String,
    },

    /// Database is already open in another process.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// The transaction was already committed or aborted.
    #[error("transaction is no longer active")]
    TransactionInactive,
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        if err.is_full() {
            Self::ResourceExhausted {
                message: err.to_string(),
            }
        } else {
            Self::Storage(err)
        }
    }
}

impl CoreError {
    /// Creates a not-found error for `key`.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::DocumentNotFound { key: key.into() }
    }

    /// Creates a resource exhausted error.
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            message: message.into(),
        }
    }

    /// Creates a corrupt data error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptData {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns true if repeating the operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::LockTimeout { .. } | Self::Deadlock { .. }
        )
    }

    /// Returns true if the error reports damaged persisted data.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::CorruptData { .. } | Self::ChecksumMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_storage_becomes_resource_exhausted() {
        let err: CoreError = StorageError::Full {
            requested: 100,
            available: 0,
        }
        .into();
        assert!(matches!(err, CoreError::ResourceExhausted { .. }));

        let err: CoreError = StorageError::NotFound { name: "x".into() }.into();
        assert!(matches!(err, CoreError::Storage(_)));
    }

    #[test]
    fn retryable_classification() {
        let conflict = CoreError::Conflict {
            key: "a".into(),
            expected: RevisionId::new(1),
            actual: RevisionId::new(2),
        };
        assert!(conflict.is_retryable());
        assert!(CoreError::Deadlock {
            collection: CollectionId::new(1)
        }
        .is_retryable());
        assert!(!CoreError::not_found("a").is_retryable());
        assert!(!CoreError::internal("boom").is_retryable());
    }

    #[test]
    fn corruption_classification() {
        assert!(CoreError::corrupt("bad").is_corruption());
        assert!(CoreError::ChecksumMismatch {
            expected: 1,
            actual: 2
        }
        .is_corruption());
        assert!(!CoreError::DatabaseClosed.is_corruption());
    }
}
