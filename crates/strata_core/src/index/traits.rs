//! The contract between a collection and its secondary indexes.

use crate::document::Document;
use crate::error::CoreResult;
use crate::types::{IndexId, RevisionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use strata_codec::Value;

/// Persisted description of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Index id, unique within the collection.
    pub id: IndexId,
    /// Index name, unique within the collection.
    pub name: String,
    /// Dotted attribute paths forming the index key.
    pub fields: Vec<String>,
    /// Reject a second document with the same key.
    pub unique: bool,
    /// Skip documents whose key attributes are missing or null.
    pub sparse: bool,
    /// Registered evaluator that computes the key instead of `fields`.
    #[serde(default)]
    pub evaluator: Option<String>,
}

impl IndexDefinition {
    /// Creates a non-unique, non-sparse definition over `fields`.
    ///
    /// The id is assigned when the index is created.
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: IndexId::new(0),
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            unique: false,
            sparse: false,
            evaluator: None,
        }
    }

    /// Makes the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Makes the index sparse.
    #[must_use]
    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// Computes keys with a registered evaluator.
    #[must_use]
    pub fn evaluated_by(mut self, evaluator: impl Into<String>) -> Self {
        self.evaluator = Some(evaluator.into());
        self
    }
}

/// A secondary index maintained alongside the primary index.
///
/// The collection calls `insert` in declaration order and `remove` in
/// reverse order, always with its write lock held. Implementations must
/// tolerate removing an entry they do not hold and re-inserting an entry
/// they already hold for the same revision; rollback relies on both.
pub trait SecondaryIndex: Send + Sync + fmt::Debug {
    /// The index definition.
    fn definition(&self) -> &IndexDefinition;

    /// Indexes one document version.
    ///
    /// # Errors
    ///
    /// Returns `UniqueConstraintViolated` if a unique key is taken.
    fn insert(&self, revision: RevisionId, document: &Document) -> CoreResult<()>;

    /// Removes one document version.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be computed.
    fn remove(&self, revision: RevisionId, document: &Document) -> CoreResult<()>;

    /// Returns the revisions indexed under `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be turned into a key.
    fn lookup(&self, value: &Value) -> CoreResult<Vec<RevisionId>>;

    /// Number of indexed revisions.
    fn len(&self) -> usize;

    /// True if nothing is indexed.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    fn clear(&self);
}
