//! The primary (key) index.

use crate::error::{CoreError, CoreResult};
use crate::types::RevisionId;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Index name reported in primary key violations.
pub const PRIMARY_INDEX_NAME: &str = "primary";

/// Maps each live document key to its current revision.
#[derive(Debug, Default)]
pub struct PrimaryIndex {
    entries: RwLock<HashMap<String, RevisionId>>,
}

impl PrimaryIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current revision of `key`.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<RevisionId> {
        self.entries.read().get(key).copied()
    }

    /// Adds a key.
    ///
    /// # Errors
    ///
    /// Returns `UniqueConstraintViolated` if the key exists.
    pub fn insert(&self, key: &str, revision: RevisionId) -> CoreResult<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(key) {
            return Err(CoreError::UniqueConstraintViolated {
                index: PRIMARY_INDEX_NAME.to_string(),
                key: key.to_string(),
            });
        }
        entries.insert(key.to_string(), revision);
        Ok(())
    }

    /// Points an existing key at a new revision.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the key is missing.
    pub fn update_revision(&self, key: &str, revision: RevisionId) -> CoreResult<()> {
        match self.entries.write().get_mut(key) {
            Some(current) => {
                *current = revision;
                Ok(())
            }
            None => Err(CoreError::internal(format!(
                "primary index has no entry for '{key}'"
            ))),
        }
    }

    /// Sets the revision of `key`, adding it if needed.
    pub fn upsert(&self, key: &str, revision: RevisionId) {
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(current) => *current = revision,
            None => {
                entries.insert(key.to_string(), revision);
            }
        }
    }

    /// Removes a key and returns its revision.
    pub fn remove(&self, key: &str) -> Option<RevisionId> {
        self.entries.write().remove(key)
    }

    /// Snapshot of every key and revision, sorted by key.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, RevisionId)> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(key, rev)| (key.clone(), *rev))
            .collect();
        entries.sort();
        entries
    }

    /// Number of live documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if there are no live documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
