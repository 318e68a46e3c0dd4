//! Hash index over document attributes.

use super::traits::{IndexDefinition, SecondaryIndex};
use crate::document::Document;
use crate::error::{CoreError, CoreResult};
use crate::hooks::ValueEvaluator;
use crate::types::RevisionId;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use strata_codec::Value;

/// Equality index keyed by one or more attributes, or by an evaluator.
///
/// A single-field index is keyed by the attribute value itself; a compound
/// index by the array of its attribute values. Missing attributes count as
/// `null`, and sparse indexes skip documents whose key would contain one.
pub struct HashIndex {
    definition: IndexDefinition,
    evaluator: Option<Arc<dyn ValueEvaluator>>,
    entries: RwLock<HashMap<String, BTreeSet<RevisionId>>>,
}

impl HashIndex {
    /// Creates an empty index.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the definition has neither fields nor
    /// an evaluator, or names an evaluator that was not supplied.
    pub fn new(
        definition: IndexDefinition,
        evaluator: Option<Arc<dyn ValueEvaluator>>,
    ) -> CoreResult<Self> {
        if definition.evaluator.is_some() && evaluator.is_none() {
            return Err(CoreError::invalid_argument(format!(
                "index '{}' needs evaluator '{}'",
                definition.name,
                definition.evaluator.as_deref().unwrap_or_default()
            )));
        }
        if definition.evaluator.is_none() && definition.fields.is_empty() {
            return Err(CoreError::invalid_argument(format!(
                "index '{}' has no fields",
                definition.name
            )));
        }
        Ok(Self {
            definition,
            evaluator,
            entries: RwLock::new(HashMap::new()),
        })
    }

    /// Computes the key of `document`, or `None` if a sparse index skips it.
    fn key_of(&self, document: &Document) -> CoreResult<Option<String>> {
        let value = match &self.evaluator {
            Some(evaluator) => evaluator.evaluate(&document.body)?,
            None => {
                let mut values: Vec<Value> = self
                    .definition
                    .fields
                    .iter()
                    .map(|field| document.get(field).cloned().unwrap_or(Value::Null))
                    .collect();
                if self.definition.sparse && values.iter().any(Value::is_null) {
                    return Ok(None);
                }
                if values.len() == 1 {
                    values.pop().unwrap_or(Value::Null)
                } else {
                    Value::Array(values)
                }
            }
        };
        if self.definition.sparse && value.is_null() {
            return Ok(None);
        }
        canonical(&value).map(Some)
    }
}

// Object members are kept sorted by serde_json, so equal values print equally.
fn canonical(value: &Value) -> CoreResult<String> {
    serde_json::to_string(value).map_err(|e| CoreError::invalid_argument(e.to_string()))
}

impl SecondaryIndex for HashIndex {
    fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    fn insert(&self, revision: RevisionId, document: &Document) -> CoreResult<()> {
        let Some(key) = self.key_of(document)? else {
            return Ok(());
        };
        let mut entries = self.entries.write();
        let revisions = entries.entry(key).or_default();
        if self.definition.unique && !revisions.is_empty() && !revisions.contains(&revision) {
            return Err(CoreError::UniqueConstraintViolated {
                index: self.definition.name.clone(),
                key: document.key.clone(),
            });
        }
        revisions.insert(revision);
        Ok(())
    }

    fn remove(&self, revision: RevisionId, document: &Document) -> CoreResult<()> {
        let Some(key) = self.key_of(document)? else {
            return Ok(());
        };
        let mut entries = self.entries.write();
        if let Some(revisions) = entries.get_mut(&key) {
            revisions.remove(&revision);
            if revisions.is_empty() {
                entries.remove(&key);
            }
        }
        Ok(())
    }

    fn lookup(&self, value: &Value) -> CoreResult<Vec<RevisionId>> {
        let key = canonical(value)?;
        Ok(self
            .entries
            .read()
            .get(&key)
            .map(|revisions| revisions.iter().copied().collect())
            .unwrap_or_default())
    }

    fn len(&self) -> usize {
        self.entries.read().values().map(BTreeSet::len).sum()
    }

    fn clear(&self) {
        self.entries.write().clear();
    }
}

impl fmt::Debug for HashIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashIndex")
            .field("definition", &self.definition)
            .field("len", &self.len())
            .finish()
    }
}
