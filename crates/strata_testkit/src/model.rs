//! A reference model for checking a collection against.
//!
//! The model is a plain map from key to user attributes. Applying an
//! [`Op`] to both the model and a collection must give the same outcome,
//! and afterwards the collection must hold exactly what the model holds.

use crate::generators::Op;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_core::{Collection, CoreError, CoreResult, OperationOptions, Transaction, WriteResult};

/// How an operation is expected to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The write happened.
    Applied,
    /// The key was already taken.
    Duplicate,
    /// The key was not live.
    Missing,
}

impl Outcome {
    /// Classifies the result of running an operation on the engine.
    ///
    /// # Panics
    ///
    /// Panics on any error the model does not predict.
    pub fn of(result: &CoreResult<WriteResult>) -> Self {
        match result {
            Ok(_) => Self::Applied,
            Err(CoreError::UniqueConstraintViolated { .. }) => Self::Duplicate,
            Err(CoreError::DocumentNotFound { .. }) => Self::Missing,
            Err(other) => panic!("unexpected engine error: {other}"),
        }
    }
}

/// Expected collection contents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    documents: BTreeMap<String, Map<String, Value>>,
}

impl Model {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// True if no document is live.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Applies `op` and returns the outcome the engine must report.
    pub fn apply(&mut self, op: &Op) -> Outcome {
        let key = op.key().to_string();
        match op {
            Op::Insert { value, .. } => {
                if self.documents.contains_key(&key) {
                    return Outcome::Duplicate;
                }
                self.documents.insert(key, attributes(json!({"v": value})));
            }
            Op::Update { value, .. } => match self.documents.get_mut(&key) {
                Some(fields) => {
                    fields.insert("v".into(), json!(value));
                }
                None => return Outcome::Missing,
            },
            Op::Replace { value, .. } => match self.documents.get_mut(&key) {
                Some(fields) => *fields = attributes(json!({"w": value})),
                None => return Outcome::Missing,
            },
            Op::Remove { .. } => {
                if self.documents.remove(&key).is_none() {
                    return Outcome::Missing;
                }
            }
        }
        Outcome::Applied
    }

    /// Asserts that `collection` holds exactly the modelled documents.
    ///
    /// # Panics
    ///
    /// Panics with the first difference.
    pub fn assert_matches(&self, collection: &Collection) {
        let actual = collection
            .documents()
            .expect("Failed to read documents")
            .into_iter()
            .map(|document| {
                let mut fields = attributes(document.body);
                fields.remove("_key");
                fields.remove("_rev");
                (document.key, fields)
            })
            .collect::<BTreeMap<_, _>>();
        assert_eq!(actual, self.documents, "collection differs from the model");
        assert_eq!(collection.count(), self.documents.len());
    }
}

fn attributes(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

/// Runs `op` directly on `collection`.
pub fn run_op(collection: &Arc<Collection>, op: &Op) -> CoreResult<WriteResult> {
    let options = OperationOptions::default();
    match op {
        Op::Insert { key, value } => collection.insert(json!({"_key": key, "v": value}), options),
        Op::Update { key, value } => collection.update(key, json!({"v": value}), options),
        Op::Replace { key, value } => collection.replace(key, json!({"w": value}), options),
        Op::Remove { key } => collection.remove(key, options),
    }
}

/// Runs `op` on `collection` inside `txn`.
pub fn run_op_in(txn: &mut Transaction, collection: &Arc<Collection>, op: &Op) -> CoreResult<WriteResult> {
    let options = OperationOptions::default();
    match op {
        Op::Insert { key, value } => txn.insert(collection, json!({"_key": key, "v": value}), options),
        Op::Update { key, value } => txn.update(collection, key, json!({"v": value}), options),
        Op::Replace { key, value } => txn.replace(collection, key, json!({"w": value}), options),
        Op::Remove { key } => txn.remove(collection, key, options),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{small_properties, TestDatabase};

    #[test]
    fn model_tracks_a_short_history() {
        let db = TestDatabase::memory();
        let docs = db.create_collection("docs", small_properties()).unwrap();
        let mut model = Model::new();
        let ops = [
            Op::Insert { key: "k1".into(), value: 1 },
            Op::Insert { key: "k1".into(), value: 2 },
            Op::Update { key: "k1".into(), value: 3 },
            Op::Update { key: "k2".into(), value: 3 },
            Op::Replace { key: "k1".into(), value: 4 },
            Op::Remove { key: "k2".into() },
        ];
        for op in &ops {
            let expected = model.apply(op);
            assert_eq!(Outcome::of(&run_op(&docs, op)), expected, "{op:?}");
        }
        model.assert_matches(&docs);
        assert_eq!(model.len(), 1);
    }
}
