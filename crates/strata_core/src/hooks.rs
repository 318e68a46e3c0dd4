//! Contracts for collaborators that live outside the storage engine.
//!
//! - [`ValueEvaluator`]: an expression evaluator that computes derived
//!   index keys or filter results from a document snapshot
//! - [`QueryCacheInvalidator`]: a query/plan cache told about structural
//!   changes so it can drop stale entries

use crate::error::CoreResult;
use crate::types::CollectionId;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Computes a value from a document body.
///
/// Evaluators are read-only from the engine's point of view: they get a
/// snapshot of the body and return a value, nothing else.
pub trait ValueEvaluator: Send + Sync {
    /// Evaluates against `document`.
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation fails.
    fn evaluate(&self, document: &Value) -> CoreResult<Value>;
}

impl<F> ValueEvaluator for F
where
    F: Fn(&Value) -> CoreResult<Value> + Send + Sync,
{
    fn evaluate(&self, document: &Value) -> CoreResult<Value> {
        self(document)
    }
}

/// Evaluators addressable by name from persisted index definitions.
#[derive(Clone, Default)]
pub struct EvaluatorRegistry {
    entries: BTreeMap<String, Arc<dyn ValueEvaluator>>,
}

impl EvaluatorRegistry {
    /// Registers `evaluator` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, evaluator: Arc<dyn ValueEvaluator>) {
        self.entries.insert(name.into(), evaluator);
    }

    /// Looks up an evaluator.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ValueEvaluator>> {
        self.entries.get(name).cloned()
    }
}

impl fmt::Debug for EvaluatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// Receives invalidation notices for cached query plans and results.
pub trait QueryCacheInvalidator: Send + Sync {
    /// Drops everything cached for `database`.
    fn invalidate(&self, database: &str);

    /// Drops cached entries that read any of `sources`.
    fn invalidate_sources(&self, database: &str, sources: &[CollectionId]);
}

/// Shared slot through which the engine notifies the installed invalidator.
pub(crate) struct InvalidationHook {
    database: String,
    target: RwLock<Option<Arc<dyn QueryCacheInvalidator>>>,
}

impl InvalidationHook {
    pub(crate) fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            target: RwLock::new(None),
        }
    }

    pub(crate) fn install(&self, invalidator: Option<Arc<dyn QueryCacheInvalidator>>) {
        *self.target.write() = invalidator;
    }

    /// Notifies about a change touching the whole database.
    pub(crate) fn database_changed(&self) {
        if let Some(target) = self.target.read().as_ref() {
            trace!(database = %self.database, "invalidating query cache");
            target.invalidate(&self.database);
        }
    }

    /// Notifies about a change to one collection.
    pub(crate) fn collection_changed(&self, collection: CollectionId) {
        if let Some(target) = self.target.read().as_ref() {
            trace!(database = %self.database, %collection, "invalidating query cache");
            target.invalidate_sources(&self.database, &[collection]);
        }
    }
}

impl fmt::Debug for InvalidationHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationHook")
            .field("database", &self.database)
            .field("installed", &self.target.read().is_some())
            .finish()
    }
}
