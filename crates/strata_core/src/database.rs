//! The database handle.

use crate::collection::{Collection, CollectionContext, CollectionProperties};
use crate::compactor::{compact_collection, CompactionReport, CompactorThread};
use crate::config::Config;
use crate::dir::DatabaseDir;
use crate::error::{CoreError, CoreResult};
use crate::hooks::{InvalidationHook, QueryCacheInvalidator};
use crate::index::IndexDefinition;
use crate::lock::LockCoordinator;
use crate::manifest::{CollectionEntry, Manifest};
use crate::stats::{DatabaseStats, StatsSnapshot};
use crate::transaction::{Transaction, TransactionManager};
use crate::types::TickGenerator;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use strata_storage::{MemoryStore, SegmentStore};
use tracing::{debug, info, warn};

type CollectionMap = Arc<RwLock<BTreeMap<String, Arc<Collection>>>>;

/// The main database handle.
///
/// A database is a directory with a MANIFEST and one segment directory per
/// collection. Opening it replays every collection; closing it syncs the
/// journals and records the tick high-water mark.
///
/// ```rust,ignore
/// use strata_core::{CollectionProperties, Config, Database, OperationOptions};
/// use serde_json::json;
///
/// let db = Database::open(Path::new("my_database"), Config::default())?;
/// let users = db.create_collection("users", CollectionProperties::default())?;
/// users.insert(json!({"_key": "alice", "age": 31}), OperationOptions::default())?;
/// db.close()?;
/// ```
///
/// For tests, [`Database::open_in_memory`] keeps every segment in memory.
pub struct Database {
    config: Config,
    /// None for in-memory databases.
    dir: Option<DatabaseDir>,
    manifest: Mutex<Manifest>,
    collections: CollectionMap,
    context: CollectionContext,
    transactions: Arc<TransactionManager>,
    compactor: Mutex<Option<CompactorThread>>,
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens the database at `path`.
    ///
    /// The method:
    /// - creates the directory if missing (unless `create_if_missing` is false)
    /// - takes the exclusive LOCK
    /// - loads the manifest and removes collection directories it does not list
    /// - opens and replays every collection
    /// - starts the compactor if `compaction.enabled` is set
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - another process has the database locked (`DatabaseLocked`)
    /// - the database exists and `error_if_exists` is set
    /// - the manifest or a segment is corrupt (unless `ignore_errors` is set)
    /// - I/O errors occur
    pub fn open(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = DatabaseDir::open(path, config.create_if_missing)?;
        if config.error_if_exists && !dir.is_new_database() {
            return Err(CoreError::invalid_argument(format!(
                "database already exists: {}",
                path.display()
            )));
        }

        let created = dir.is_new_database();
        let manifest = dir.load_manifest()?.unwrap_or_default();
        let known = manifest
            .collections
            .iter()
            .filter(|entry| !entry.properties.is_volatile)
            .map(|entry| entry.id)
            .collect::<BTreeSet<_>>();
        let orphans = dir.remove_orphans(&known)?;
        if orphans > 0 {
            info!(orphans, "removed collection directories missing from the manifest");
        }

        let database = Self::assemble(config, Some(dir), manifest, path.display().to_string())?;
        if created {
            database.persist(&database.manifest.lock())?;
        }
        info!(
            path = %path.display(),
            collections = database.collections.read().len(),
            "database opened"
        );
        database.autostart()?;
        Ok(database)
    }

    /// Opens a database that lives in memory only.
    ///
    /// Everything is lost when the handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the compactor thread cannot be started.
    pub fn open_in_memory(config: Config) -> CoreResult<Self> {
        let database = Self::assemble(config, None, Manifest::new(), ":memory:".into())?;
        database.autostart()?;
        Ok(database)
    }

    fn assemble(
        config: Config,
        dir: Option<DatabaseDir>,
        manifest: Manifest,
        name: String,
    ) -> CoreResult<Self> {
        let context = CollectionContext {
            ticks: Arc::new(TickGenerator::new(manifest.last_tick)),
            stats: Arc::new(DatabaseStats::new()),
            coordinator: Arc::new(LockCoordinator::new()),
            hook: Arc::new(InvalidationHook::new(name)),
            evaluators: config.evaluators.clone(),
            lock_timeout: config.lock_timeout,
            wait_for_sync: config.wait_for_sync,
        };

        let mut collections = BTreeMap::new();
        for entry in &manifest.collections {
            let store = Self::store_for(dir.as_ref(), entry)?;
            let collection = Collection::open(
                entry.id,
                entry.name.clone(),
                entry.properties.clone(),
                store,
                context.clone(),
                entry.indexes.clone(),
                config.ignore_errors,
            )?;
            collections.insert(entry.name.clone(), collection);
        }

        Ok(Self {
            config,
            dir,
            manifest: Mutex::new(manifest),
            collections: Arc::new(RwLock::new(collections)),
            context,
            transactions: Arc::new(TransactionManager::new()),
            compactor: Mutex::new(None),
            is_open: RwLock::new(true),
        })
    }

    fn store_for(dir: Option<&DatabaseDir>, entry: &CollectionEntry) -> CoreResult<Arc<dyn SegmentStore>> {
        match dir {
            Some(dir) if !entry.properties.is_volatile => Ok(Arc::new(dir.collection_store(entry.id)?)),
            _ => Ok(Arc::new(MemoryStore::new())),
        }
    }

    fn autostart(&self) -> CoreResult<()> {
        if self.config.compaction.enabled {
            self.start_compactor()?;
        }
        Ok(())
    }

    /// Writes the manifest, stamped with the current tick.
    fn persist(&self, manifest: &Manifest) -> CoreResult<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let mut stamped = manifest.clone();
        stamped.last_tick = self.context.ticks.current();
        dir.save_manifest(&stamped)
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    /// Properties seeded from the database configuration.
    #[must_use]
    pub fn default_properties(&self) -> CollectionProperties {
        CollectionProperties::new()
            .journal_size(self.config.journal_size)
            .wait_for_sync(self.config.wait_for_sync)
    }

    // ========================================================================
    // Collections
    // ========================================================================

    /// Creates a collection.
    ///
    /// # Errors
    ///
    /// Returns `CollectionExists` if the name is taken, `InvalidArgument`
    /// for an empty name, or the error of writing the manifest.
    pub fn create_collection(
        &self,
        name: &str,
        properties: CollectionProperties,
    ) -> CoreResult<Arc<Collection>> {
        self.ensure_open()?;
        if name.is_empty() {
            return Err(CoreError::invalid_argument("collection name is empty"));
        }

        let mut manifest = self.manifest.lock();
        let mut updated = manifest.clone();
        let entry = updated.add_collection(name, properties.normalized())?.clone();

        let store = Self::store_for(self.dir.as_ref(), &entry)?;
        let collection = Collection::open(
            entry.id,
            entry.name.clone(),
            entry.properties.clone(),
            store,
            self.context.clone(),
            Vec::new(),
            false,
        )?;
        self.persist(&updated)?;
        *manifest = updated;
        self.collections
            .write()
            .insert(name.to_string(), Arc::clone(&collection));
        drop(manifest);

        debug!(collection = name, id = %entry.id, "collection created");
        self.context.hook.database_changed();
        Ok(collection)
    }

    /// Drops a collection.
    ///
    /// Waits for a running compaction and for the collection's write lock,
    /// then detaches every segment. Files still read by someone are removed
    /// when the last reader lets go.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` for an unknown name, or the error of
    /// writing the manifest (the collection is then kept).
    pub fn drop_collection(&self, name: &str) -> CoreResult<()> {
        self.ensure_open()?;
        let mut manifest = self.manifest.lock();
        let collection = self.collection(name)?;

        let compaction = collection.prevent_compaction();
        let guard = collection.lock_write(Duration::ZERO)?;

        let mut updated = manifest.clone();
        updated.remove_collection(name);
        self.persist(&updated)?;
        *manifest = updated;
        self.collections.write().remove(name);

        collection.mark_dropped();
        drop(guard);
        drop(compaction);
        let id = collection.id();
        drop(collection);
        if let Some(dir) = &self.dir {
            dir.release_collection(id);
        }
        drop(manifest);

        info!(collection = name, %id, "collection dropped");
        self.context.hook.database_changed();
        Ok(())
    }

    /// Looks up a collection.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` for an unknown name.
    pub fn collection(&self, name: &str) -> CoreResult<Arc<Collection>> {
        self.ensure_open()?;
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::CollectionNotFound {
                name: name.to_string(),
            })
    }

    /// All collections, ordered by name.
    #[must_use]
    pub fn collections(&self) -> Vec<Arc<Collection>> {
        self.collections.read().values().cloned().collect()
    }

    /// Changes a collection's properties.
    ///
    /// A new journal size applies to the next journal. Sizes below the
    /// minimum are raised to it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `is_volatile` would change, since the
    /// existing segments live in one kind of store.
    pub fn update_properties(&self, name: &str, properties: CollectionProperties) -> CoreResult<()> {
        self.ensure_open()?;
        let mut manifest = self.manifest.lock();
        let collection = self.collection(name)?;
        if collection.properties().is_volatile != properties.is_volatile {
            return Err(CoreError::invalid_argument(
                "is_volatile cannot change after creation",
            ));
        }

        let properties = properties.normalized();
        let mut updated = manifest.clone();
        if let Some(entry) = updated.collection_mut(name) {
            entry.properties = properties.clone();
        }
        self.persist(&updated)?;
        *manifest = updated;
        drop(manifest);

        collection.set_properties(properties);
        debug!(collection = name, "properties updated");
        self.context.hook.collection_changed(collection.id());
        Ok(())
    }

    // ========================================================================
    // Indexes
    // ========================================================================

    /// Creates a secondary index and fills it from the live documents.
    ///
    /// Returns the definition with its assigned id.
    ///
    /// # Errors
    ///
    /// Returns `UniqueConstraintViolated` if a unique index finds
    /// duplicates, `InvalidArgument` for a duplicate name or an unknown
    /// evaluator. Nothing is registered on error.
    pub fn create_index(&self, collection: &str, definition: IndexDefinition) -> CoreResult<IndexDefinition> {
        self.ensure_open()?;
        let mut manifest = self.manifest.lock();
        let target = self.collection(collection)?;

        let mut updated = manifest.clone();
        let entry = updated
            .collection_mut(collection)
            .ok_or_else(|| CoreError::CollectionNotFound {
                name: collection.to_string(),
            })?;
        let definition = entry.assign_index_id(definition);
        entry.indexes.push(definition.clone());

        target.add_index(definition.clone())?;
        if let Err(err) = self.persist(&updated) {
            if let Err(undo) = target.remove_index(&definition.name) {
                warn!(collection, index = %definition.name, error = %undo, "cannot undo index creation");
            }
            return Err(err);
        }
        *manifest = updated;
        drop(manifest);

        debug!(collection, index = %definition.name, "index created");
        self.context.hook.collection_changed(target.id());
        Ok(definition)
    }

    /// Drops a secondary index.
    ///
    /// # Errors
    ///
    /// Returns `IndexNotFound` for an unknown index.
    pub fn drop_index(&self, collection: &str, index: &str) -> CoreResult<()> {
        self.ensure_open()?;
        let mut manifest = self.manifest.lock();
        let target = self.collection(collection)?;

        let mut updated = manifest.clone();
        if let Some(entry) = updated.collection_mut(collection) {
            entry.indexes.retain(|definition| definition.name != index);
        }
        let removed = target.remove_index(index)?;
        if let Err(err) = self.persist(&updated) {
            let name = removed.name.clone();
            if let Err(undo) = target.add_index(removed) {
                warn!(collection, index = %name, error = %undo, "cannot restore dropped index");
            }
            return Err(err);
        }
        *manifest = updated;
        drop(manifest);

        debug!(collection, index, "index dropped");
        self.context.hook.collection_changed(target.id());
        Ok(())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` after [`Database::close`].
    pub fn begin(&self) -> CoreResult<Transaction> {
        self.ensure_open()?;
        Ok(Transaction::new(
            Arc::clone(&self.transactions),
            Arc::clone(&self.context.coordinator),
            Arc::clone(&self.context.stats),
            self.config.lock_timeout,
        ))
    }

    /// Runs `f` in a transaction, committing on `Ok` and aborting on `Err`.
    ///
    /// # Errors
    ///
    /// Returns the error of `f` or of the commit.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction) -> CoreResult<T>,
    {
        let mut txn = self.begin()?;
        match f(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                txn.abort()?;
                Err(err)
            }
        }
    }

    /// Number of running transactions.
    #[must_use]
    pub fn active_transactions(&self) -> usize {
        self.transactions.active_count()
    }

    // ========================================================================
    // Compaction
    // ========================================================================

    /// Runs one compaction pass over every collection, ignoring the
    /// per-collection interval.
    ///
    /// Busy collections are skipped. A failing collection is logged and
    /// the pass goes on; its error is returned at the end.
    ///
    /// # Errors
    ///
    /// Returns the first compaction error.
    pub fn compact_now(&self) -> CoreResult<Vec<CompactionReport>> {
        self.ensure_open()?;
        let mut reports = Vec::new();
        let mut first_error = None;
        for collection in self.collections() {
            match compact_collection(&collection, &self.config.compaction, true) {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(err) => {
                    warn!(collection = %collection.name(), error = %err, "compaction failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(reports),
        }
    }

    /// Starts the background compactor; a no-op if it runs already.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start_compactor(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let mut compactor = self.compactor.lock();
        if compactor.is_none() {
            let collections = Arc::clone(&self.collections);
            *compactor = Some(CompactorThread::spawn(
                self.config.compaction.clone(),
                move || collections.read().values().cloned().collect(),
            )?);
        }
        Ok(())
    }

    /// Stops the background compactor and waits for it.
    pub fn stop_compactor(&self) {
        if let Some(compactor) = self.compactor.lock().take() {
            compactor.stop();
        }
    }

    /// True while the background compactor runs.
    #[must_use]
    pub fn compactor_running(&self) -> bool {
        self.compactor.lock().is_some()
    }

    // ========================================================================
    // Hooks and statistics
    // ========================================================================

    /// Installs (or with `None` removes) the query-cache invalidator.
    pub fn set_query_cache_invalidator(&self, invalidator: Option<Arc<dyn QueryCacheInvalidator>>) {
        self.context.hook.install(invalidator);
    }

    /// A snapshot of the operation counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.context.stats.snapshot()
    }

    /// Database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The database directory; `None` in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(DatabaseDir::path)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Closes the database.
    ///
    /// Stops the compactor, syncs every journal and writes the manifest.
    /// Later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns the first sync or manifest error; the database is closed
    /// regardless.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        *is_open = false;
        drop(is_open);

        self.stop_compactor();
        let mut result = Ok(());
        for collection in self.collections() {
            if let Err(err) = collection.sync() {
                warn!(collection = %collection.name(), error = %err, "sync on close failed");
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        let manifest = self.manifest.lock();
        result.and_then(|()| self.persist(&manifest))?;
        info!("database closed");
        Ok(())
    }

    /// True until [`Database::close`].
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path())
            .field("is_open", &self.is_open())
            .field("collections", &self.collections.read().len())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "closing database on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompactionConfig;
    use crate::config::MIN_JOURNAL_SIZE;
    use crate::document::OperationOptions;
    use crate::types::CollectionId;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn small() -> CollectionProperties {
        CollectionProperties::new().journal_size(MIN_JOURNAL_SIZE)
    }

    #[test]
    fn open_in_memory() {
        let db = Database::open_in_memory(Config::default()).unwrap();
        assert!(db.is_open());
        assert!(db.path().is_none());

        let users = db.create_collection("users", small()).unwrap();
        users
            .insert(json!({"_key": "a", "n": 1}), OperationOptions::default())
            .unwrap();
        assert_eq!(db.collection("users").unwrap().count(), 1);
        assert_eq!(db.stats().inserts, 1);
    }

    #[test]
    fn documents_and_indexes_survive_reopen() {
        let temp = tempdir().unwrap();
        {
            let db = Database::open(temp.path(), Config::default()).unwrap();
            let users = db.create_collection("users", small()).unwrap();
            db.create_index("users", IndexDefinition::new("by_email", ["email"]).unique())
                .unwrap();
            users
                .insert(json!({"_key": "a", "email": "a@x"}), OperationOptions::default())
                .unwrap();
            users
                .insert(json!({"_key": "b", "email": "b@x"}), OperationOptions::default())
                .unwrap();
            users.remove("b", OperationOptions::default()).unwrap();
            db.close().unwrap();
        }

        let db = Database::open(temp.path(), Config::default()).unwrap();
        let users = db.collection("users").unwrap();
        assert_eq!(users.count(), 1);
        assert_eq!(users.index_definitions()[0].name, "by_email");
        let found = users.lookup_by_index("by_email", &json!("a@x")).unwrap();
        assert_eq!(found[0].key, "a");
        let err = users
            .insert(json!({"email": "a@x"}), OperationOptions::default())
            .unwrap_err();
        assert!(matches!(err, CoreError::UniqueConstraintViolated { .. }));
    }

    #[test]
    fn ticks_never_go_back_across_reopen() {
        let temp = tempdir().unwrap();
        let last = {
            let db = Database::open(temp.path(), Config::default()).unwrap();
            let docs = db.create_collection("docs", small()).unwrap();
            let written = docs.insert(json!({}), OperationOptions::default()).unwrap();
            docs.truncate(OperationOptions::default()).unwrap();
            written.revision
        };

        let db = Database::open(temp.path(), Config::default()).unwrap();
        let docs = db.collection("docs").unwrap();
        let next = docs.insert(json!({}), OperationOptions::default()).unwrap();
        assert!(next.revision > last);
    }

    #[test]
    fn second_open_is_locked_out() {
        let temp = tempdir().unwrap();
        let _db = Database::open(temp.path(), Config::default()).unwrap();
        let result = Database::open(temp.path(), Config::default());
        assert!(matches!(result, Err(CoreError::DatabaseLocked)));
    }

    #[test]
    fn error_if_exists_rejects_existing_database() {
        let temp = tempdir().unwrap();
        drop(Database::open(temp.path(), Config::default()).unwrap());
        let result = Database::open(temp.path(), Config::default().error_if_exists(true));
        assert!(matches!(result, Err(CoreError::InvalidArgument { .. })));
    }

    #[test]
    fn collection_names_are_unique() {
        let db = Database::open_in_memory(Config::default()).unwrap();
        db.create_collection("docs", small()).unwrap();
        assert!(matches!(
            db.create_collection("docs", small()),
            Err(CoreError::CollectionExists { .. })
        ));
        assert!(db.create_collection("", small()).is_err());
        assert!(matches!(
            db.collection("missing"),
            Err(CoreError::CollectionNotFound { .. })
        ));
    }

    #[test]
    fn dropped_collection_leaves_no_files() {
        let temp = tempdir().unwrap();
        let db = Database::open(temp.path(), Config::default()).unwrap();
        let docs = db.create_collection("docs", small()).unwrap();
        docs.insert(json!({"_key": "a"}), OperationOptions::default())
            .unwrap();
        let path = temp.path().join(format!("collection-{}", docs.id().as_u64()));
        assert!(path.exists());
        drop(docs);

        db.drop_collection("docs").unwrap();
        assert!(!path.exists());
        assert!(db.collection("docs").is_err());
        assert!(db.collections().is_empty());

        drop(db);
        let db = Database::open(temp.path(), Config::default()).unwrap();
        assert!(db.collections().is_empty());
    }

    #[test]
    fn handles_to_dropped_collections_refuse_work() {
        let db = Database::open_in_memory(Config::default()).unwrap();
        let docs = db.create_collection("docs", small()).unwrap();
        db.drop_collection("docs").unwrap();
        assert!(docs.is_dropped());
        assert!(docs.insert(json!({}), OperationOptions::default()).is_err());
    }

    #[test]
    fn orphaned_directories_are_removed_on_open() {
        let temp = tempdir().unwrap();
        drop(Database::open(temp.path(), Config::default()).unwrap());
        let orphan = temp.path().join("collection-42");
        std::fs::create_dir(&orphan).unwrap();

        let _db = Database::open(temp.path(), Config::default()).unwrap();
        assert!(!orphan.exists());
    }

    #[test]
    fn volatile_collections_come_back_empty() {
        let temp = tempdir().unwrap();
        {
            let db = Database::open(temp.path(), Config::default()).unwrap();
            let cache = db
                .create_collection("cache", small().is_volatile(true))
                .unwrap();
            cache.insert(json!({"_key": "a"}), OperationOptions::default()).unwrap();
            assert!(!temp.path().join(format!("collection-{}", cache.id().as_u64())).exists());
        }

        let db = Database::open(temp.path(), Config::default()).unwrap();
        let cache = db.collection("cache").unwrap();
        assert!(cache.properties().is_volatile);
        assert_eq!(cache.count(), 0);
    }

    #[test]
    fn properties_are_persisted() {
        let temp = tempdir().unwrap();
        {
            let db = Database::open(temp.path(), Config::default()).unwrap();
            db.create_collection("docs", small()).unwrap();
            db.update_properties("docs", small().do_compact(false).wait_for_sync(true))
                .unwrap();
            assert!(matches!(
                db.update_properties("docs", small().is_volatile(true)),
                Err(CoreError::InvalidArgument { .. })
            ));
        }

        let db = Database::open(temp.path(), Config::default()).unwrap();
        let properties = db.collection("docs").unwrap().properties();
        assert!(!properties.do_compact);
        assert!(properties.wait_for_sync);
    }

    #[test]
    fn journal_size_below_the_minimum_is_raised() {
        let db = Database::open_in_memory(Config::default()).unwrap();
        let mut properties = small();
        properties.journal_size = 0;
        let docs = db.create_collection("docs", properties.clone()).unwrap();
        assert_eq!(docs.properties().journal_size, MIN_JOURNAL_SIZE);

        docs.insert(json!({"_key": "a"}), OperationOptions::default()).unwrap();
        db.update_properties("docs", properties).unwrap();
        assert_eq!(docs.properties().journal_size, MIN_JOURNAL_SIZE);
        docs.rotate_journal().unwrap();
        docs.insert(json!({"_key": "b"}), OperationOptions::default()).unwrap();
        assert_eq!(docs.count(), 2);
    }

    #[test]
    fn failed_index_creation_registers_nothing() {
        let db = Database::open_in_memory(Config::default()).unwrap();
        let docs = db.create_collection("docs", small()).unwrap();
        docs.insert(json!({"v": 1}), OperationOptions::default()).unwrap();
        docs.insert(json!({"v": 1}), OperationOptions::default()).unwrap();

        let result = db.create_index("docs", IndexDefinition::new("by_v", ["v"]).unique());
        assert!(matches!(result, Err(CoreError::UniqueConstraintViolated { .. })));
        assert!(docs.index_definitions().is_empty());

        let created = db.create_index("docs", IndexDefinition::new("by_v", ["v"])).unwrap();
        assert_eq!(created.id.as_u64(), 1);
        db.drop_index("docs", "by_v").unwrap();
        assert!(matches!(
            db.drop_index("docs", "by_v"),
            Err(CoreError::IndexNotFound { .. })
        ));
    }

    #[derive(Default)]
    struct CountingInvalidator {
        whole: AtomicUsize,
        sources: AtomicUsize,
    }

    impl QueryCacheInvalidator for CountingInvalidator {
        fn invalidate(&self, _database: &str) {
            self.whole.fetch_add(1, Ordering::SeqCst);
        }

        fn invalidate_sources(&self, _database: &str, _sources: &[CollectionId]) {
            self.sources.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn catalogue_changes_invalidate_the_query_cache() {
        let db = Database::open_in_memory(Config::default()).unwrap();
        let counter = Arc::new(CountingInvalidator::default());
        db.set_query_cache_invalidator(Some(counter.clone()));

        let docs = db.create_collection("docs", small()).unwrap();
        db.create_index("docs", IndexDefinition::new("by_v", ["v"])).unwrap();
        assert_eq!(counter.sources.load(Ordering::SeqCst), 1);
        db.drop_index("docs", "by_v").unwrap();
        assert_eq!(counter.sources.load(Ordering::SeqCst), 2);

        docs.insert(json!({"_key": "a"}), OperationOptions::default()).unwrap();
        docs.truncate(OperationOptions::default()).unwrap();
        assert_eq!(counter.sources.load(Ordering::SeqCst), 3);
        db.update_properties("docs", small().wait_for_sync(true)).unwrap();
        assert_eq!(counter.sources.load(Ordering::SeqCst), 4);
        drop(docs);

        db.drop_collection("docs").unwrap();
        assert_eq!(counter.whole.load(Ordering::SeqCst), 2);
        assert_eq!(counter.sources.load(Ordering::SeqCst), 4);

        db.set_query_cache_invalidator(None);
        db.create_collection("other", small()).unwrap();
        assert_eq!(counter.whole.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn transaction_helper_commits_or_aborts() {
        let db = Database::open_in_memory(Config::default()).unwrap();
        let docs = db.create_collection("docs", small()).unwrap();

        db.transaction(|txn| txn.insert(&docs, json!({"_key": "a"}), OperationOptions::default()))
            .unwrap();
        let result: CoreResult<()> = db.transaction(|txn| {
            txn.insert(&docs, json!({"_key": "b"}), OperationOptions::default())?;
            Err(CoreError::invalid_argument("changed my mind"))
        });
        assert!(result.is_err());

        assert_eq!(docs.count(), 1);
        assert!(docs.read("a").is_ok());
        assert_eq!(db.active_transactions(), 0);
        assert_eq!(db.stats().transactions_committed, 1);
        assert_eq!(db.stats().transactions_aborted, 1);
    }

    #[test]
    fn compact_now_reports_reclaimed_space() {
        let config = Config::default().compaction(
            CompactionConfig::default()
                .small_datafile_size(0)
                .dead_number_threshold(1),
        );
        let db = Database::open_in_memory(config).unwrap();
        let docs = db.create_collection("docs", small()).unwrap();
        for i in 0..10 {
            docs.insert(json!({"_key": format!("k{i}"), "pad": "x".repeat(200)}), OperationOptions::default())
                .unwrap();
        }
        for i in 0..10 {
            docs.update(&format!("k{i}"), json!({"pad": "y".repeat(200)}), OperationOptions::default())
                .unwrap();
        }
        for i in 0..10 {
            docs.update(&format!("k{i}"), json!({"pad": "z".repeat(200)}), OperationOptions::default())
                .unwrap();
        }

        let reports = db.compact_now().unwrap();
        assert!(!reports.is_empty());
        assert!(reports.iter().all(|report| report.collection == "docs"));
        assert!(db.stats().compaction_runs >= 1);
        for i in 0..10 {
            assert_eq!(docs.read(&format!("k{i}")).unwrap().body["pad"], json!("z".repeat(200)));
        }
    }

    #[test]
    fn compactor_follows_the_config() {
        let config = Config::default().compaction(
            CompactionConfig::default()
                .enabled(true)
                .sleep_time(Duration::from_millis(10)),
        );
        let db = Database::open_in_memory(config).unwrap();
        assert!(db.compactor_running());
        db.stop_compactor();
        assert!(!db.compactor_running());
        db.start_compactor().unwrap();
        db.start_compactor().unwrap();
        assert!(db.compactor_running());
        db.close().unwrap();
        assert!(!db.compactor_running());
    }

    #[test]
    fn closed_database_refuses_work() {
        let db = Database::open_in_memory(Config::default()).unwrap();
        db.close().unwrap();
        db.close().unwrap();
        assert!(!db.is_open());
        assert!(matches!(db.begin(), Err(CoreError::DatabaseClosed)));
        assert!(matches!(
            db.create_collection("docs", small()),
            Err(CoreError::DatabaseClosed)
        ));
    }
}
