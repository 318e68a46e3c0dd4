//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use std::path::{Path, PathBuf};
use std::time::Duration;
use strata_core::{CollectionProperties, CompactionConfig, Config, Database};
use tempfile::TempDir;

/// Smallest journal size the engine accepts; makes rotation easy to reach.
pub const SMALL_JOURNAL: u32 = 4096;

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance; `None` only between close and reopen.
    db: Option<Database>,
    config: Config,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self::memory_with(test_config())
    }

    /// Creates an in-memory test database with `config`.
    pub fn memory_with(config: Config) -> Self {
        let db = Database::open_in_memory(config.clone()).expect("Failed to open in-memory database");
        Self {
            db: Some(db),
            config,
            temp_dir: None,
        }
    }

    /// Creates a new directory-backed test database.
    pub fn file() -> Self {
        Self::file_with(test_config())
    }

    /// Creates a directory-backed test database with `config`.
    pub fn file_with(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(temp_dir.path(), config.clone()).expect("Failed to open file database");
        Self {
            db: Some(db),
            config,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database path if directory-backed, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }

    /// Closes the database cleanly and opens it again.
    pub fn reopen(&mut self) {
        let path = self.path().expect("Only directory-backed databases can be reopened");
        if let Some(db) = self.db.take() {
            db.close().expect("Failed to close database");
        }
        self.db = Some(Database::open(&path, self.config.clone()).expect("Failed to reopen database"));
    }

    /// Drops the handle, runs `damage` on the directory (a torn write, a
    /// flipped byte, a leftover file) and opens the database again.
    pub fn damage_and_reopen(&mut self, damage: impl FnOnce(&Path)) -> strata_core::CoreResult<()> {
        let path = self.path().expect("Only directory-backed databases can be damaged");
        let db = self.db.take();
        drop(db);
        damage(&path);
        self.db = Some(Database::open(&path, self.config.clone())?);
        Ok(())
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        self.db.as_ref().expect("Database is not open")
    }
}

/// Configuration used by the fixtures: a short lock timeout and no
/// background compactor.
pub fn test_config() -> Config {
    Config::default()
        .journal_size(SMALL_JOURNAL)
        .lock_timeout(Duration::from_millis(500))
}

/// Collection properties with the smallest journal.
pub fn small_properties() -> CollectionProperties {
    CollectionProperties::new().journal_size(SMALL_JOURNAL)
}

/// Compaction settings that consider every sealed segment right away.
pub fn eager_compaction() -> CompactionConfig {
    CompactionConfig::default()
        .small_datafile_size(0)
        .dead_number_threshold(1)
        .collection_interval(Duration::ZERO)
        .sleep_time(Duration::from_millis(20))
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust,ignore
/// use strata_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         let docs = db.create_collection("docs", small_properties()).unwrap();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db)
}

/// Runs a test with a temporary directory-backed database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db.path().expect("File database should have a path");
    f(&test_db, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use strata_core::{Collection, OperationOptions};

    /// Key of the `i`-th document written by [`populate`].
    pub fn key(i: usize) -> String {
        format!("doc{i:05}")
    }

    /// Inserts `count` documents `{_key, n, pad}` with `pad` bytes of padding.
    pub fn populate(collection: &Arc<Collection>, count: usize, pad: usize) {
        for i in 0..count {
            collection
                .insert(
                    json!({"_key": key(i), "n": i, "pad": "x".repeat(pad)}),
                    OperationOptions::default(),
                )
                .expect("Failed to insert document");
        }
    }

    /// Creates `docs` in a fresh in-memory database and fills it.
    pub fn populated_database(count: usize) -> TestDatabase {
        let db = TestDatabase::memory();
        let docs = db
            .create_collection("docs", small_properties())
            .expect("Failed to create collection");
        populate(&docs, count, 64);
        db
    }

    /// Updates every document written by [`populate`] `rounds` times,
    /// leaving `rounds` dead versions per document behind.
    pub fn churn(collection: &Arc<Collection>, count: usize, rounds: usize) {
        for round in 0..rounds {
            for i in 0..count {
                collection
                    .update(&key(i), json!({"round": round}), OperationOptions::default())
                    .expect("Failed to update document");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_db_works() {
        let db = scenarios::populated_database(10);
        assert_eq!(db.collection("docs").unwrap().count(), 10);
        assert!(db.path().is_none());
    }

    #[test]
    fn file_db_reopens() {
        let mut db = TestDatabase::file();
        let docs = db.create_collection("docs", small_properties()).unwrap();
        scenarios::populate(&docs, 5, 8);
        drop(docs);

        db.reopen();
        assert_eq!(db.collection("docs").unwrap().count(), 5);
    }

    #[test]
    fn helpers_hand_out_databases() {
        with_temp_db(|db| assert!(db.collections().is_empty()));
        with_file_db(|db, path| {
            assert!(path.join("MANIFEST").exists());
            assert_eq!(db.path(), Some(path));
        });
    }
}
