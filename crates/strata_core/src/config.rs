//! Database configuration.

use crate::hooks::{EvaluatorRegistry, ValueEvaluator};
use std::sync::Arc;
use std::time::Duration;

/// Default journal size (32 MiB).
pub const DEFAULT_JOURNAL_SIZE: u32 = 32 * 1024 * 1024;

/// Smallest journal size accepted.
pub const MIN_JOURNAL_SIZE: u32 = 4 * 1024;

/// Default lock acquisition timeout.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(900);

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to error if the database already exists.
    pub error_if_exists: bool,

    /// Journal size for collections that don't set their own.
    pub journal_size: u32,

    /// Whether writes sync the journal before returning, unless the
    /// collection or the operation says otherwise.
    pub wait_for_sync: bool,

    /// How long lock acquisition may wait before failing.
    pub lock_timeout: Duration,

    /// Best-effort startup: skip corrupt segments instead of failing.
    pub ignore_errors: bool,

    /// Compaction thresholds and scheduling.
    pub compaction: CompactionConfig,

    /// Evaluators that index definitions may refer to by name.
    pub evaluators: EvaluatorRegistry,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            journal_size: DEFAULT_JOURNAL_SIZE,
            wait_for_sync: false,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            ignore_errors: false,
            compaction: CompactionConfig::default(),
            evaluators: EvaluatorRegistry::default(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to error if database exists.
    #[must_use]
    pub const fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets the default journal size, clamped to [`MIN_JOURNAL_SIZE`].
    #[must_use]
    pub fn journal_size(mut self, size: u32) -> Self {
        self.journal_size = size.max(MIN_JOURNAL_SIZE);
        self
    }

    /// Sets whether writes sync before returning.
    #[must_use]
    pub const fn wait_for_sync(mut self, value: bool) -> Self {
        self.wait_for_sync = value;
        self
    }

    /// Sets the lock acquisition timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets best-effort startup.
    #[must_use]
    pub const fn ignore_errors(mut self, value: bool) -> Self {
        self.ignore_errors = value;
        self
    }

    /// Replaces the compaction configuration.
    #[must_use]
    pub fn compaction(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = compaction;
        self
    }

    /// Registers a named evaluator for index key computation.
    #[must_use]
    pub fn evaluator(mut self, name: impl Into<String>, evaluator: Arc<dyn ValueEvaluator>) -> Self {
        self.evaluators.register(name, evaluator);
        self
    }
}

/// Compaction thresholds and scheduling.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Run the background compactor thread.
    pub enabled: bool,
    /// Pause between compactor passes.
    pub sleep_time: Duration,
    /// Minimum time between two compactions of the same collection.
    pub collection_interval: Duration,
    /// Most segments merged in one batch.
    pub max_files: usize,
    /// Output size cap, as a multiple of the journal size.
    pub max_size_factor: u64,
    /// Segments below this size are merged with their neighbours.
    pub small_datafile_size: u64,
    /// Hard cap on the output size of one batch.
    pub max_result_file_size: u64,
    /// Dead marker count that makes a segment eligible.
    pub dead_number_threshold: u64,
    /// Dead byte count that makes a segment eligible.
    pub dead_size_threshold: u64,
    /// Dead byte share that makes a segment eligible.
    pub dead_share: f64,
    /// How long a compaction pass waits for a collection's read lock.
    pub lock_timeout: Duration,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sleep_time: Duration::from_secs(1),
            collection_interval: Duration::from_secs(10),
            max_files: 3,
            max_size_factor: 3,
            small_datafile_size: 128 * 1024,
            max_result_file_size: 128 * 1024 * 1024,
            dead_number_threshold: 16_384,
            dead_size_threshold: 128 * 1024,
            dead_share: 0.1,
            lock_timeout: Duration::from_secs(1),
        }
    }
}

impl CompactionConfig {
    /// Sets whether the background thread runs.
    #[must_use]
    pub const fn enabled(mut self, value: bool) -> Self {
        self.enabled = value;
        self
    }

    /// Sets the pause between passes.
    #[must_use]
    pub const fn sleep_time(mut self, value: Duration) -> Self {
        self.sleep_time = value;
        self
    }

    /// Sets the per-collection interval.
    #[must_use]
    pub const fn collection_interval(mut self, value: Duration) -> Self {
        self.collection_interval = value;
        self
    }

    /// Sets the maximum batch length.
    #[must_use]
    pub fn max_files(mut self, value: usize) -> Self {
        self.max_files = value.max(1);
        self
    }

    /// Sets the small datafile threshold.
    #[must_use]
    pub const fn small_datafile_size(mut self, value: u64) -> Self {
        self.small_datafile_size = value;
        self
    }

    /// Sets the dead marker count threshold.
    #[must_use]
    pub const fn dead_number_threshold(mut self, value: u64) -> Self {
        self.dead_number_threshold = value;
        self
    }

    /// Sets the dead byte threshold.
    #[must_use]
    pub const fn dead_size_threshold(mut self, value: u64) -> Self {
        self.dead_size_threshold = value;
        self
    }

    /// Sets the dead share threshold.
    #[must_use]
    pub const fn dead_share(mut self, value: f64) -> Self {
        self.dead_share = value;
        self
    }
}
