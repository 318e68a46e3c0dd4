//! CLI command implementations.

pub mod compact;
pub mod dump;
pub mod inspect;
pub mod scan;
pub mod verify;

pub(crate) use crate::Format;

use std::path::Path;
use strata_core::{CompactionConfig, Config, CoreError, Database};
use thiserror::Error;
use tracing::debug;

/// Errors reported by the commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The engine failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Reading segment files failed.
    #[error(transparent)]
    Storage(#[from] strata_storage::StorageError),

    /// Writing JSON output failed.
    #[error("cannot render output: {0}")]
    Json(#[from] serde_json::Error),

    /// There is no database at the path.
    #[error("no database found at {0}")]
    NoDatabase(String),

    /// The named collection is not in the manifest.
    #[error("collection not found: {0}")]
    UnknownCollection(String),

    /// Verification found problems.
    #[error("verification failed with {0} problem(s)")]
    VerificationFailed(usize),
}

/// Opens an existing database without starting the compactor.
pub(crate) fn open_existing(path: &Path) -> Result<Database, CliError> {
    if !path.join("MANIFEST").exists() {
        return Err(CliError::NoDatabase(path.display().to_string()));
    }
    let config = Config::default()
        .create_if_missing(false)
        .compaction(CompactionConfig::default().enabled(false));
    debug!(path = %path.display(), "opening database");
    Ok(Database::open(path, config)?)
}
