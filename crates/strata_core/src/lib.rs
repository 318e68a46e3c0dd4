//! # Strata Core
//!
//! An append-only document storage engine.
//!
//! This crate provides:
//! - Segments (journals, datafiles and compactor outputs) made of
//!   checksummed markers
//! - Collections with a primary index, a revision cache and secondary
//!   indexes, all rebuilt by replaying the segments on open
//! - Document operations that can be rolled back, and transactions
//!   built on them
//! - Collection locks with deadlock detection
//! - A background compactor that reclaims dead markers
//!
//! ```rust,ignore
//! use strata_core::{Config, Database, OperationOptions};
//! use serde_json::json;
//!
//! let db = Database::open_in_memory(Config::default())?;
//! let users = db.create_collection("users", db.default_properties())?;
//! let written = users.insert(json!({"name": "alice"}), OperationOptions::default())?;
//! assert_eq!(users.read(&written.key)?.body["name"], json!("alice"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod collection;
pub mod compactor;
pub mod config;
mod database;
pub mod dir;
pub mod document;
mod error;
pub mod hooks;
pub mod index;
pub mod lock;
pub mod manifest;
pub mod segment;
mod stats;
pub mod transaction;
mod types;

pub use collection::{Collection, CollectionFigures, CollectionProperties, CompactionStatus};
pub use compactor::{CompactionReason, CompactionReport, CompactorThread};
pub use config::{CompactionConfig, Config};
pub use database::Database;
pub use document::{Document, DocumentPosition, OperationOptions, WriteResult};
pub use error::{CoreError, CoreResult};
pub use hooks::{EvaluatorRegistry, QueryCacheInvalidator, ValueEvaluator};
pub use index::IndexDefinition;
pub use lock::LockMode;
pub use stats::{DatabaseStats, StatsSnapshot};
pub use transaction::{Transaction, TransactionState};
pub use types::{CollectionId, IndexId, RevisionId, SegmentId, TickGenerator, TransactionId, MAX_TICK};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
