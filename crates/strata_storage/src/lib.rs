//! # Strata Storage
//!
//! Byte-store backends and named file containers for Strata.
//!
//! This crate is the lowest storage layer of the engine. Backends are
//! **opaque byte stores**: they never interpret markers, segments or
//! documents. Segment stores add names on top, so the engine can create,
//! open, rename and remove segment files without caring whether they live
//! in a directory or in memory.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - Shared in-process buffers (volatile collections, tests)
//! - [`FileBackend`] - Persistent storage using OS file APIs
//!
//! ## Available Stores
//!
//! - [`DirectoryStore`] - One file per segment inside a directory
//! - [`MemoryStore`] - Named in-memory buffers, optionally bounded by a [`StorageQuota`]
//!
//! ## Example
//!
//! ```rust
//! use strata_storage::{MemoryStore, SegmentStore};
//!
//! let store = MemoryStore::new();
//! let mut backend = store.create("journal-1.db").unwrap();
//! let offset = backend.append(b"hello world").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod store;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::{InMemoryBackend, StorageQuota};
pub use store::{DirectoryStore, MemoryStore, SegmentStore};
