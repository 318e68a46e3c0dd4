//! Named segment file containers.
//!
//! A [`SegmentStore`] is the directory-shaped half of the storage layer:
//! segments are created, opened, renamed and removed by name, and each name
//! resolves to a [`StorageBackend`]. Renames are how the engine publishes
//! state transitions (temporary journal, sealed datafile, compaction output),
//! so a store must make them atomic.

use crate::backend::StorageBackend;
use crate::error::{write_error, StorageError, StorageResult};
use crate::file::FileBackend;
use crate::memory::{InMemoryBackend, StorageQuota};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A container of named segment files.
pub trait SegmentStore: Send + Sync + fmt::Debug {
    /// Creates (or replaces) the file `name` and returns an empty backend.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Full`] when there is no room for a new file,
    /// or an I/O error.
    fn create(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>>;

    /// Opens the existing file `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the file does not exist.
    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>>;

    /// Atomically renames `from` to `to`, replacing any file called `to`.
    ///
    /// Open backends stay valid across a rename.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if `from` does not exist.
    fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Removes the file `name`. Open backends keep their data until dropped.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the file does not exist.
    fn remove(&self, name: &str) -> StorageResult<()>;

    /// Returns true if a file called `name` exists.
    fn exists(&self, name: &str) -> bool;

    /// Lists the names of all files in the store, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    fn list(&self) -> StorageResult<Vec<String>>;

    /// Returns the directory backing this store, if any.
    fn location(&self) -> Option<&Path> {
        None
    }
}

/// A store keeping one OS file per name inside a directory.
#[derive(Debug)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Opens (creating if needed) the directory at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root).map_err(|e| write_error(e, 0))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Returns the full path of `name`.
    #[must_use]
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Makes directory entry changes (create, rename, remove) durable.
    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        File::open(&self.root)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        Ok(())
    }

    fn not_found(name: &str, err: io::Error) -> StorageError {
        if err.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound {
                name: name.to_string(),
            }
        } else {
            StorageError::Io(err)
        }
    }
}

impl SegmentStore for DirectoryStore {
    fn create(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        let backend = FileBackend::create(&self.path_of(name))?;
        self.sync_directory()?;
        Ok(Box::new(backend))
    }

    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        Ok(Box::new(FileBackend::open(&self.path_of(name))?))
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        fs::rename(self.path_of(from), self.path_of(to)).map_err(|e| Self::not_found(from, e))?;
        self.sync_directory()
    }

    fn remove(&self, name: &str) -> StorageResult<()> {
        fs::remove_file(self.path_of(name)).map_err(|e| Self::not_found(name, e))?;
        if let Err(err) = self.sync_directory() {
            warn!(file = name, error = %err, "directory sync after remove failed");
        }
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.path_of(name).is_file()
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

/// A store keeping named in-memory buffers.
///
/// The store owns a handle to every buffer, so dropping the engine and
/// reopening it over the same store replays the same bytes. Used for
/// volatile collections and for recovery tests that should not touch disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: Mutex<BTreeMap<String, InMemoryBackend>>,
    quota: Option<StorageQuota>,
}

impl MemoryStore {
    /// Creates an empty, unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store whose files share `quota`.
    #[must_use]
    pub fn with_quota(quota: StorageQuota) -> Self {
        Self {
            files: Mutex::default(),
            quota: Some(quota),
        }
    }

    /// Returns a handle sharing the buffer of `name`.
    ///
    /// Tests use it to inspect or damage persisted bytes.
    #[must_use]
    pub fn handle(&self, name: &str) -> Option<InMemoryBackend> {
        self.files.lock().get(name).cloned()
    }

    /// Installs `backend` under `name`, replacing any existing file.
    pub fn insert(&self, name: &str, backend: InMemoryBackend) {
        self.files.lock().insert(name.to_string(), backend);
    }
}

impl SegmentStore for MemoryStore {
    fn create(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        let backend = match &self.quota {
            Some(quota) => InMemoryBackend::with_quota(quota.clone()),
            None => InMemoryBackend::new(),
        };
        self.files.lock().insert(name.to_string(), backend.clone());
        Ok(Box::new(backend))
    }

    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        self.handle(name)
            .map(|backend| Box::new(backend) as Box<dyn StorageBackend>)
            .ok_or_else(|| StorageError::NotFound {
                name: name.to_string(),
            })
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let mut files = self.files.lock();
        let backend = files.remove(from).ok_or_else(|| StorageError::NotFound {
            name: from.to_string(),
        })?;
        files.insert(to.to_string(), backend);
        Ok(())
    }

    fn remove(&self, name: &str) -> StorageResult<()> {
        self.files
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound {
                name: name.to_string(),
            })
    }

    fn exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        Ok(self.files.lock().keys().cloned().collect())
    }
}
