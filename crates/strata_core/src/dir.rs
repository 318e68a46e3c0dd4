//! Database directory management.
//!
//! ```text
//! <db_path>/
//! ├─ MANIFEST          # collection catalogue
//! ├─ LOCK              # advisory lock for single-process access
//! └─ collection-<id>/  # segment files of one collection
//! ```
//!
//! The LOCK file ensures only one process opens the database at a time.

use crate::error::{CoreError, CoreResult};
use crate::manifest::Manifest;
use crate::types::CollectionId;
use fs2::FileExt;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use strata_storage::DirectoryStore;
use tracing::{debug, warn};

const MANIFEST_FILE: &str = "MANIFEST";
const LOCK_FILE: &str = "LOCK";
const MANIFEST_TEMP: &str = "MANIFEST.tmp";
const COLLECTION_PREFIX: &str = "collection-";

/// Holds the database directory and its exclusive lock.
#[derive(Debug)]
pub struct DatabaseDir {
    path: PathBuf,
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens or creates a database directory and locks it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (`DatabaseLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_argument(format!(
                    "database directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_argument(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// The database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the MANIFEST file.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    /// Directory holding the segments of `id`.
    #[must_use]
    pub fn collection_path(&self, id: CollectionId) -> PathBuf {
        self.path.join(format!("{COLLECTION_PREFIX}{}", id.as_u64()))
    }

    /// Opens the segment store of `id`, creating its directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn collection_store(&self, id: CollectionId) -> CoreResult<DirectoryStore> {
        let store = DirectoryStore::open(&self.collection_path(id))?;
        self.sync_directory()?;
        Ok(store)
    }

    /// True if no manifest has been written yet.
    #[must_use]
    pub fn is_new_database(&self) -> bool {
        !self.manifest_path().exists()
    }

    /// Loads the manifest; `None` for a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is corrupt.
    pub fn load_manifest(&self) -> CoreResult<Option<Manifest>> {
        let manifest_path = self.manifest_path();
        if !manifest_path.exists() {
            return Ok(None);
        }

        let mut data = Vec::new();
        File::open(&manifest_path)?.read_to_end(&mut data)?;
        if data.is_empty() {
            return Ok(None);
        }
        Manifest::decode(&data).map(Some)
    }

    /// Saves the manifest atomically.
    ///
    /// Writes a temporary file, syncs it, renames it over MANIFEST and
    /// syncs the directory so the rename survives a crash.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails; the previous manifest stays.
    pub fn save_manifest(&self, manifest: &Manifest) -> CoreResult<()> {
        let temp_path = self.path.join(MANIFEST_TEMP);
        let data = manifest.encode()?;

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.manifest_path())?;
        self.sync_directory()
    }

    /// Removes the directory of a dropped collection once it is empty.
    ///
    /// Segment files still held by readers are deleted when the last
    /// handle goes away; a directory that is not empty yet is left for
    /// [`DatabaseDir::remove_orphans`] on the next open.
    pub fn release_collection(&self, id: CollectionId) -> bool {
        match fs::remove_dir(self.collection_path(id)) {
            Ok(()) => {
                let _ = self.sync_directory();
                true
            }
            Err(err) => {
                debug!(collection = %id, error = %err, "collection directory left for cleanup");
                false
            }
        }
    }

    /// Removes collection directories the manifest does not list, plus a
    /// leftover temporary manifest.
    ///
    /// Returns the number of directories removed. Failures are logged and
    /// skipped.
    pub fn remove_orphans(&self, known: &BTreeSet<CollectionId>) -> CoreResult<usize> {
        let temp = self.path.join(MANIFEST_TEMP);
        if temp.exists() {
            fs::remove_file(&temp)?;
        }

        let mut removed = 0;
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(id) = name
                .to_str()
                .and_then(|name| name.strip_prefix(COLLECTION_PREFIX))
                .and_then(|id| id.parse::<u64>().ok())
                .map(CollectionId::new)
            else {
                continue;
            };
            if known.contains(&id) || !entry.path().is_dir() {
                continue;
            }
            match fs::remove_dir_all(entry.path()) {
                Ok(()) => {
                    debug!(collection = %id, "removed orphaned collection directory");
                    removed += 1;
                }
                Err(err) => warn!(collection = %id, error = %err, "cannot remove orphaned collection directory"),
            }
        }
        if removed > 0 {
            self.sync_directory()?;
        }
        Ok(removed)
    }

    /// Syncs the database directory so entry changes are durable.
    ///
    /// Windows NTFS journals metadata itself, so this is a no-op there.
    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CollectionProperties;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("new_db");

        let dir = DatabaseDir::open(&db_path, true).unwrap();
        assert!(db_path.is_dir());
        assert!(dir.is_new_database());
    }

    #[test]
    fn open_fails_if_not_exists_and_no_create() {
        let temp = tempdir().unwrap();
        assert!(DatabaseDir::open(&temp.path().join("nonexistent"), false).is_err());
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("locked_db");

        let _dir = DatabaseDir::open(&db_path, true).unwrap();
        let result = DatabaseDir::open(&db_path, true);
        assert!(matches!(result, Err(CoreError::DatabaseLocked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("reopen_db");
        {
            let _dir = DatabaseDir::open(&db_path, true).unwrap();
        }
        let _dir = DatabaseDir::open(&db_path, true).unwrap();
    }

    #[test]
    fn manifest_survives_reopen() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("manifest_db");
        let mut manifest = Manifest::new();
        manifest
            .add_collection("users", CollectionProperties::new())
            .unwrap();
        {
            let dir = DatabaseDir::open(&db_path, true).unwrap();
            assert!(dir.load_manifest().unwrap().is_none());
            dir.save_manifest(&manifest).unwrap();
        }

        let dir = DatabaseDir::open(&db_path, true).unwrap();
        assert!(!dir.is_new_database());
        assert_eq!(dir.load_manifest().unwrap(), Some(manifest));
        assert!(!db_path.join(MANIFEST_TEMP).exists());
    }

    #[test]
    fn orphaned_collections_are_removed() {
        let temp = tempdir().unwrap();
        let dir = DatabaseDir::open(temp.path(), true).unwrap();
        dir.collection_store(CollectionId::new(1)).unwrap();
        dir.collection_store(CollectionId::new(2)).unwrap();
        fs::create_dir(temp.path().join("unrelated")).unwrap();

        let known = BTreeSet::from([CollectionId::new(1)]);
        assert_eq!(dir.remove_orphans(&known).unwrap(), 1);
        assert!(dir.collection_path(CollectionId::new(1)).exists());
        assert!(!dir.collection_path(CollectionId::new(2)).exists());
        assert!(temp.path().join("unrelated").exists());
    }

    #[test]
    fn only_empty_collection_directories_are_released() {
        let temp = tempdir().unwrap();
        let dir = DatabaseDir::open(temp.path(), true).unwrap();
        let id = CollectionId::new(7);
        dir.collection_store(id).unwrap();
        fs::write(dir.collection_path(id).join("datafile-1.db"), b"x").unwrap();

        assert!(!dir.release_collection(id));
        fs::remove_file(dir.collection_path(id).join("datafile-1.db")).unwrap();
        assert!(dir.release_collection(id));
        assert!(!dir.collection_path(id).exists());
    }
}
