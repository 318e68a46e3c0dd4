//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{write_error, StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A backend storing one segment in one OS file.
///
/// # Durability
///
/// - `append` hands the bytes to the OS with `write_all`; they survive a
///   process crash but not a power loss
/// - `sync()` calls `File::sync_data()`, which makes them durable
///
/// A failed append rolls the file back to its previous length, so a
/// disk-full condition never leaves a half-written marker behind.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    file: File,
    size: u64,
}

impl FileBackend {
    /// Creates a new, empty file at `path`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| write_error(e, 0))?;
        Ok(Self::from_file(path, file, 0))
    }

    /// Opens an existing file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the file does not exist.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    name: path.display().to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata()?.len();
        Ok(Self::from_file(path, file, size))
    }

    fn from_file(path: &Path, file: File, size: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner { file, size }),
        }
    }

    /// Returns the path the file was opened under.
    ///
    /// Renames performed through a store are not reflected here.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        let size = inner.size;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        inner.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        inner.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let inner = self.inner.get_mut();
        let offset = inner.size;
        if data.is_empty() {
            return Ok(offset);
        }

        let written = inner
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| inner.file.write_all(data));

        if let Err(err) = written {
            // Best effort: drop whatever part of the write reached the file.
            let _ = inner.file.set_len(offset);
            return Err(write_error(err, data.len() as u64));
        }

        inner.size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().size)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let inner = self.inner.get_mut();
        if new_size > inner.size {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to size {} which is greater than current size {}",
                    new_size, inner.size
                ),
            )));
        }

        inner.file.set_len(new_size)?;
        inner.file.sync_all()?;
        inner.size = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("datafile-1.db");

        let backend = FileBackend::create(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn create_replaces_existing_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("temp-1.db");
        std::fs::write(&path, b"leftover").unwrap();

        let backend = FileBackend::create(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
    }

    #[test]
    fn open_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let result = FileBackend::open(&dir.path().join("nope.db"));
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[test]
    fn append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal-2.db");
        let mut backend = FileBackend::create(&path).unwrap();

        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(backend.read_at(6, 5).unwrap(), b"world");
        assert_eq!(backend.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::create(&dir.path().join("a.db")).unwrap();
        backend.append(b"abc").unwrap();

        let result = backend.read_at(2, 5);
        assert!(matches!(
            result,
            Err(StorageError::ReadPastEnd {
                offset: 2,
                len: 5,
                size: 3
            })
        ));
    }

    #[test]
    fn reopen_sees_persisted_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("datafile-9.db");
        {
            let mut backend = FileBackend::create(&path).unwrap();
            backend.append(b"persistent").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 10);
        assert_eq!(backend.read_all().unwrap(), b"persistent");
    }

    #[test]
    fn truncate_cuts_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal-3.db");
        let mut backend = FileBackend::create(&path).unwrap();
        backend.append(b"keep-this-torn").unwrap();

        backend.truncate(9).unwrap();
        assert_eq!(backend.size().unwrap(), 9);
        assert_eq!(backend.append(b"!").unwrap(), 9);
        assert_eq!(backend.read_all().unwrap(), b"keep-this!");

        assert!(backend.truncate(100).is_err());
    }
}
