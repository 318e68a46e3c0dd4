//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// The device or quota has no room for the write.
    #[error("storage full: {requested} bytes requested, {available} available")]
    Full {
        /// Bytes the write needed.
        requested: u64,
        /// Bytes that were still available (0 when unknown).
        available: u64,
    },

    /// A named file does not exist in the store.
    #[error("file not found: {name}")]
    NotFound {
        /// Name of the missing file.
        name: String,
    },

    /// A named file already exists where a new one was expected.
    #[error("file already exists: {name}")]
    AlreadyExists {
        /// Name of the conflicting file.
        name: String,
    },
}

impl StorageError {
    /// Returns true if the error means the device (or quota) ran out of space.
    #[must_use]
    pub fn is_full(&self) -> bool {
        match self {
            Self::Full { .. } => true,
            Self::Io(err) => is_disk_full(err),
            _ => false,
        }
    }
}

/// Classifies an I/O error as "no space left on device".
pub(crate) fn is_disk_full(err: &io::Error) -> bool {
    // ENOSPC on unix, ERROR_DISK_FULL / ERROR_HANDLE_DISK_FULL on windows
    #[cfg(unix)]
    const DISK_FULL_CODES: &[i32] = &[28];
    #[cfg(windows)]
    const DISK_FULL_CODES: &[i32] = &[39, 112];
    #[cfg(not(any(unix, windows)))]
    const DISK_FULL_CODES: &[i32] = &[];

    err.raw_os_error()
        .is_some_and(|code| DISK_FULL_CODES.contains(&code))
}

/// Maps an I/O error from a write path, turning disk-full into [`StorageError::Full`].
pub(crate) fn write_error(err: io::Error, requested: u64) -> StorageError {
    if is_disk_full(&err) {
        StorageError::Full {
            requested,
            available: 0,
        }
    } else {
        StorageError::Io(err)
    }
}
