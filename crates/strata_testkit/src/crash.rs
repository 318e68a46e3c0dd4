//! On-disk damage for recovery tests.
//!
//! Recovery has to cope with what a crash leaves behind: a journal whose
//! last marker was only partly written, a compaction output that was never
//! published, a half-initialised journal, or a byte that went bad. These
//! helpers produce each of those states in a closed database directory.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strata_testkit::{crash, TestDatabase};
//!
//! let mut db = TestDatabase::file();
//! // ... write documents
//! db.damage_and_reopen(|path| crash::tear_journal(path, "docs", 5))?;
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use strata_core::manifest::Manifest;

/// Reads the manifest of a closed database.
pub fn manifest(db_path: &Path) -> Manifest {
    let bytes = fs::read(db_path.join("MANIFEST")).expect("Failed to read MANIFEST");
    Manifest::decode(&bytes).expect("Failed to decode MANIFEST")
}

/// Directory holding the segments of the collection `name`.
pub fn collection_dir(db_path: &Path, name: &str) -> PathBuf {
    let entry = manifest(db_path);
    let entry = entry
        .collection(name)
        .unwrap_or_else(|| panic!("collection {name} is not in the manifest"));
    db_path.join(format!("collection-{}", entry.id.as_u64()))
}

/// Segment files of a collection directory whose names start with
/// `prefix`, sorted by name length then name (so by id).
pub fn segment_files(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let mut files = fs::read_dir(dir)
        .expect("Failed to list collection directory")
        .map(|entry| entry.expect("Failed to read directory entry").path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(prefix))
        })
        .collect::<Vec<_>>();
    files.sort_by_key(|path| {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        (name.len(), name)
    });
    files
}

/// The journal of collection `name`, if it has one.
pub fn journal(db_path: &Path, name: &str) -> Option<PathBuf> {
    segment_files(&collection_dir(db_path, name), "journal-").pop()
}

/// Cuts `bytes` off the end of the journal of `name`, as if the last
/// write was interrupted.
pub fn tear_journal(db_path: &Path, name: &str, bytes: u64) {
    let path = journal(db_path, name).expect("collection has no journal");
    let file = OpenOptions::new()
        .write(true)
        .open(&path)
        .expect("Failed to open journal");
    let len = file.metadata().expect("Failed to stat journal").len();
    file.set_len(len.saturating_sub(bytes))
        .expect("Failed to truncate journal");
}

/// Appends bytes that look like the start of a marker but stop short.
pub fn append_partial_marker(path: &Path) {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .expect("Failed to open segment");
    // Declared size 200, only the first header bytes present.
    file.write_all(&[200, 0, 0, 0, 0xAB, 0xCD, 0xEF, 0x01, 0x05])
        .expect("Failed to append");
}

/// XORs the byte at `offset` of `path` with `0xFF`.
pub fn flip_byte(path: &Path, offset: usize) {
    let mut bytes = fs::read(path).expect("Failed to read segment");
    bytes[offset] ^= 0xFF;
    fs::write(path, bytes).expect("Failed to write segment");
}

/// Copies the datafile `source` to a compaction output named after
/// `id`, as if a compaction had finished writing but not been published.
pub fn leave_compaction_output(source: &Path, id: u64) -> PathBuf {
    let target = source.with_file_name(format!("compaction-{id}.db"));
    fs::copy(source, &target).expect("Failed to copy segment");
    target
}

/// Creates a temporary journal file, as if a crash hit while a new
/// journal was being initialised.
pub fn leave_temp_journal(dir: &Path, id: u64) -> PathBuf {
    let path = dir.join(format!("temp-{id}.db"));
    fs::write(&path, [0u8; 64]).expect("Failed to write temp file");
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{scenarios, small_properties, TestDatabase};

    #[test]
    fn helpers_find_the_collection_files() {
        let mut db = TestDatabase::file();
        let docs = db.create_collection("docs", small_properties()).unwrap();
        scenarios::populate(&docs, 3, 8);
        drop(docs);
        db.reopen();

        let path = db.path().unwrap();
        let dir = collection_dir(&path, "docs");
        assert!(dir.is_dir());
        let journal = journal(&path, "docs").unwrap();
        assert!(journal.starts_with(&dir));

        let before = fs::metadata(&journal).unwrap().len();
        tear_journal(&path, "docs", 3);
        assert_eq!(fs::metadata(&journal).unwrap().len(), before - 3);
    }
}
