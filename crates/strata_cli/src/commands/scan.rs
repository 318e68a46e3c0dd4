//! Read-only segment scanning shared by `verify` and `dump`.

use serde::Serialize;
use std::collections::BTreeMap;
use strata_codec::decode_identity;
use strata_core::segment::{
    decode_collection_header, DatafileHeader, MarkerIterator, MarkerType, ScanEnd, SegmentFile,
};
use strata_core::{CollectionId, SegmentId};
use strata_storage::{SegmentStore, StorageResult};

/// One marker as listed by `dump`.
#[derive(Debug, Clone, Serialize)]
pub struct MarkerSummary {
    /// Offset within the segment.
    pub offset: u64,
    /// Marker type name.
    pub marker_type: &'static str,
    /// Tick stamped into the header.
    pub tick: u64,
    /// Unpadded size.
    pub size: u32,
    /// Document key, for document and remove markers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Document revision, for document and remove markers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

/// The outcome of scanning one segment file.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentScan {
    /// File name.
    pub name: String,
    /// "datafile", "journal" or "compaction".
    pub kind: &'static str,
    /// File size.
    pub size: u64,
    /// Markers that passed their checksum.
    pub markers: Vec<MarkerSummary>,
    /// A footer closes the segment.
    pub sealed: bool,
    /// Structural or checksum errors.
    pub problems: Vec<String>,
    /// Conditions recovery repairs on its own.
    pub notes: Vec<String>,
}

impl SegmentScan {
    /// True if nothing is wrong with the segment.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Segment files of a store in replay order: datafiles, then journals,
/// then compaction outputs, each sorted by id. Temporary and dead files
/// are skipped.
pub fn replay_order(store: &dyn SegmentStore) -> StorageResult<Vec<(String, SegmentFile)>> {
    let mut ordered = BTreeMap::new();
    for name in store.list()? {
        let rank = match SegmentFile::parse(&name) {
            Some(SegmentFile::Datafile(id)) => (0, id),
            Some(SegmentFile::Journal(id)) => (1, id),
            Some(SegmentFile::Compaction(id)) => (2, id),
            _ => continue,
        };
        if let Some(file) = SegmentFile::parse(&name) {
            ordered.insert(rank, (name, file));
        }
    }
    Ok(ordered.into_values().collect())
}

fn kind_name(file: SegmentFile) -> &'static str {
    match file {
        SegmentFile::Journal(_) => "journal",
        SegmentFile::Compaction(_) => "compaction",
        _ => "datafile",
    }
}

fn file_id(file: SegmentFile) -> Option<SegmentId> {
    match file {
        SegmentFile::Temp(id)
        | SegmentFile::Journal(id)
        | SegmentFile::Datafile(id)
        | SegmentFile::Compaction(id) => Some(id),
        SegmentFile::Dead => None,
    }
}

/// Scans the file `name` of `store`, checking every marker and the
/// header, collection header and footer structure.
pub fn scan_segment(
    store: &dyn SegmentStore,
    name: &str,
    file: SegmentFile,
    collection: CollectionId,
) -> StorageResult<SegmentScan> {
    let backend = store.open(name)?;
    let data = backend.read_all()?;
    let mut scan = SegmentScan {
        name: name.to_string(),
        kind: kind_name(file),
        size: data.len() as u64,
        markers: Vec::new(),
        sealed: false,
        problems: Vec::new(),
        notes: Vec::new(),
    };

    let mut iter = MarkerIterator::new(&data);
    let mut index = 0usize;
    for marker in iter.by_ref() {
        let marker = match marker {
            Ok(marker) => marker,
            Err(err) => {
                scan.problems.push(err.to_string());
                break;
            }
        };
        let marker_type = marker.marker_type();
        match (index, marker_type) {
            (0, MarkerType::Header) => match DatafileHeader::decode_payload(marker.payload()) {
                Ok(header) if Some(header.segment_id) != file_id(file) => scan.problems.push(format!(
                    "header names {} but the file is {name}",
                    header.segment_id
                )),
                Ok(_) => {}
                Err(err) => scan.problems.push(err.to_string()),
            },
            (0, other) => scan
                .problems
                .push(format!("first marker is {} instead of a header", other.name())),
            (1, MarkerType::CollectionHeader) => match decode_collection_header(marker.payload()) {
                Ok(owner) if owner != collection => scan
                    .problems
                    .push(format!("segment belongs to {owner}, expected {collection}")),
                Ok(_) => {}
                Err(err) => scan.problems.push(err.to_string()),
            },
            (1, other) => scan.problems.push(format!(
                "second marker is {} instead of a collection header",
                other.name()
            )),
            (_, MarkerType::Header | MarkerType::CollectionHeader) => scan.problems.push(format!(
                "unexpected {} at offset {}",
                marker_type.name(),
                marker.offset
            )),
            _ => {}
        }

        let identity = if marker_type.is_data() {
            match decode_identity(marker.payload()) {
                Ok(identity) => Some(identity),
                Err(err) => {
                    scan.problems
                        .push(format!("unreadable document at offset {}: {err}", marker.offset));
                    None
                }
            }
        } else {
            None
        };
        scan.markers.push(MarkerSummary {
            offset: marker.offset,
            marker_type: marker_type.name(),
            tick: marker.header.tick,
            size: marker.header.size,
            key: identity.as_ref().map(|identity| identity.key.clone()),
            revision: identity.map(|identity| identity.revision),
        });
        index += 1;
    }

    match iter.end() {
        Some(ScanEnd::Footer) => {
            scan.sealed = true;
            if matches!(file, SegmentFile::Journal(_)) {
                scan.notes.push("sealed journal will be renamed to a datafile".into());
            }
        }
        Some(ScanEnd::Truncated { offset }) if matches!(file, SegmentFile::Journal(_)) => {
            scan.notes.push(format!("torn tail at offset {offset} will be cut"));
        }
        Some(ScanEnd::Truncated { offset }) => {
            scan.problems.push(format!("segment is truncated at offset {offset}"));
        }
        Some(ScanEnd::Corrupt { .. }) => {}
        Some(ScanEnd::EndOfData) | None => {
            if !matches!(file, SegmentFile::Journal(_)) {
                scan.problems.push("sealed segment has no footer".into());
            }
        }
    }
    if index < 2 && scan.problems.is_empty() && !matches!(file, SegmentFile::Journal(_)) {
        scan.problems.push("segment is missing its header markers".into());
    }
    if matches!(file, SegmentFile::Compaction(_)) {
        scan.notes.push("unfinished compaction output is settled on the next open".into());
    }
    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::segment::{encode_collection_header, encode_footer, encode_marker};
    use strata_storage::{InMemoryBackend, MemoryStore};

    fn padded(mut marker: Vec<u8>) -> Vec<u8> {
        while marker.len() % 8 != 0 {
            marker.push(0);
        }
        marker
    }

    fn image(id: u64, collection: u64, sealed: bool) -> Vec<u8> {
        let mut data = DatafileHeader {
            version: strata_core::segment::FORMAT_VERSION,
            max_size: 4096,
            segment_id: SegmentId::new(id),
        }
        .encode()
        .map(padded)
        .unwrap();
        data.extend(padded(
            encode_collection_header(CollectionId::new(collection), id + 1).unwrap(),
        ));
        let body = strata_codec::encode_identity("k1", 9).unwrap();
        data.extend(padded(encode_marker(MarkerType::Remove, id + 2, &body).unwrap()));
        if sealed {
            data.extend(padded(encode_footer(id + 3).unwrap()));
        }
        data
    }

    fn store_with(name: &str, data: Vec<u8>) -> MemoryStore {
        let store = MemoryStore::new();
        store.insert(name, InMemoryBackend::with_data(data));
        store
    }

    #[test]
    fn sound_datafile_passes() {
        let store = store_with("datafile-5.db", image(5, 1, true));
        let scan = scan_segment(&store, "datafile-5.db", SegmentFile::Datafile(SegmentId::new(5)), CollectionId::new(1))
            .unwrap();
        assert!(scan.is_ok(), "{:?}", scan.problems);
        assert!(scan.sealed);
        assert_eq!(scan.markers.len(), 4);
        assert_eq!(scan.markers[2].key.as_deref(), Some("k1"));
        assert_eq!(scan.markers[2].revision, Some(9));
    }

    #[test]
    fn damaged_and_misplaced_segments_are_reported() {
        let mut data = image(5, 1, true);
        data[40] ^= 0xFF;
        let store = store_with("datafile-5.db", data);
        let scan = scan_segment(&store, "datafile-5.db", SegmentFile::Datafile(SegmentId::new(5)), CollectionId::new(1))
            .unwrap();
        assert!(!scan.is_ok());

        let store = store_with("datafile-5.db", image(5, 2, true));
        let scan = scan_segment(&store, "datafile-5.db", SegmentFile::Datafile(SegmentId::new(5)), CollectionId::new(1))
            .unwrap();
        assert!(scan.problems[0].contains("belongs to"));

        let store = store_with("datafile-5.db", image(5, 1, false));
        let scan = scan_segment(&store, "datafile-5.db", SegmentFile::Datafile(SegmentId::new(5)), CollectionId::new(1))
            .unwrap();
        assert_eq!(scan.problems, vec!["sealed segment has no footer".to_string()]);
    }

    #[test]
    fn open_journal_without_footer_is_fine() {
        let mut data = image(5, 1, false);
        data.extend_from_slice(&[7, 0, 0, 0, 1, 2]);
        let store = store_with("journal-5.db", data);
        let scan = scan_segment(&store, "journal-5.db", SegmentFile::Journal(SegmentId::new(5)), CollectionId::new(1))
            .unwrap();
        assert!(scan.is_ok(), "{:?}", scan.problems);
        assert_eq!(scan.notes.len(), 1);
    }

    #[test]
    fn replay_order_puts_datafiles_first() {
        let store = MemoryStore::new();
        for name in ["journal-9.db", "datafile-7.db", "temp-11.db", "datafile-3.db", "datafile-2.db.dead"] {
            store.insert(name, InMemoryBackend::new());
        }
        let names = replay_order(&store)
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect::<Vec<_>>();
        assert_eq!(names, ["datafile-3.db", "datafile-7.db", "journal-9.db"]);
    }
}
