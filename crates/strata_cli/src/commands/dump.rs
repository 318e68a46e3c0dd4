//! Dump command implementation.

use super::scan::{replay_order, scan_segment, MarkerSummary};
use super::{CliError, Format};
use serde::Serialize;
use std::path::Path;
use strata_core::dir::DatabaseDir;
use strata_storage::DirectoryStore;

/// The markers of one segment.
#[derive(Debug, Serialize)]
pub struct SegmentDump {
    /// File name.
    pub segment: String,
    /// Markers in file order.
    pub markers: Vec<MarkerSummary>,
}

/// Runs the dump command.
pub fn run(path: &Path, collection: &str, limit: Option<usize>, format: Format) -> Result<(), CliError> {
    let dumps = dump(path, collection, limit)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&dumps)?),
        Format::Text => {
            for dump in &dumps {
                println!("{}", dump.segment);
                for marker in &dump.markers {
                    let identity = match (&marker.key, marker.revision) {
                        (Some(key), Some(revision)) => format!("  key={key} rev={revision}"),
                        _ => String::new(),
                    };
                    println!(
                        "  {:>10}  {:<18} tick={:<12} size={:<8}{identity}",
                        marker.offset, marker.marker_type, marker.tick, marker.size
                    );
                }
            }
        }
    }
    Ok(())
}

/// Lists up to `limit` markers of `collection`, segment by segment in
/// replay order.
pub fn dump(path: &Path, collection: &str, limit: Option<usize>) -> Result<Vec<SegmentDump>, CliError> {
    if !path.is_dir() {
        return Err(CliError::NoDatabase(path.display().to_string()));
    }
    let dir = DatabaseDir::open(path, false)?;
    let manifest = dir
        .load_manifest()?
        .ok_or_else(|| CliError::NoDatabase(path.display().to_string()))?;
    let entry = manifest
        .collection(collection)
        .ok_or_else(|| CliError::UnknownCollection(collection.to_string()))?;

    let location = dir.collection_path(entry.id);
    if entry.properties.is_volatile || !location.is_dir() {
        return Ok(Vec::new());
    }
    let store = DirectoryStore::open(&location)?;
    let mut remaining = limit.unwrap_or(usize::MAX);
    let mut dumps = Vec::new();
    for (name, file) in replay_order(&store)? {
        if remaining == 0 {
            break;
        }
        let mut markers = scan_segment(&store, &name, file, entry.id)?.markers;
        markers.truncate(remaining);
        remaining -= markers.len();
        dumps.push(SegmentDump {
            segment: name,
            markers,
        });
    }
    Ok(dumps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_core::{CollectionProperties, Config, Database, OperationOptions};
    use tempfile::tempdir;

    #[test]
    fn markers_follow_the_writes() {
        let temp = tempdir().unwrap();
        {
            let db = Database::open(temp.path(), Config::default()).unwrap();
            let docs = db.create_collection("docs", CollectionProperties::new()).unwrap();
            docs.insert(json!({"_key": "a"}), OperationOptions::default()).unwrap();
            docs.remove("a", OperationOptions::default()).unwrap();
        }

        let dumps = dump(temp.path(), "docs", None).unwrap();
        assert_eq!(dumps.len(), 1);
        let types = dumps[0]
            .markers
            .iter()
            .map(|marker| marker.marker_type)
            .collect::<Vec<_>>();
        assert_eq!(types.len(), 4);
        assert_eq!(dumps[0].markers[2].key.as_deref(), Some("a"));
        assert_eq!(dumps[0].markers[3].key.as_deref(), Some("a"));
        assert!(dumps[0].markers[3].tick > dumps[0].markers[2].tick);

        let limited = dump(temp.path(), "docs", Some(3)).unwrap();
        assert_eq!(limited[0].markers.len(), 3);
        assert!(matches!(
            dump(temp.path(), "missing", None),
            Err(CliError::UnknownCollection(_))
        ));
    }
}
