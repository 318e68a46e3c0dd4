//! Inspect command implementation.

use super::{open_existing, CliError, Format};
use serde::Serialize;
use std::path::Path;
use strata_core::{CollectionFigures, CollectionProperties, IndexDefinition, StatsSnapshot};

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// Engine version.
    pub version: &'static str,
    /// One entry per collection, ordered by name.
    pub collections: Vec<CollectionReport>,
    /// Counters gathered while opening.
    pub stats: StatsSnapshot,
}

/// One collection as shown by `inspect`.
#[derive(Debug, Serialize)]
pub struct CollectionReport {
    /// Collection id.
    pub id: u64,
    /// Collection name.
    pub name: String,
    /// Properties.
    pub properties: CollectionProperties,
    /// Secondary indexes.
    pub indexes: Vec<IndexDefinition>,
    /// Storage figures.
    pub figures: CollectionFigures,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: Format) -> Result<(), CliError> {
    let result = inspect(path)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

/// Opens the database and gathers the report.
pub fn inspect(path: &Path) -> Result<InspectResult, CliError> {
    let db = open_existing(path)?;
    let collections = db
        .collections()
        .into_iter()
        .map(|collection| CollectionReport {
            id: collection.id().as_u64(),
            name: collection.name().to_string(),
            properties: collection.properties(),
            indexes: collection.index_definitions(),
            figures: collection.figures(),
        })
        .collect();
    let result = InspectResult {
        path: path.display().to_string(),
        version: strata_core::VERSION,
        collections,
        stats: db.stats(),
    };
    db.close()?;
    Ok(result)
}

fn print_text_output(result: &InspectResult) {
    println!("Database: {}", result.path);
    println!("Engine:   v{}", result.version);
    println!("Collections: {}", result.collections.len());

    for collection in &result.collections {
        let properties = &collection.properties;
        let figures = &collection.figures;
        println!();
        println!("Collection '{}' (id {})", collection.name, collection.id);
        println!(
            "  journal_size={} wait_for_sync={} do_compact={} is_volatile={}",
            properties.journal_size, properties.wait_for_sync, properties.do_compact, properties.is_volatile
        );
        println!("  documents:   {}", figures.documents);
        println!(
            "  alive:       {} ({} bytes)",
            figures.totals.number_alive, figures.totals.size_alive
        );
        println!(
            "  dead:        {} ({} bytes)",
            figures.totals.number_dead, figures.totals.size_dead
        );
        println!("  deletions:   {}", figures.totals.number_deletions);
        println!("  uncollected: {}", figures.totals.number_uncollected);
        println!(
            "  datafiles:   {} ({} bytes)",
            figures.datafiles.count, figures.datafiles.file_size
        );
        println!(
            "  journals:    {} ({} bytes)",
            figures.journals.count, figures.journals.file_size
        );
        println!(
            "  compactors:  {} ({} bytes)",
            figures.compactors.count, figures.compactors.file_size
        );
        if !figures.compaction.message.is_empty() {
            println!("  compaction:  {}", figures.compaction.message);
        }
        for index in &collection.indexes {
            let mut flags = Vec::new();
            if index.unique {
                flags.push("unique");
            }
            if index.sparse {
                flags.push("sparse");
            }
            let source = index
                .evaluator
                .as_ref()
                .map_or_else(|| index.fields.join(", "), |name| format!("evaluator {name}"));
            println!("  index {} on [{source}] {}", index.name, flags.join(" "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_core::{Config, Database, OperationOptions};
    use tempfile::tempdir;

    #[test]
    fn report_lists_collections_and_indexes() {
        let temp = tempdir().unwrap();
        {
            let db = Database::open(temp.path(), Config::default()).unwrap();
            let users = db.create_collection("users", CollectionProperties::new()).unwrap();
            db.create_collection("events", CollectionProperties::new()).unwrap();
            db.create_index("users", IndexDefinition::new("by_email", ["email"]).unique())
                .unwrap();
            users
                .insert(json!({"_key": "a", "email": "a@x"}), OperationOptions::default())
                .unwrap();
        }

        let result = inspect(temp.path()).unwrap();
        let names = result
            .collections
            .iter()
            .map(|collection| collection.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, ["events", "users"]);
        assert_eq!(result.collections[1].figures.documents, 1);
        assert_eq!(result.collections[1].indexes[0].name, "by_email");

        let rendered = serde_json::to_value(&result).unwrap();
        assert_eq!(rendered["collections"][1]["properties"]["do_compact"], json!(true));
    }

    #[test]
    fn empty_directory_is_not_a_database() {
        let temp = tempdir().unwrap();
        assert!(matches!(inspect(temp.path()), Err(CliError::NoDatabase(_))));
    }
}
