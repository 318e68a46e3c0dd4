//! Compact command implementation.

use super::{open_existing, CliError, Format};
use std::path::Path;
use strata_core::CompactionReport;
use tracing::info;

/// Runs the compact command.
pub fn run(path: &Path, format: Format) -> Result<(), CliError> {
    let reports = compact(path)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        Format::Text if reports.is_empty() => println!("Nothing to compact"),
        Format::Text => {
            for report in &reports {
                let reasons = report
                    .reasons
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                println!(
                    "{}: merged {} segment(s) [{reasons}], kept {} document(s) and {} deletion(s), reclaimed {} bytes",
                    report.collection,
                    report.segments.len(),
                    report.documents,
                    report.deletions,
                    report.reclaimed()
                );
            }
        }
    }
    Ok(())
}

/// Opens the database and runs one forced compaction pass.
pub fn compact(path: &Path) -> Result<Vec<CompactionReport>, CliError> {
    let db = open_existing(path)?;
    let reports = db.compact_now()?;
    info!(
        path = %path.display(),
        batches = reports.len(),
        reclaimed = reports.iter().map(CompactionReport::reclaimed).sum::<u64>(),
        "compaction pass complete"
    );
    db.close()?;
    Ok(reports)
}
