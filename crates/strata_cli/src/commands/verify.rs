//! Verify command implementation.
//!
//! Takes the database lock and re-reads every segment of every persistent
//! collection without modifying anything.

use super::scan::{replay_order, scan_segment, SegmentScan};
use super::CliError;
use std::path::Path;
use strata_core::dir::DatabaseDir;
use strata_storage::DirectoryStore;

/// Verification result for one collection.
#[derive(Debug)]
pub struct CollectionCheck {
    /// Collection name.
    pub name: String,
    /// One scan per segment, in replay order.
    pub segments: Vec<SegmentScan>,
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), CliError> {
    println!("Verifying database at {}", path.display());
    println!();

    let checks = check(path)?;
    let mut problems = 0;
    for collection in &checks {
        println!("Collection '{}':", collection.name);
        if collection.segments.is_empty() {
            println!("  (no segment files)");
        }
        for segment in &collection.segments {
            let status = if segment.is_ok() { "ok" } else { "FAILED" };
            println!(
                "  {:<24} {:<10} {:>10} bytes {:>6} markers  {status}",
                segment.name,
                segment.kind,
                segment.size,
                segment.markers.len()
            );
            for problem in &segment.problems {
                println!("    error: {problem}");
            }
            for note in &segment.notes {
                println!("    note: {note}");
            }
            problems += segment.problems.len();
        }
    }

    println!();
    if problems == 0 {
        println!("✓ Database verification passed");
        Ok(())
    } else {
        println!("✗ Database verification failed");
        Err(CliError::VerificationFailed(problems))
    }
}

/// Scans every segment of every persistent collection.
pub fn check(path: &Path) -> Result<Vec<CollectionCheck>, CliError> {
    if !path.is_dir() {
        return Err(CliError::NoDatabase(path.display().to_string()));
    }
    let dir = DatabaseDir::open(path, false)?;
    let manifest = dir
        .load_manifest()?
        .ok_or_else(|| CliError::NoDatabase(path.display().to_string()))?;

    let mut checks = Vec::with_capacity(manifest.collections.len());
    for entry in &manifest.collections {
        let mut segments = Vec::new();
        let location = dir.collection_path(entry.id);
        if !entry.properties.is_volatile && location.is_dir() {
            let store = DirectoryStore::open(&location)?;
            for (name, file) in replay_order(&store)? {
                segments.push(scan_segment(&store, &name, file, entry.id)?);
            }
        }
        checks.push(CollectionCheck {
            name: entry.name.clone(),
            segments,
        });
    }
    Ok(checks)
}
