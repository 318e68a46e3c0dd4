//! Integration tests for the compactor.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use strata_testkit::fixtures::scenarios::{churn, key, populate};
use strata_testkit::prelude::*;

const DOCUMENTS: usize = 60;

fn wait_for(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    done()
}

#[test]
fn churned_collection_shrinks_and_keeps_its_documents() {
    let mut db = TestDatabase::file_with(test_config().compaction(eager_compaction()));
    let docs = db.create_collection("docs", small_properties()).unwrap();
    populate(&docs, DOCUMENTS, 64);
    churn(&docs, DOCUMENTS, 3);
    let before = docs.documents().unwrap();
    let dead_before = docs.figures().totals.number_dead;
    assert!(dead_before > 0);

    let reports = db.compact_now().unwrap();
    assert!(!reports.is_empty());
    let reclaimed: u64 = reports.iter().map(|report| report.reclaimed()).sum();
    assert!(reclaimed > 0);
    assert_eq!(db.stats().bytes_reclaimed, reclaimed);
    assert!(docs.figures().totals.number_dead < dead_before);
    assert_eq!(docs.documents().unwrap(), before);
    drop(docs);

    db.reopen();
    let docs = db.collection("docs").unwrap();
    assert_eq!(docs.documents().unwrap(), before);
    assert_eq!(docs.read(&key(0)).unwrap().body["round"], 2);
}

#[test]
fn fully_removed_collection_compacts_to_nothing() {
    let db = TestDatabase::memory_with(test_config().compaction(eager_compaction()));
    let docs = db.create_collection("docs", small_properties()).unwrap();
    populate(&docs, DOCUMENTS, 64);
    docs.rotate_journal().unwrap();
    for i in 0..DOCUMENTS {
        docs.remove(&key(i), strata_core::OperationOptions::default()).unwrap();
    }
    docs.rotate_journal().unwrap();

    // One pass merges at most `max_files` segments.
    for _ in 0..DOCUMENTS {
        if db.compact_now().unwrap().is_empty() {
            break;
        }
    }
    let figures = docs.figures();
    assert_eq!(figures.documents, 0);
    assert_eq!(figures.totals.number_alive, 0);
    assert_eq!(figures.totals.number_dead, 0);
}

#[test]
fn background_compactor_collects_dead_versions() {
    let config = test_config().compaction(eager_compaction().enabled(true));
    let db = TestDatabase::memory_with(config);
    assert!(db.compactor_running());
    let docs = db.create_collection("docs", small_properties()).unwrap();
    populate(&docs, DOCUMENTS, 64);
    churn(&docs, DOCUMENTS, 3);

    let compacted = wait_for(Duration::from_secs(10), || db.stats().compaction_runs > 0);
    assert!(compacted, "the compactor never ran");
    assert_eq!(docs.count(), DOCUMENTS);
    for i in 0..DOCUMENTS {
        assert_eq!(docs.read(&key(i)).unwrap().body["round"], 2);
    }

    db.stop_compactor();
    assert!(!db.compactor_running());
}

#[test]
fn readers_see_every_document_while_compacting() {
    let config = test_config().compaction(eager_compaction().enabled(true));
    let db = TestDatabase::memory_with(config);
    let docs = db.create_collection("docs", small_properties()).unwrap();
    populate(&docs, DOCUMENTS, 64);

    let readers: Vec<_> = (0..3)
        .map(|t| {
            let docs = Arc::clone(&docs);
            thread::spawn(move || {
                for round in 0..20 {
                    for i in 0..DOCUMENTS {
                        let index = (i + t * 17 + round) % DOCUMENTS;
                        docs.read(&key(index)).expect("document vanished during compaction");
                    }
                }
            })
        })
        .collect();

    churn(&docs, DOCUMENTS, 3);
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(docs.count(), DOCUMENTS);
}

#[test]
fn prevented_compaction_is_skipped() {
    let db = TestDatabase::memory_with(test_config().compaction(eager_compaction()));
    let docs = db.create_collection("docs", small_properties()).unwrap();
    populate(&docs, DOCUMENTS, 64);
    churn(&docs, DOCUMENTS, 2);

    let reports = {
        let _prevented = docs.prevent_compaction();
        db.compact_now().unwrap()
    };
    assert!(reports.is_empty());
    assert_eq!(db.stats().compaction_runs, 0);

    assert!(!db.compact_now().unwrap().is_empty());
}
