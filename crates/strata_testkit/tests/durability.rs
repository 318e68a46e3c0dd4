//! Integration tests for reopening databases after clean and unclean shutdowns.

use proptest::prelude::*;
use std::path::Path;
use strata_core::segment::SegmentFile;
use strata_core::{Database, OperationOptions};
use strata_testkit::crash;
use strata_testkit::fixtures::scenarios::{churn, key, populate};
use strata_testkit::prelude::*;

fn datafile_id(path: &Path) -> u64 {
    let name = path.file_name().unwrap().to_str().unwrap();
    match SegmentFile::parse(name) {
        Some(SegmentFile::Datafile(id)) => id.as_u64(),
        other => panic!("{name} is not a datafile: {other:?}"),
    }
}

#[test]
fn rotated_journals_replay_in_order() {
    let mut db = TestDatabase::file();
    let docs = db.create_collection("docs", small_properties()).unwrap();
    populate(&docs, 120, 64);
    churn(&docs, 120, 2);
    for i in (0..120).step_by(3) {
        docs.remove(&key(i), OperationOptions::default()).unwrap();
    }
    let before = docs.documents().unwrap();
    assert!(docs.figures().datafiles.count > 1);
    drop(docs);

    db.reopen();
    let docs = db.collection("docs").unwrap();
    assert_eq!(docs.documents().unwrap(), before);
    assert_eq!(docs.count(), 80);
    assert_eq!(docs.read(&key(1)).unwrap().body["round"], 1);
}

#[test]
fn torn_journal_loses_only_the_last_write() {
    let mut db = TestDatabase::file();
    let docs = db.create_collection("docs", small_properties()).unwrap();
    populate(&docs, 3, 0);
    drop(docs);

    db.damage_and_reopen(|path| crash::tear_journal(path, "docs", 20))
        .unwrap();
    let docs = db.collection("docs").unwrap();
    assert_eq!(docs.count(), 2);
    assert!(docs.read(&key(2)).is_err());

    // The cut journal keeps accepting writes and they survive.
    let written = docs
        .insert(serde_json::json!({"_key": key(2), "again": true}), OperationOptions::default())
        .unwrap();
    drop(docs);
    db.reopen();
    let docs = db.collection("docs").unwrap();
    let document = docs.read(&key(2)).unwrap();
    assert_eq!(document.revision, written.revision);
    assert_eq!(document.body["again"], true);
}

#[test]
fn partial_marker_after_the_last_write_is_dropped() {
    let mut db = TestDatabase::file();
    let docs = db.create_collection("docs", small_properties()).unwrap();
    populate(&docs, 5, 8);
    drop(docs);

    db.damage_and_reopen(|path| {
        let journal = crash::journal(path, "docs").unwrap();
        crash::append_partial_marker(&journal);
    })
    .unwrap();
    assert_eq!(db.collection("docs").unwrap().count(), 5);
}

#[test]
fn leftovers_of_interrupted_work_are_cleared() {
    let mut db = TestDatabase::file();
    let docs = db.create_collection("docs", small_properties()).unwrap();
    populate(&docs, 80, 64);
    let before = docs.documents().unwrap();
    drop(docs);

    let path = db.path().unwrap();
    let dir = crash::collection_dir(&path, "docs");
    let datafile = crash::segment_files(&dir, "datafile-").remove(0);
    let id = datafile_id(&datafile);

    let mut leftovers = Vec::new();
    db.damage_and_reopen(|_| {
        leftovers.push(crash::leave_compaction_output(&datafile, id));
        leftovers.push(crash::leave_temp_journal(&dir, 9_999));
    })
    .unwrap();

    for leftover in &leftovers {
        assert!(!leftover.exists(), "{} was not removed", leftover.display());
    }
    assert!(datafile.exists());
    assert_eq!(db.collection("docs").unwrap().documents().unwrap(), before);
}

#[test]
fn damaged_datafile_needs_ignore_errors() {
    let mut db = TestDatabase::file();
    let docs = db.create_collection("docs", small_properties()).unwrap();
    populate(&docs, 100, 64);
    drop(docs);

    let path = db.path().unwrap();
    let datafile = crash::segment_files(&crash::collection_dir(&path, "docs"), "datafile-").remove(0);
    let err = db
        .damage_and_reopen(|_| crash::flip_byte(&datafile, 100))
        .unwrap_err();
    assert!(err.is_corruption(), "{err}");

    let db = Database::open(&path, test_config().ignore_errors(true)).unwrap();
    let docs = db.collection("docs").unwrap();
    assert!(docs.read(&key(0)).is_err());
    assert!(docs.read(&key(99)).is_ok());
    assert!(docs.count() < 100);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn reopened_collection_matches_the_model(ops in ops_strategy(60)) {
        let mut db = TestDatabase::file();
        let docs = db.create_collection("docs", small_properties()).unwrap();
        let mut model = Model::new();
        for op in &ops {
            let expected = model.apply(op);
            prop_assert_eq!(Outcome::of(&run_op(&docs, op)), expected);
        }
        drop(docs);

        db.reopen();
        model.assert_matches(&db.collection("docs").unwrap());
    }
}
