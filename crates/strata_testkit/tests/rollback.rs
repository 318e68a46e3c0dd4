//! Integration tests for aborted transactions and failed writes.

use proptest::prelude::*;
use serde_json::json;
use strata_core::{CoreError, IndexDefinition, OperationOptions};
use strata_testkit::prelude::*;

#[test]
fn aborted_transaction_leaves_no_trace_after_reopen() {
    let mut db = TestDatabase::file();
    let docs = db.create_collection("docs", small_properties()).unwrap();
    docs.insert(json!({"_key": "a", "n": 1}), OperationOptions::default())
        .unwrap();
    let before = docs.documents().unwrap();

    let mut txn = db.begin().unwrap();
    txn.update(&docs, "a", json!({"n": 2}), OperationOptions::default())
        .unwrap();
    txn.insert(&docs, json!({"_key": "b"}), OperationOptions::default())
        .unwrap();
    txn.remove(&docs, "a", OperationOptions::default()).unwrap();
    assert_eq!(txn.write_count(), 3);
    txn.abort().unwrap();

    assert_eq!(docs.documents().unwrap(), before);
    let figures = docs.figures();
    assert_eq!(figures.documents, 1);
    assert_eq!(figures.totals.number_alive, 1);
    drop(docs);

    db.reopen();
    let docs = db.collection("docs").unwrap();
    assert_eq!(docs.documents().unwrap(), before);
    assert_eq!(docs.figures().totals.number_alive, 1);
}

#[test]
fn unique_violation_inside_a_transaction_keeps_earlier_writes() {
    let db = TestDatabase::memory();
    let users = db.create_collection("users", small_properties()).unwrap();
    db.create_index("users", IndexDefinition::new("by_email", ["email"]).unique())
        .unwrap();

    let mut txn = db.begin().unwrap();
    txn.insert(&users, json!({"_key": "a", "email": "a@x"}), OperationOptions::default())
        .unwrap();
    let err = txn
        .insert(&users, json!({"_key": "b", "email": "a@x"}), OperationOptions::default())
        .unwrap_err();
    assert!(matches!(err, CoreError::UniqueConstraintViolated { .. }));
    assert_eq!(txn.write_count(), 1);
    txn.commit().unwrap();

    assert_eq!(users.count(), 1);
    assert!(users.read("b").is_err());
    let found = users.lookup_by_index("by_email", &json!("a@x")).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].key, "a");
}

#[test]
fn stale_revision_is_a_conflict() {
    let db = TestDatabase::memory();
    let docs = db.create_collection("docs", small_properties()).unwrap();
    let first = docs
        .insert(json!({"_key": "a", "n": 1}), OperationOptions::default())
        .unwrap();
    docs.update("a", json!({"n": 2}), OperationOptions::default())
        .unwrap();

    let err = docs
        .update("a", json!({"n": 3}), OperationOptions::default().expect(first.revision))
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict { .. }), "{err}");
    assert_eq!(docs.read("a").unwrap().body["n"], 2);
    assert_eq!(db.stats().conflicts, 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn transactions_commit_or_vanish_as_a_whole(
        setup in ops_strategy(20),
        ops in ops_strategy(20),
        commit in any::<bool>(),
    ) {
        let db = TestDatabase::memory();
        let docs = db.create_collection("docs", small_properties()).unwrap();
        let mut model = Model::new();
        for op in &setup {
            let expected = model.apply(op);
            prop_assert_eq!(Outcome::of(&run_op(&docs, op)), expected);
        }

        let mut inside = model.clone();
        let mut txn = db.begin().unwrap();
        for op in &ops {
            let expected = inside.apply(op);
            prop_assert_eq!(Outcome::of(&run_op_in(&mut txn, &docs, op)), expected);
        }
        if commit {
            txn.commit().unwrap();
            inside.assert_matches(&docs);
        } else {
            txn.abort().unwrap();
            model.assert_matches(&docs);
        }
    }
}
