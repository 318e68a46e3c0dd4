//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random documents and operation
//! sequences over a small key space, so that operations collide often.

use proptest::prelude::*;
use serde_json::{json, Value};

/// Number of distinct keys [`op_strategy`] draws from.
pub const KEY_SPACE: usize = 8;

/// One document operation against a single collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Insert `{_key, v}`.
    Insert {
        /// Document key.
        key: String,
        /// Value of `v`.
        value: i64,
    },
    /// Merge `{v}` into the document.
    Update {
        /// Document key.
        key: String,
        /// New value of `v`.
        value: i64,
    },
    /// Replace the body with `{w}`.
    Replace {
        /// Document key.
        key: String,
        /// Value of `w`.
        value: i64,
    },
    /// Remove the document.
    Remove {
        /// Document key.
        key: String,
    },
}

impl Op {
    /// The key the operation targets.
    pub fn key(&self) -> &str {
        match self {
            Self::Insert { key, .. }
            | Self::Update { key, .. }
            | Self::Replace { key, .. }
            | Self::Remove { key } => key,
        }
    }
}

/// Strategy for keys from a pool of [`KEY_SPACE`] names.
pub fn key_strategy() -> impl Strategy<Value = String> {
    (0..KEY_SPACE).prop_map(|i| format!("k{i}"))
}

/// Strategy for valid user-supplied document keys.
pub fn document_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_:.@()+,=;$!*'%-]{1,64}").expect("Invalid regex")
}

/// Strategy for flat document bodies without system attributes.
pub fn body_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"),
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            prop::string::string_regex("[ -~]{0,40}")
                .expect("Invalid regex")
                .prop_map(Value::from),
            Just(Value::Null),
        ],
        0..6,
    )
    .prop_map(|fields| json!(fields))
}

/// Strategy for a single operation.
pub fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (key_strategy(), any::<i64>()).prop_map(|(key, value)| Op::Insert { key, value }),
        3 => (key_strategy(), any::<i64>()).prop_map(|(key, value)| Op::Update { key, value }),
        1 => (key_strategy(), any::<i64>()).prop_map(|(key, value)| Op::Replace { key, value }),
        2 => key_strategy().prop_map(|key| Op::Remove { key }),
    ]
}

/// Strategy for a sequence of up to `max` operations.
pub fn ops_strategy(max: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(), 1..max)
}
