//! Building stored bodies from user input.

use crate::types::RevisionId;
use strata_codec::{merge_patch, Map, MergeOptions, Value, KEY_FIELD, REV_FIELD};

/// Writes the system attributes into `body`.
pub fn stamp_body(mut body: Map<String, Value>, key: &str, revision: RevisionId) -> Value {
    body.insert(KEY_FIELD.to_string(), Value::String(key.to_string()));
    body.insert(REV_FIELD.to_string(), Value::from(revision.as_u64()));
    Value::Object(body)
}

/// True if `patch` carries anything besides `_key` and `_rev`.
#[must_use]
pub fn has_user_fields(patch: &Map<String, Value>) -> bool {
    patch.keys().any(|name| name != KEY_FIELD && name != REV_FIELD)
}

/// Applies an update patch to the current body.
#[must_use]
pub fn merged_body(
    current: &Value,
    patch: &Map<String, Value>,
    options: MergeOptions,
) -> Map<String, Value> {
    let mut merged = current.as_object().cloned().unwrap_or_default();
    let mut patch = patch.clone();
    patch.remove(KEY_FIELD);
    patch.remove(REV_FIELD);
    merge_patch(&mut merged, &patch, options);
    merged
}

/// Builds a replacement body; only the key survives from the old version.
#[must_use]
pub fn replaced_body(mut replacement: Map<String, Value>) -> Map<String, Value> {
    replacement.remove(KEY_FIELD);
    replacement.remove(REV_FIELD);
    replacement
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn stamping_overwrites_user_revision() {
        let body = stamp_body(object(json!({"_rev": 1, "a": 1})), "k", RevisionId::new(9));
        assert_eq!(body, json!({"_key": "k", "_rev": 9, "a": 1}));
    }

    #[test]
    fn update_keeps_system_attributes_out_of_patch() {
        let current = json!({"_key": "k", "_rev": 1, "a": {"x": 1}, "b": 2});
        let patch = object(json!({"_key": "other", "a": {"y": 2}, "b": null}));

        let merged = merged_body(&current, &patch, MergeOptions { keep_null: false, merge_objects: true });
        assert_eq!(Value::Object(merged), json!({"_key": "k", "_rev": 1, "a": {"x": 1, "y": 2}}));
    }

    #[test]
    fn user_fields() {
        assert!(!has_user_fields(&object(json!({"_key": "k", "_rev": 3}))));
        assert!(has_user_fields(&object(json!({"_key": "k", "v": 3}))));
        assert_eq!(replaced_body(object(json!({"_key": "k", "v": 1}))), object(json!({"v": 1})));
    }
}
