//! Object merging and attribute path access.

use serde_json::{Map, Value};

/// Controls how [`merge_patch`] treats nulls and nested objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// Keep `null` values from the patch. When false, a `null` removes the
    /// attribute from the target instead.
    pub keep_null: bool,
    /// Merge nested objects recursively instead of replacing them wholesale.
    pub merge_objects: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            keep_null: true,
            merge_objects: true,
        }
    }
}

/// Applies `patch` on top of `target`.
pub fn merge_patch(target: &mut Map<String, Value>, patch: &Map<String, Value>, options: MergeOptions) {
    for (name, value) in patch {
        if value.is_null() && !options.keep_null {
            target.remove(name);
            continue;
        }

        match (target.get_mut(name), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) if options.merge_objects => {
                merge_patch(existing, nested, options);
            }
            _ => {
                let mut value = value.clone();
                if !options.keep_null {
                    strip_nulls(&mut value);
                }
                target.insert(name.clone(), value);
            }
        }
    }
}

fn strip_nulls(value: &mut Value) {
    if let Value::Object(map) = value {
        map.retain(|_, v| !v.is_null());
        for nested in map.values_mut() {
            strip_nulls(nested);
        }
    }
}

/// Resolves a dotted attribute path such as `address.city`.
#[must_use]
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}
