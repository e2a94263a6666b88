//! Deep-merge and path operations on the JSON wallet tree.
//!
//! The wallet object is a `serde_json::Map`; merge semantics are the ones
//! the sync engine depends on: same-keyed objects merge recursively, arrays
//! and scalars overwrite. Merge cannot delete a field, so deletion is a
//! separate path-based operation.

use serde_json::{Map, Value};

/// Merge `patch` into `base` in place.
pub fn deep_merge(base: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, incoming) in patch {
        match (base.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(patch_obj)) => {
                deep_merge(existing, patch_obj);
            }
            (_, value) => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// The merge of `base` and `patch`, leaving both inputs untouched.
pub fn merged(base: &Map<String, Value>, patch: &Map<String, Value>) -> Map<String, Value> {
    let mut out = base.clone();
    deep_merge(&mut out, patch);
    out
}

/// Remove the field at a dot-separated `path`.
///
/// Returns whether a field was actually removed. Traversal stops at any
/// non-object intermediate value.
pub fn delete_field(tree: &mut Map<String, Value>, path: &str) -> bool {
    match path.split_once('.') {
        None => tree.remove(path).is_some(),
        Some((head, rest)) => match tree.get_mut(head) {
            Some(Value::Object(child)) => delete_field(child, rest),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn objects_merge_recursively() {
        let mut base = obj(json!({"a": {"x": 1, "y": 2}, "b": 1}));
        let patch = obj(json!({"a": {"y": 3, "z": 4}}));
        deep_merge(&mut base, &patch);
        assert_eq!(
            Value::Object(base),
            json!({"a": {"x": 1, "y": 3, "z": 4}, "b": 1})
        );
    }

    #[test]
    fn arrays_and_scalars_overwrite() {
        let mut base = obj(json!({"list": [1, 2, 3], "n": 1, "o": {"k": 1}}));
        let patch = obj(json!({"list": [9], "n": {"now": "object"}, "o": "scalar"}));
        deep_merge(&mut base, &patch);
        assert_eq!(
            Value::Object(base),
            json!({"list": [9], "n": {"now": "object"}, "o": "scalar"})
        );
    }

    #[test]
    fn merged_preserves_inputs() {
        let base = obj(json!({"a": 1}));
        let patch = obj(json!({"b": 2}));
        let out = merged(&base, &patch);
        assert_eq!(Value::Object(out), json!({"a": 1, "b": 2}));
        assert_eq!(base.len(), 1);
        assert_eq!(patch.len(), 1);
    }

    #[test]
    fn merge_with_identical_patch_is_noop() {
        let base = obj(json!({"a": {"b": [1, 2]}, "c": "x"}));
        let out = merged(&base, &base.clone());
        assert_eq!(out, base);
    }

    #[test]
    fn delete_field_walks_paths() {
        let mut tree = obj(json!({"a": {"b": {"c": 1, "d": 2}}, "top": true}));
        assert!(delete_field(&mut tree, "a.b.c"));
        assert_eq!(Value::Object(tree.clone()), json!({"a": {"b": {"d": 2}}, "top": true}));

        assert!(delete_field(&mut tree, "top"));
        assert!(!delete_field(&mut tree, "top"));
        assert!(!delete_field(&mut tree, "a.missing.c"));
        assert!(!delete_field(&mut tree, "a.b.d.too_deep"));
    }
}
