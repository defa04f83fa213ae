//! JSON merge patch (RFC 7386) computation.
//!
//! The status aggregator never writes the live object back wholesale. It takes
//! a snapshot, mutates a copy, and sends only the difference between the two.
//! Fields another writer touched in the meantime are therefore left alone
//! unless this writer changed the very same field.

use serde_json::{Map, Value};

/// Compute the merge patch that turns `original` into `modified`.
///
/// Objects are diffed key by key, removed keys become `null`, and any other
/// value (including arrays) is replaced wholesale when it differs.
pub fn create_merge_patch(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(orig), Value::Object(next)) => {
            let mut patch = Map::new();
            for (key, old) in orig {
                match next.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(new) if new != old => {
                        patch.insert(key.clone(), create_merge_patch(old, new));
                    }
                    Some(_) => {}
                }
            }
            for (key, new) in next {
                if !orig.contains_key(key) {
                    patch.insert(key.clone(), new.clone());
                }
            }
            Value::Object(patch)
        }
        _ => modified.clone(),
    }
}

/// Apply a merge patch to `target` in place.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(target) = target else {
        return;
    };

    for (key, value) in patch {
        if value.is_null() {
            target.remove(key);
        } else {
            apply_merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
        }
    }
}

/// An empty object patch changes nothing.
pub fn is_empty_patch(patch: &Value) -> bool {
    matches!(patch, Value::Object(map) if map.is_empty())
}
