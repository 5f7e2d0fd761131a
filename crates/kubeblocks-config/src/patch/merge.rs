use serde_json::Value;

use crate::object::Map;

/// Creates a JSON merge patch (RFC 7386) which turns `original` into `modified`.
///
/// Keys missing from `modified` are set to `null`, nested maps are diffed recursively and every
/// other changed value (including lists) is replaced as a whole.
pub fn create_merge_patch(original: &Value, modified: &Value) -> Value {
    let (Value::Object(original), Value::Object(modified)) = (original, modified) else {
        return modified.clone();
    };

    let mut patch = Map::new();

    for key in original.keys() {
        if !modified.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }

    for (key, new) in modified {
        match original.get(key) {
            Some(old) if old == new => {}
            Some(old @ Value::Object(_)) if new.is_object() => {
                let nested = create_merge_patch(old, new);
                if !is_empty_patch(&nested) {
                    patch.insert(key.clone(), nested);
                }
            }
            _ => {
                patch.insert(key.clone(), new.clone());
            }
        }
    }

    Value::Object(patch)
}

/// Applies a JSON merge patch created by [`create_merge_patch`].
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    json_patch::merge(target, patch);
}

pub fn is_empty_patch(patch: &Value) -> bool {
    match patch {
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
