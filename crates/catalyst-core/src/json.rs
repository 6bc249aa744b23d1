//! JSON helpers shared across crates.

use serde_json::Value;

/// Recursively merges `overlay` into `base`.
///
/// Objects merge key-by-key; any other value kind in `overlay` replaces
/// the value in `base`. Used for session metadata envelopes, where repeated
/// touches must accumulate context rather than clobber it.
#[must_use]
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deep_merge_nested_objects() {
        let base = json!({"forwardAuth": {"ip": "1.2.3.4", "host": "a"}});
        let overlay = json!({"forwardAuth": {"host": "b", "port": "443"}});

        let merged = deep_merge(base, overlay);
        assert_eq!(
            merged,
            json!({"forwardAuth": {"ip": "1.2.3.4", "host": "b", "port": "443"}})
        );
    }

    #[test]
    fn test_overlay_replaces_non_objects() {
        let merged = deep_merge(json!({"a": [1, 2]}), json!({"a": [3]}));
        assert_eq!(merged, json!({"a": [3]}));
    }

    #[test]
    fn test_merge_into_null() {
        let merged = deep_merge(Value::Null, json!({"a": 1}));
        assert_eq!(merged, json!({"a": 1}));
    }
}
