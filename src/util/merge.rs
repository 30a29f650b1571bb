use serde_json::{Map, Value};

/// Recursively merges `source` over `target`.
///
/// Objects merge key by key, arrays and scalars from `source` replace what `target` holds,
/// and a `null` in `source` leaves the `target` value in place (an absent layer value means
/// "inherit").
pub fn deep_extend(target: &Value, source: &Value) -> Value {
    match (target, source) {
        (_, Value::Null) => target.clone(),
        (Value::Object(target_map), Value::Object(source_map)) => {
            let mut result = target_map.clone();
            for (key, value) in source_map {
                let merged = match result.get(key) {
                    Some(existing) => deep_extend(existing, value),
                    None => deep_extend(&Value::Null, value),
                };
                if !merged.is_null() {
                    result.insert(key.clone(), merged);
                }
            }
            Value::Object(result)
        }
        (_, Value::Object(_)) => deep_extend(&Value::Object(Map::new()), source),
        (_, other) => other.clone(),
    }
}

/// Folds `layers` from lowest to highest precedence.
pub fn merge_layers<'a, I>(layers: I) -> Value
where
    I: IntoIterator<Item = &'a Value>,
{
    layers
        .into_iter()
        .fold(Value::Object(Map::new()), |acc, layer| deep_extend(&acc, layer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn objects_merge_recursively() {
        let target = json!({"consent": {"analytics": false, "marketing": false}, "debug": false});
        let source = json!({"consent": {"analytics": true}});
        let merged = deep_extend(&target, &source);
        assert_eq!(merged["consent"]["analytics"], json!(true));
        assert_eq!(merged["consent"]["marketing"], json!(false));
        assert_eq!(merged["debug"], json!(false));
    }

    #[test]
    fn arrays_are_replaced_wholesale() {
        let target = json!({"analyticsProviders": [{"id": "a"}, {"id": "b"}]});
        let source = json!({"analyticsProviders": [{"id": "c"}]});
        let merged = deep_extend(&target, &source);
        assert_eq!(merged["analyticsProviders"], json!([{"id": "c"}]));
    }

    #[test]
    fn null_inherits_lower_layer() {
        let target = json!({"debug": true});
        let source = json!({"debug": null});
        assert_eq!(deep_extend(&target, &source)["debug"], json!(true));
    }

    #[test]
    fn layers_apply_in_increasing_precedence() {
        let defaults = json!({"batching": {"maxSize": 10, "timeoutMs": 5000}});
        let persisted = json!({"batching": {"maxSize": 20}});
        let options = json!({"batching": {"timeoutMs": 100}});
        let merged = merge_layers([&defaults, &persisted, &options]);
        assert_eq!(merged, json!({"batching": {"maxSize": 20, "timeoutMs": 100}}));
    }
}
