use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::HostValue;

/// Convert a JSON document into a [`HostValue`]. Numbers that fit in `i64`
/// stay integral; everything else becomes a double. Object key order is
/// preserved (serde_json is built with `preserve_order`).
pub fn json_to_host(value: &JsonValue) -> HostValue {
    match value {
        JsonValue::Null => HostValue::Null,
        JsonValue::Bool(b) => HostValue::Bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                HostValue::Int64(i)
            } else {
                HostValue::Float64(n.as_f64().unwrap_or(f64::NAN))
            }
        },
        JsonValue::String(s) => HostValue::String(s.clone()),
        JsonValue::Array(items) => HostValue::Array(items.iter().map(json_to_host).collect()),
        JsonValue::Object(fields) => {
            let mut map = IndexMap::with_capacity(fields.len());
            for (k, v) in fields {
                map.insert(k.clone(), json_to_host(v));
            }
            HostValue::Map(map)
        },
    }
}

/// Convert a [`HostValue`] back into JSON. Non-finite doubles have no JSON
/// representation and degrade to null.
pub fn host_to_json(value: &HostValue) -> JsonValue {
    match value {
        HostValue::Null => JsonValue::Null,
        HostValue::Bool(b) => JsonValue::Bool(*b),
        HostValue::Int64(i) => JsonValue::from(*i),
        HostValue::Float64(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        HostValue::String(s) => JsonValue::String(s.clone()),
        HostValue::Array(items) => JsonValue::Array(items.iter().map(host_to_json).collect()),
        HostValue::Map(map) => {
            let mut fields = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                fields.insert(k.clone(), host_to_json(v));
            }
            JsonValue::Object(fields)
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn integral_numbers_stay_integral() {
        let v = json_to_host(&json!({"count": 3, "ratio": 0.5}));
        let map = v.as_map().unwrap();
        assert_eq!(map["count"], HostValue::Int64(3));
        assert_eq!(map["ratio"], HostValue::Float64(0.5));
    }

    #[test]
    fn round_trip_preserves_structure() {
        let doc = json!({
            "name": "World",
            "nested": {"items": [1, "two", null, true]},
        });
        assert_eq!(host_to_json(&json_to_host(&doc)), doc);
    }
}
