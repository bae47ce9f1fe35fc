//! Value marshalling at the host/guest boundary.
//!
//! Guest-to-host conversion is eager so results outlive the guest context
//! teardown. Host-to-guest-literal emitters exist only to bootstrap the
//! Python/Ruby trampolines' event argument; they are not a general data
//! channel.

use indexmap::IndexMap;
use value::HostValue;

use crate::engine::GuestValue;

/// Convert a guest value into host-native data. Classification order:
/// null, string, boolean, integral number, double, host-data passthrough,
/// array-like, `keys()`+`[]` mapping, plain object members (preferring
/// item access when both exist), and finally the display string.
pub fn marshal_guest(value: &dyn GuestValue) -> HostValue {
    if value.is_null() {
        return HostValue::Null;
    }
    if let Some(s) = value.as_str() {
        return HostValue::String(s.to_string());
    }
    if let Some(b) = value.as_bool() {
        return HostValue::Bool(b);
    }
    if let Some(i) = value.as_int() {
        return HostValue::Int64(i);
    }
    if let Some(f) = value.as_float() {
        return HostValue::Float64(f);
    }
    if let Some(host) = value.as_host_value() {
        return host.clone();
    }
    if let Some(len) = value.array_len() {
        let mut items = Vec::with_capacity(len);
        for index in 0..len {
            items.push(
                value
                    .array_element(index)
                    .map(|element| marshal_guest(&*element))
                    .unwrap_or(HostValue::Null),
            );
        }
        return HostValue::Array(items);
    }
    if let Some(keys) = value.mapping_keys() {
        let mut map = IndexMap::with_capacity(keys.len());
        for key in keys {
            let item = value
                .mapping_item(&key)
                .map(|item| marshal_guest(&*item))
                .unwrap_or(HostValue::Null);
            map.insert(key, item);
        }
        return HostValue::Map(map);
    }
    if let Some(keys) = value.member_keys() {
        let mut map = IndexMap::with_capacity(keys.len());
        for key in keys {
            let member = value
                .mapping_item(&key)
                .or_else(|| value.member(&key))
                .map(|member| marshal_guest(&*member))
                .unwrap_or(HostValue::Null);
            map.insert(key, member);
        }
        return HostValue::Map(map);
    }
    HostValue::String(value.to_display_string())
}

fn escape_literal_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

fn number_literal(f: f64) -> Option<String> {
    if !f.is_finite() {
        return None;
    }
    if f.fract() == 0.0 {
        Some(format!("{f:.1}"))
    } else {
        Some(format!("{f}"))
    }
}

/// Emit a Python literal for host data: `None`/`True`/`False`, decimal
/// numbers, single-quoted strings, dict and list literals.
pub fn python_literal(value: &HostValue) -> String {
    match value {
        HostValue::Null => "None".to_string(),
        HostValue::Bool(true) => "True".to_string(),
        HostValue::Bool(false) => "False".to_string(),
        HostValue::Int64(i) => i.to_string(),
        HostValue::Float64(f) => number_literal(*f).unwrap_or_else(|| "None".to_string()),
        HostValue::String(s) => format!("'{}'", escape_literal_string(s)),
        HostValue::Array(items) => {
            let rendered: Vec<String> = items.iter().map(python_literal).collect();
            format!("[{}]", rendered.join(", "))
        },
        HostValue::Map(map) => {
            let rendered: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("'{}': {}", escape_literal_string(k), python_literal(v)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        },
    }
}

/// Emit a Ruby literal for host data: `nil`/`true`/`false`, decimal
/// numbers, single-quoted strings, hash and array literals.
pub fn ruby_literal(value: &HostValue) -> String {
    match value {
        HostValue::Null => "nil".to_string(),
        HostValue::Bool(b) => b.to_string(),
        HostValue::Int64(i) => i.to_string(),
        HostValue::Float64(f) => number_literal(*f).unwrap_or_else(|| "nil".to_string()),
        HostValue::String(s) => format!("'{}'", escape_literal_string(s)),
        HostValue::Array(items) => {
            let rendered: Vec<String> = items.iter().map(ruby_literal).collect();
            format!("[{}]", rendered.join(", "))
        },
        HostValue::Map(map) => {
            let rendered: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("'{}' => {}", escape_literal_string(k), ruby_literal(v)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        },
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use value::HostValue;

    use super::{
        python_literal,
        ruby_literal,
    };

    fn sample_event() -> HostValue {
        let mut inner = IndexMap::new();
        inner.insert("flag".to_string(), HostValue::Bool(true));
        inner.insert("missing".to_string(), HostValue::Null);
        let mut map = IndexMap::new();
        map.insert(
            "name".to_string(),
            HostValue::String("O'Brien\n\tdone".to_string()),
        );
        map.insert("count".to_string(), HostValue::Int64(3));
        map.insert("ratio".to_string(), HostValue::Float64(0.5));
        map.insert("whole".to_string(), HostValue::Float64(2.0));
        map.insert(
            "items".to_string(),
            HostValue::Array(vec![HostValue::Int64(1), HostValue::Map(inner)]),
        );
        HostValue::Map(map)
    }

    #[test]
    fn python_literals_escape_and_nest() {
        let rendered = python_literal(&sample_event());
        assert_eq!(
            rendered,
            "{'name': 'O\\'Brien\\n\\tdone', 'count': 3, 'ratio': 0.5, 'whole': 2.0, \
             'items': [1, {'flag': True, 'missing': None}]}",
        );
    }

    #[test]
    fn ruby_literals_escape_and_nest() {
        let rendered = ruby_literal(&sample_event());
        assert_eq!(
            rendered,
            "{'name' => 'O\\'Brien\\n\\tdone', 'count' => 3, 'ratio' => 0.5, 'whole' => 2.0, \
             'items' => [1, {'flag' => true, 'missing' => nil}]}",
        );
    }

    #[test]
    fn backslashes_escape_before_quotes() {
        let v = HostValue::String("a\\'b".to_string());
        assert_eq!(python_literal(&v), "'a\\\\\\'b'");
    }
}
