//! Dotted-path access over `serde_json::Value`.
//!
//! Segments address object keys; a segment that parses as an integer also
//! indexes arrays. Missing intermediate nodes read as `None`.

use serde_json::Value;

pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |node, segment| match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

pub fn get_str<'a>(value: &'a Value, path: &str) -> Option<&'a str> {
    get_path(value, path).and_then(Value::as_str)
}
