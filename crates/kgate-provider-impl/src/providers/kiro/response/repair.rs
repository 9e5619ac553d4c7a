//! Best-effort repair of tool-call argument text.
//!
//! Upstream argument buffers are concatenations of raw JSON fragments and are
//! occasionally not JSON at all (bare keys, trailing commas). Repair is purely
//! syntactic; anything that still fails to parse is dropped, never guessed.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Deserializer, Map, Value};

fn trailing_comma() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*([}\]])").expect("static regex"))
}

fn bare_key() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([{,]\s*)([A-Za-z0-9_]+)\s*:"#).expect("static regex"))
}

/// Strips trailing commas and quotes bare identifier keys. Returns the text
/// only when the result parses as JSON.
pub fn sanitize_json(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    let value = repair_text(input);
    serde_json::from_str::<Value>(&value).is_ok().then_some(value)
}

fn repair_text(input: &str) -> String {
    let value = trailing_comma().replace_all(input, "$1");
    bare_key().replace_all(&value, r#"$1"$2":"#).into_owned()
}

/// Folds a run of concatenated JSON objects (`{"a":1}{"b":2}`) into one
/// object. Later keys win. `None` unless the whole input is objects.
pub fn merge_objects(input: &str) -> Option<String> {
    let mut merged = Map::new();
    let mut count = 0;
    for value in Deserializer::from_str(input).into_iter::<Value>() {
        match value {
            Ok(Value::Object(map)) => {
                merged.extend(map);
                count += 1;
            }
            _ => return None,
        }
    }
    (count > 0).then(|| Value::Object(merged).to_string())
}

/// Final argument text for an accumulated buffer, or `None` when it cannot be
/// recovered. An empty buffer means "no arguments".
pub fn normalize_arguments(buffer: &str) -> Option<String> {
    let buffer = buffer.trim();
    if buffer.is_empty() {
        return Some("{}".to_string());
    }
    if serde_json::from_str::<Value>(buffer).is_ok() {
        return Some(buffer.to_string());
    }
    if let Some(merged) = merge_objects(buffer) {
        return Some(merged);
    }
    sanitize_json(buffer).or_else(|| merge_objects(&repair_text(buffer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parsed(text: &str) -> Value {
        serde_json::from_str(text).expect("valid json")
    }

    #[test]
    fn trailing_commas_are_removed() {
        assert_eq!(
            sanitize_json(r#"{"a": 1, "b": [1, 2,],}"#).as_deref(),
            Some(r#"{"a": 1, "b": [1, 2]}"#)
        );
    }

    #[test]
    fn bare_keys_are_quoted() {
        assert_eq!(
            sanitize_json(r#"{path: "src/main.rs", limit: 10}"#).as_deref(),
            Some(r#"{"path": "src/main.rs", "limit": 10}"#)
        );
    }

    #[test]
    fn unrecoverable_text_is_rejected() {
        assert_eq!(sanitize_json(r#"{"a": "#), None);
        assert_eq!(sanitize_json("   "), None);
        assert_eq!(normalize_arguments(r#"{"a": [1, 2"#), None);
    }

    #[test]
    fn concatenated_objects_merge() {
        let merged = normalize_arguments(r#"{"a":1}{"b":2}"#).expect("merged");
        assert_eq!(parsed(&merged), json!({"a": 1, "b": 2}));
        assert_eq!(merge_objects(r#"{"a":1}[2]"#), None);
    }

    #[test]
    fn repaired_fragments_merge() {
        let merged = normalize_arguments(r#"{a:1,}{b:2}"#).expect("merged");
        assert_eq!(parsed(&merged), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn empty_and_valid_buffers() {
        assert_eq!(normalize_arguments("").as_deref(), Some("{}"));
        assert_eq!(normalize_arguments(r#" {"x":true} "#).as_deref(), Some(r#"{"x":true}"#));
    }
}
