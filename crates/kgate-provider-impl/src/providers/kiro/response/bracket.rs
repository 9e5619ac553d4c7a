//! `[Called <name> with args: {...}]` annotations embedded in text.

use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

use super::DecodedToolCall;
use super::repair::sanitize_json;

fn bracket_call() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)\[Called\s+([A-Za-z0-9_]+)\s+with\s+args:\s*(\{.*?\})\]")
            .expect("static regex")
    })
}

/// Tool calls announced inline. Arguments that do not survive repair are
/// skipped.
pub fn parse_bracket_calls(raw: &str) -> Vec<DecodedToolCall> {
    bracket_call()
        .captures_iter(raw)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str();
            let arguments = sanitize_json(caps.get(2)?.as_str())?;
            Some(DecodedToolCall {
                id: format!("call_{}", Uuid::new_v4()),
                name: name.to_string(),
                arguments,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_inline_calls_and_repairs_arguments() {
        let raw = "Sure.\n[Called Read with args: {path: \"a.rs\",}] then \
                   [Called Bash with args: {\"cmd\": \"ls\"}] and [Called Bad with args: {oops]";
        let calls = parse_bracket_calls(raw);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "Read");
        assert_eq!(calls[0].arguments, "{\"path\": \"a.rs\"}");
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[1].arguments, "{\"cmd\": \"ls\"}");
    }
}
