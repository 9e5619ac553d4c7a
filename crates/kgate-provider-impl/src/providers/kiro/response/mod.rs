//! Upstream response bytes -> assistant text and tool calls.
//!
//! Three shapes are understood: a single `conversationState` JSON document,
//! a line-oriented event stream (optionally wrapped in binary AWS
//! event-stream frames), and inline `[Called ...]` annotations.

mod bracket;
pub mod eventstream;
pub mod repair;
mod stream;

use std::collections::HashSet;

use serde_json::Value;

use crate::json_path::{get_path, get_str};

pub use bracket::parse_bracket_calls;
pub use stream::StreamDecoder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedToolCall {
    pub id: String,
    pub name: String,
    /// Always valid JSON text.
    pub arguments: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedResponse {
    pub text: String,
    pub tool_calls: Vec<DecodedToolCall>,
}

pub fn decode(data: &[u8]) -> DecodedResponse {
    if data.iter().all(u8::is_ascii_whitespace) {
        return DecodedResponse::default();
    }
    if let Some(decoded) = decode_document(data) {
        return decoded;
    }

    let raw = if eventstream::is_event_stream(data) {
        eventstream::payload_lines(data)
    } else {
        String::from_utf8_lossy(data).into_owned()
    };
    let mut decoder = StreamDecoder::new();
    decoder.feed(&raw);
    let (text, mut tool_calls) = decoder.finish();
    let text = text.trim().to_string();
    tool_calls.extend(parse_bracket_calls(&raw));
    if raw != text {
        tool_calls.extend(parse_bracket_calls(&text));
    }
    let tool_calls = dedupe(tool_calls);

    if text.is_empty() && tool_calls.is_empty() {
        return DecodedResponse {
            text: String::from_utf8_lossy(data).trim().to_string(),
            tool_calls,
        };
    }
    DecodedResponse { text, tool_calls }
}

/// `conversationState` document: the current assistant message, or the most
/// recent assistant turn in history.
fn decode_document(data: &[u8]) -> Option<DecodedResponse> {
    let root: Value = serde_json::from_slice(data).ok()?;
    let state = get_path(&root, "conversationState")?;
    let message = get_path(state, "currentMessage.assistantResponseMessage")
        .filter(|msg| get_str(msg, "content").is_some())
        .or_else(|| {
            get_path(state, "history")?
                .as_array()?
                .iter()
                .rev()
                .filter_map(|turn| get_path(turn, "assistantResponseMessage"))
                .find(|msg| get_str(msg, "content").is_some())
        })?;

    let text = get_str(message, "content").unwrap_or_default().to_string();
    let tool_calls = get_path(message, "toolUses")
        .and_then(Value::as_array)
        .map(|uses| {
            uses.iter()
                .filter_map(|tool_use| {
                    let name = get_str(tool_use, "name")?.trim();
                    if name.is_empty() {
                        return None;
                    }
                    let arguments = match get_path(tool_use, "input") {
                        Some(Value::String(text)) => repair::normalize_arguments(text)?,
                        Some(Value::Null) | None => "{}".to_string(),
                        Some(other) => other.to_string(),
                    };
                    Some(DecodedToolCall {
                        id: get_str(tool_use, "toolUseId").unwrap_or_default().to_string(),
                        name: name.to_string(),
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Some(DecodedResponse {
        text,
        tool_calls: dedupe(tool_calls),
    })
}

/// Drops repeated `(name, arguments)` pairs, keeping first occurrences.
pub fn dedupe(calls: Vec<DecodedToolCall>) -> Vec<DecodedToolCall> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .filter(|call| seen.insert(format!("{}:{}", call.name, call.arguments)))
        .collect()
}
