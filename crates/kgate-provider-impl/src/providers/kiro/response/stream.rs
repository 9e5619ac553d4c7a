//! Line-oriented decoding of the upstream event stream.

use serde_json::{Deserializer, Map, Value};
use tracing::debug;

use super::DecodedToolCall;
use super::repair::normalize_arguments;

/// A tool call still receiving argument fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ToolCallFragment {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallFragment {
    fn finalize(self) -> Option<DecodedToolCall> {
        if self.name.trim().is_empty() {
            debug!(event = "tool_call_dropped", id = %self.id, reason = "missing name");
            return None;
        }
        match normalize_arguments(&self.arguments) {
            Some(arguments) => Some(DecodedToolCall {
                id: self.id,
                name: self.name,
                arguments,
            }),
            None => {
                debug!(
                    event = "tool_call_dropped",
                    id = %self.id,
                    name = %self.name,
                    reason = "unrecoverable arguments"
                );
                None
            }
        }
    }
}

/// Accumulates text and tool calls across stream lines.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    text: String,
    open: Vec<ToolCallFragment>,
    finished: Vec<DecodedToolCall>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, raw: &str) {
        for line in raw.lines() {
            self.feed_line(line);
        }
    }

    fn feed_line(&mut self, line: &str) {
        // Anything before the first brace is framing noise.
        let Some(start) = line.find('{') else {
            return;
        };
        let mut rest = &line[start..];
        while let Some((event, end)) = first_json_object(rest) {
            self.handle(event);
            match rest[end..].find('{') {
                Some(next) => rest = &rest[end + next..],
                None => break,
            }
        }
    }

    fn handle(&mut self, event: Map<String, Value>) {
        if is_metering(&event) || event.contains_key("contextUsagePercentage") {
            return;
        }
        if let Some(id) = event.get("toolUseId").and_then(Value::as_str) {
            self.handle_tool_event(id, &event);
            return;
        }
        if let Some(content) = event.get("content").and_then(Value::as_str) {
            if event.get("followupPrompt").is_some_and(is_truthy) {
                return;
            }
            self.text.push_str(&content.replace("\\n", "\n"));
        }
    }

    fn handle_tool_event(&mut self, id: &str, event: &Map<String, Value>) {
        let idx = match self.open.iter().position(|f| f.id == id) {
            Some(idx) => idx,
            None => {
                self.open.push(ToolCallFragment {
                    id: id.to_string(),
                    name: String::new(),
                    arguments: String::new(),
                });
                self.open.len() - 1
            }
        };
        let fragment = &mut self.open[idx];
        if let Some(name) = event.get("name").and_then(Value::as_str)
            && !name.trim().is_empty()
            && fragment.name.is_empty()
        {
            fragment.name = name.trim().to_string();
        }
        match event.get("input") {
            Some(Value::String(text)) => fragment.arguments.push_str(text),
            Some(Value::Null) | None => {}
            Some(other) => fragment.arguments.push_str(&other.to_string()),
        }
        if event.get("stop").is_some_and(is_truthy) {
            let fragment = self.open.remove(idx);
            self.finished.extend(fragment.finalize());
        }
    }

    /// Force-finalizes whatever is still open and returns the text and calls.
    pub fn finish(mut self) -> (String, Vec<DecodedToolCall>) {
        for fragment in std::mem::take(&mut self.open) {
            self.finished.extend(fragment.finalize());
        }
        (self.text, self.finished)
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::String(text) => text.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// `{"unit": ..., "unitPlural": ..., "usage": ...}` billing noise.
fn is_metering(event: &Map<String, Value>) -> bool {
    !event.is_empty()
        && event
            .keys()
            .all(|key| matches!(key.as_str(), "unit" | "unitPlural" | "usage"))
}

/// The JSON object `text` starts with, and the byte offset just past it.
/// Whatever follows the object is left unread.
fn first_json_object(text: &str) -> Option<(Map<String, Value>, usize)> {
    let mut values = Deserializer::from_str(text).into_iter::<Value>();
    match values.next()? {
        Ok(Value::Object(map)) => Some((map, values.byte_offset())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(raw: &str) -> (String, Vec<DecodedToolCall>) {
        let mut decoder = StreamDecoder::new();
        decoder.feed(raw);
        decoder.finish()
    }

    #[test]
    fn framing_noise_and_metering_are_ignored() {
        let raw = concat!(
            ":event-type\u{7}assistantResponseEvent{\"content\":\"Hello\"}\u{0}\u{3}junk}\n",
            "\u{b}{\"unit\":\"credit\",\"unitPlural\":\"credits\",\"usage\":0.02}\n",
            "{\"contextUsagePercentage\":12.5}\n",
            "no json here\n",
            "{\"content\":\" world\\\\nbye\"}\n",
            "{\"content\":\"Try asking...\",\"followupPrompt\":true}\n",
        );
        let (text, calls) = decode(raw);
        assert_eq!(text, "Hello world\nbye");
        assert!(calls.is_empty());
    }

    #[test]
    fn fragments_accumulate_until_stop() {
        let raw = [
            json!({"name": "f", "toolUseId": "x", "input": {"a": 1}}).to_string(),
            json!({"toolUseId": "x", "input": {"b": 2}, "stop": true}).to_string(),
        ]
        .join("\n");
        let (_, calls) = decode(&raw);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "f");
        let args: Value = serde_json::from_str(&calls[0].arguments).expect("json");
        assert_eq!(args, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn string_inputs_concatenate_and_open_fragments_finalize_at_end() {
        let raw = [
            json!({"name": "Read", "toolUseId": "t1", "input": "{\"path\":"}).to_string(),
            json!({"name": "Read", "toolUseId": "t1", "input": "\"a.rs\"}"}).to_string(),
            json!({"name": "Bad", "toolUseId": "t2", "input": "{\"x\": [", "stop": true}).to_string(),
        ]
        .join("\n");
        let (_, calls) = decode(&raw);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "t1");
        assert_eq!(calls[0].arguments, "{\"path\":\"a.rs\"}");
    }

    #[test]
    fn concatenated_objects_on_one_line() {
        let raw = "{\"content\":\"a\"}\u{b}{\"content\":\"b\"}{\"name\":\"n\",\"toolUseId\":\"i\",\"stop\":true}";
        let (text, calls) = decode(raw);
        assert_eq!(text, "ab");
        assert_eq!(calls[0].arguments, "{}");
    }

    #[test]
    fn leading_object_ends_at_its_closing_brace() {
        let (map, end) = first_json_object(r#"{"content":"a}b"}}} trailing {"x":1}"#).expect("object");
        assert_eq!(map["content"], "a}b");
        assert_eq!(end, 17);

        let noisy = format!("{{\"content\":\"x\"{}", "}".repeat(50_000));
        assert!(first_json_object(&noisy).is_some());
        assert!(first_json_object(&"}".repeat(50_000)).is_none());
        assert!(first_json_object(r#"{"content":"cut"#).is_none());
    }
}
