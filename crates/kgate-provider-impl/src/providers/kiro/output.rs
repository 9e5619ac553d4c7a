use serde_json::{Value, json};
use time::OffsetDateTime;
use uuid::Uuid;

use kgate_protocol::claude::{
    ContentBlock, ContentBlockDelta, MessageDeltaBody, MessageResponse, MessageType, StopReason,
    StreamEvent, Usage,
};
use kgate_protocol::openai::{
    AssistantMessage, ChatCompletion, ChatCompletionChoice, ChatCompletionChunk,
    ChatCompletionChunkObjectType, ChatCompletionObjectType, ChunkChoice, ChunkDelta,
    ChunkToolCall, CompletionUsage, FinishReason, FunctionCall, ToolCall, ToolCallType,
};

use super::response::{DecodedResponse, DecodedToolCall};

/// Rough token count: a quarter of the characters, rounded up.
pub fn estimate_tokens(text: &str) -> i64 {
    text.chars().count().div_ceil(4) as i64
}

fn finish_reason(decoded: &DecodedResponse) -> FinishReason {
    if decoded.tool_calls.is_empty() {
        FinishReason::Stop
    } else {
        FinishReason::ToolCalls
    }
}

fn function_call(call: &DecodedToolCall) -> FunctionCall {
    FunctionCall {
        name: call.name.clone(),
        arguments: call.arguments.clone(),
    }
}

pub fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

pub fn build_completion(model: &str, prompt_tokens: i64, decoded: &DecodedResponse) -> ChatCompletion {
    let completion_tokens = estimate_tokens(&decoded.text);
    ChatCompletion {
        id: completion_id(),
        object: ChatCompletionObjectType::ChatCompletion,
        created: OffsetDateTime::now_utc().unix_timestamp(),
        model: model.to_string(),
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: AssistantMessage {
                role: "assistant".to_string(),
                content: decoded.text.clone(),
                tool_calls: decoded
                    .tool_calls
                    .iter()
                    .map(|call| ToolCall {
                        id: call.id.clone(),
                        kind: ToolCallType::Function,
                        function: function_call(call),
                    })
                    .collect(),
            },
            finish_reason: finish_reason(decoded),
        }],
        usage: CompletionUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
    }
}

/// Role chunk, content chunk, one chunk with every tool call, final chunk.
pub fn build_chunks(model: &str, decoded: &DecodedResponse) -> Vec<ChatCompletionChunk> {
    let id = completion_id();
    let created = OffsetDateTime::now_utc().unix_timestamp();
    let chunk = |delta: ChunkDelta, finish_reason: Option<FinishReason>| ChatCompletionChunk {
        id: id.clone(),
        object: ChatCompletionChunkObjectType::ChatCompletionChunk,
        created,
        model: model.to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        }],
    };

    let mut chunks = vec![chunk(
        ChunkDelta {
            role: Some("assistant".to_string()),
            ..Default::default()
        },
        None,
    )];
    if !decoded.text.trim().is_empty() {
        chunks.push(chunk(
            ChunkDelta {
                content: Some(decoded.text.clone()),
                ..Default::default()
            },
            None,
        ));
    }
    if !decoded.tool_calls.is_empty() {
        let tool_calls = decoded
            .tool_calls
            .iter()
            .enumerate()
            .map(|(index, call)| ChunkToolCall {
                index: index as i64,
                id: call.id.clone(),
                kind: ToolCallType::Function,
                function: function_call(call),
            })
            .collect();
        chunks.push(chunk(
            ChunkDelta {
                tool_calls,
                ..Default::default()
            },
            None,
        ));
    }
    chunks.push(chunk(ChunkDelta::default(), Some(finish_reason(decoded))));
    chunks
}

pub fn message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

fn stop_reason(decoded: &DecodedResponse) -> StopReason {
    if decoded.tool_calls.is_empty() {
        StopReason::EndTurn
    } else {
        StopReason::ToolUse
    }
}

/// Tool input object. Arguments that are not a JSON object are wrapped as
/// `{"value": <arguments>}`.
fn tool_input(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return json!({});
    }
    match serde_json::from_str::<Value>(arguments) {
        Ok(value) if value.is_object() => value,
        _ => json!({ "value": arguments }),
    }
}

fn message_usage(prompt_tokens: i64, decoded: &DecodedResponse) -> Usage {
    Usage {
        input_tokens: prompt_tokens,
        output_tokens: estimate_tokens(&decoded.text),
    }
}

pub fn build_message(model: &str, prompt_tokens: i64, decoded: &DecodedResponse) -> MessageResponse {
    let mut content = Vec::new();
    if !decoded.text.trim().is_empty() {
        content.push(ContentBlock::Text {
            text: decoded.text.clone(),
        });
    }
    content.extend(decoded.tool_calls.iter().map(|call| ContentBlock::ToolUse {
        id: call.id.clone(),
        name: call.name.clone(),
        input: tool_input(&call.arguments),
    }));
    MessageResponse {
        id: message_id(),
        r#type: MessageType::Message,
        role: "assistant".to_string(),
        model: model.to_string(),
        content,
        stop_reason: Some(stop_reason(decoded)),
        stop_sequence: None,
        usage: message_usage(prompt_tokens, decoded),
    }
}

/// `message_start`, one start/delta/stop triple per content block (text
/// first, then each tool call), `message_delta` and `message_stop`.
pub fn build_message_events(
    model: &str,
    prompt_tokens: i64,
    decoded: &DecodedResponse,
) -> Vec<StreamEvent> {
    let usage = message_usage(prompt_tokens, decoded);
    let mut events = vec![StreamEvent::MessageStart {
        message: MessageResponse {
            id: message_id(),
            r#type: MessageType::Message,
            role: "assistant".to_string(),
            model: model.to_string(),
            content: Vec::new(),
            stop_reason: None,
            stop_sequence: None,
            usage: Usage {
                input_tokens: prompt_tokens,
                output_tokens: 0,
            },
        },
    }];

    let mut index = 0u32;
    let mut block = |start: ContentBlock, delta: ContentBlockDelta| {
        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: start,
        });
        events.push(StreamEvent::ContentBlockDelta { index, delta });
        events.push(StreamEvent::ContentBlockStop { index });
        index += 1;
    };
    if !decoded.text.trim().is_empty() {
        block(
            ContentBlock::Text {
                text: String::new(),
            },
            ContentBlockDelta::TextDelta {
                text: decoded.text.clone(),
            },
        );
    }
    for call in &decoded.tool_calls {
        let input = tool_input(&call.arguments);
        block(
            ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: json!({}),
            },
            ContentBlockDelta::InputJsonDelta {
                partial_json: input.to_string(),
            },
        );
    }

    events.push(StreamEvent::MessageDelta {
        delta: MessageDeltaBody {
            stop_reason: Some(stop_reason(decoded)),
            stop_sequence: None,
        },
        usage,
    });
    events.push(StreamEvent::MessageStop);
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(text: &str, calls: usize) -> DecodedResponse {
        DecodedResponse {
            text: text.to_string(),
            tool_calls: (0..calls)
                .map(|i| DecodedToolCall {
                    id: format!("call_{i}"),
                    name: "f".to_string(),
                    arguments: "{}".to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn token_estimate() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn completion_reports_tool_calls() {
        let completion = build_completion("claude-sonnet-4-5", 3, &decoded("hi", 1));
        let choice = &completion.choices[0];
        assert_eq!(choice.finish_reason, FinishReason::ToolCalls);
        assert_eq!(choice.message.tool_calls[0].function.name, "f");
        assert_eq!(completion.usage.total_tokens, 4);

        let value = serde_json::to_value(build_completion("m", 0, &decoded("hi", 0))).expect("json");
        assert_eq!(value["object"], "chat.completion");
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
        assert!(value["choices"][0]["message"].get("tool_calls").is_none());
    }

    #[test]
    fn chunk_sequence() {
        let chunks = build_chunks("m", &decoded("hello", 2));
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(chunks[1].choices[0].delta.content.as_deref(), Some("hello"));
        assert_eq!(chunks[2].choices[0].delta.tool_calls[1].index, 1);
        assert_eq!(chunks[3].choices[0].finish_reason, Some(FinishReason::ToolCalls));
        assert!(chunks.iter().all(|c| c.id == chunks[0].id));

        let chunks = build_chunks("m", &decoded("  ", 0));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].choices[0].finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn message_body_carries_text_then_tool_blocks() {
        let mut response = decoded("hello", 1);
        response.tool_calls[0].arguments = r#"{"path":"a.rs"}"#.to_string();
        let message = build_message("claude-sonnet-4-5", 7, &response);
        assert!(message.id.starts_with("msg_"));
        assert_eq!(message.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(message.usage.input_tokens, 7);
        assert_eq!(
            message.content,
            vec![
                ContentBlock::Text {
                    text: "hello".to_string()
                },
                ContentBlock::ToolUse {
                    id: "call_0".to_string(),
                    name: "f".to_string(),
                    input: json!({"path": "a.rs"}),
                },
            ]
        );

        let message = build_message("m", 0, &decoded("done", 0));
        assert_eq!(message.stop_reason, Some(StopReason::EndTurn));
    }

    #[test]
    fn non_object_arguments_are_wrapped() {
        assert_eq!(tool_input(""), json!({}));
        assert_eq!(tool_input("[1,2]"), json!({"value": "[1,2]"}));
        assert_eq!(tool_input("plain"), json!({"value": "plain"}));
    }

    #[test]
    fn message_event_sequence() {
        let events = build_message_events("m", 2, &decoded("hi", 2));
        let names: Vec<&str> = events.iter().map(StreamEvent::event_name).collect();
        assert_eq!(
            names,
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        assert!(matches!(
            &events[8],
            StreamEvent::ContentBlockDelta {
                index: 2,
                delta: ContentBlockDelta::InputJsonDelta { partial_json }
            } if partial_json == "{}"
        ));
        assert!(matches!(
            &events[10],
            StreamEvent::MessageDelta { delta, .. } if delta.stop_reason == Some(StopReason::ToolUse)
        ));

        let events = build_message_events("m", 0, &decoded(" ", 0));
        assert_eq!(events.len(), 3);
    }
}
