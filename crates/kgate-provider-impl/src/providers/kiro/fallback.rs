//! Smaller request shapes for when the upstream rejects the primary envelope.
//!
//! Both builders start from the serialized primary envelope so every stage
//! carries the same logical content.

use std::collections::HashMap;

use kgate_protocol::kiro::{
    ChatTurn, ConversationEnvelope, KiroToolResult, KiroToolUse, ORIGIN, UserInputMessage,
    UserInputMessageContext,
};
use kgate_provider_core::{ProviderError, ProviderResult};

use super::models::DEFAULT_MODEL_ID;

pub const FLATTEN_NOTE: &str = "[Structured tool transcripts were flattened into plain text because the structured request was rejected upstream.]";
const GENERIC_CONTINUATION: &str =
    "Please continue the conversation from where it left off and answer the latest request.";

const MAX_LINE_CHARS: usize = 400;
const MAX_TRANSCRIPT_LINES: usize = 60;
const MAX_CONTINUATION_CHARS: usize = 200;

fn parse(primary: &[u8]) -> ProviderResult<ConversationEnvelope> {
    serde_json::from_slice(primary)
        .map_err(|err| ProviderError::Other(format!("fallback: unreadable primary envelope: {err}")))
}

fn encode(envelope: &ConversationEnvelope) -> ProviderResult<Vec<u8>> {
    serde_json::to_vec(envelope).map_err(|err| ProviderError::Other(err.to_string()))
}

fn cap(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let mut out: String = flat.chars().take(max).collect();
    out.push_str("...");
    out
}

/// Meaningful user text of a turn; the `.` placeholder does not count.
fn user_text(msg: &UserInputMessage) -> Option<&str> {
    Some(msg.content.trim()).filter(|text| !text.is_empty() && *text != ".")
}

fn model_id(envelope: &ConversationEnvelope) -> String {
    let state = &envelope.conversation_state;
    std::iter::once(&state.current_message)
        .chain(state.history.iter().rev())
        .find_map(|turn| match turn {
            ChatTurn::UserInputMessage(msg) if !msg.model_id.is_empty() => Some(msg.model_id.clone()),
            _ => None,
        })
        .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string())
}

/// Renders turns as `User:` / `Assistant:` lines.
#[derive(Default)]
struct Transcript {
    lines: Vec<String>,
    tool_names: HashMap<String, String>,
}

impl Transcript {
    fn push_tool_uses(&mut self, uses: &[KiroToolUse]) {
        for tool_use in uses {
            self.tool_names
                .insert(tool_use.tool_use_id.clone(), tool_use.name.clone());
            self.lines.push(format!(
                "Assistant: Called {} with {}",
                tool_use.name,
                cap(&tool_use.input.to_string(), MAX_LINE_CHARS)
            ));
        }
    }

    fn push_tool_results(&mut self, results: &[KiroToolResult]) {
        for result in results {
            let name = self
                .tool_names
                .get(&result.tool_use_id)
                .cloned()
                .unwrap_or_else(|| result.tool_use_id.clone());
            let text = result
                .content
                .iter()
                .map(|block| block.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let outcome = if result.status == "error" { " (error)" } else { "" };
            self.lines.push(format!(
                "User: Result of calling the {name} tool{outcome}: {}",
                cap(&text, MAX_LINE_CHARS)
            ));
        }
    }

    fn push_turn(&mut self, turn: &ChatTurn) {
        match turn {
            ChatTurn::UserInputMessage(msg) => {
                if let Some(ctx) = &msg.user_input_message_context {
                    self.push_tool_results(&ctx.tool_results);
                }
                if let Some(text) = user_text(msg) {
                    self.lines.push(format!("User: {}", cap(text, MAX_LINE_CHARS)));
                }
            }
            ChatTurn::AssistantResponseMessage(msg) => {
                if !msg.content.trim().is_empty() {
                    self.lines
                        .push(format!("Assistant: {}", cap(&msg.content, MAX_LINE_CHARS)));
                }
                self.push_tool_uses(&msg.tool_uses);
            }
        }
    }

    fn render(&self) -> String {
        let skip = self.lines.len().saturating_sub(MAX_TRANSCRIPT_LINES);
        let mut out = Vec::with_capacity(self.lines.len() - skip + 1);
        if skip > 0 {
            out.push(format!("({skip} earlier lines omitted)"));
        }
        out.extend(self.lines[skip..].iter().cloned());
        out.join("\n")
    }
}

/// History collapsed into one text block on an empty-history request. The
/// current-message context keeps only tool definitions, tool choice and plan
/// mode.
pub fn build_flattened(primary: &[u8]) -> ProviderResult<Vec<u8>> {
    let mut envelope = parse(primary)?;
    let model_id = model_id(&envelope);
    let state = &mut envelope.conversation_state;

    let mut transcript = Transcript::default();
    for turn in &state.history {
        transcript.push_turn(turn);
    }

    let (request, context) = match &state.current_message {
        ChatTurn::UserInputMessage(msg) => {
            if let Some(ctx) = &msg.user_input_message_context {
                transcript.push_tool_results(&ctx.tool_results);
            }
            transcript.push_tool_uses(&msg.tool_uses);
            let context = msg
                .user_input_message_context
                .as_ref()
                .map(|ctx| UserInputMessageContext {
                    tools: ctx.tools.clone(),
                    claude_tool_choice: ctx.claude_tool_choice.clone(),
                    plan_mode: ctx.plan_mode.clone(),
                    ..Default::default()
                })
                .filter(|ctx| !ctx.is_empty());
            (user_text(msg).map(str::to_string), context)
        }
        turn @ ChatTurn::AssistantResponseMessage(_) => {
            transcript.push_turn(turn);
            (None, None)
        }
    };

    let mut sections = vec![FLATTEN_NOTE.to_string()];
    if !transcript.lines.is_empty() {
        sections.push(format!("Conversation so far:\n{}", transcript.render()));
    }
    sections.push(match request {
        Some(text) => format!("Current request:\n{text}"),
        None => GENERIC_CONTINUATION.to_string(),
    });

    state.history.clear();
    state.current_message = ChatTurn::UserInputMessage(UserInputMessage {
        content: sections.join("\n\n"),
        model_id,
        origin: ORIGIN.to_string(),
        images: Vec::new(),
        user_input_message_context: context,
        tool_uses: Vec::new(),
    });
    encode(&envelope)
}

/// One short continuation sentence, no history, no context.
pub fn build_minimal(primary: &[u8]) -> ProviderResult<Vec<u8>> {
    let mut envelope = parse(primary)?;
    let model_id = model_id(&envelope);
    let state = &mut envelope.conversation_state;

    let last_user = std::iter::once(&state.current_message)
        .chain(state.history.iter().rev())
        .find_map(|turn| match turn {
            ChatTurn::UserInputMessage(msg) => user_text(msg),
            ChatTurn::AssistantResponseMessage(_) => None,
        })
        .and_then(|text| text.lines().rev().map(str::trim).find(|line| !line.is_empty()))
        .map(|line| cap(line, MAX_CONTINUATION_CHARS));
    let content = match last_user {
        Some(request) => format!("Please continue and respond to the latest request: {request}"),
        None => GENERIC_CONTINUATION.to_string(),
    };

    state.history.clear();
    state.current_message = ChatTurn::UserInputMessage(UserInputMessage {
        content,
        model_id,
        origin: ORIGIN.to_string(),
        images: Vec::new(),
        user_input_message_context: None,
        tool_uses: Vec::new(),
    });
    encode(&envelope)
}
