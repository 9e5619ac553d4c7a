//! Generic chat request -> upstream `conversationState` envelope.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use kgate_protocol::chat::{ChatRequest, ContentPart, Message, Metadata, Role, ToolSpec};
use kgate_protocol::kiro::{
    AssistantResponseMessage, CHAT_TRIGGER_TYPE, ChatTurn, ConversationEnvelope,
    ConversationState, InputSchema, KiroImage, KiroImageSource, KiroTool, KiroToolResult,
    KiroToolUse, ORIGIN, TextBlock, ToolChoiceMeta, ToolContextEntry, ToolSpecification,
    UserInputMessage, UserInputMessageContext,
};
use kgate_provider_core::{KiroCredential, ProviderError, ProviderResult};

use super::models::map_model;
use super::plan::plan_mode;

pub const MAX_TOOL_DESCRIPTION_CHARS: usize = 256;
const EMPTY_USER_CONTENT: &str = ".";

/// Builds the envelope and serializes it.
pub fn build(
    model: &str,
    req: &ChatRequest,
    cred: &KiroCredential,
    metadata: &Metadata,
) -> ProviderResult<Vec<u8>> {
    let envelope = build_envelope(model, req, cred, metadata)?;
    serde_json::to_vec(&envelope).map_err(|err| ProviderError::Other(err.to_string()))
}

pub fn build_envelope(
    model: &str,
    req: &ChatRequest,
    cred: &KiroCredential,
    metadata: &Metadata,
) -> ProviderResult<ConversationEnvelope> {
    let Some((last, earlier)) = req.messages.split_last() else {
        return Err(ProviderError::InvalidRequest("messages must not be empty".to_string()));
    };
    let model_id = map_model(model);

    let (tools, manifest) = convert_tools(&req.tools, &req.messages);
    let choice = req.tool_choice.as_ref().and_then(parse_tool_choice);
    let (plan, plan_directive) = match plan_mode(&req.tools, &req.messages) {
        Some((meta, directive)) => (Some(meta), directive),
        None => (None, None),
    };
    let system = combine([
        req.system_text().map(|s| sanitize_text(&s)),
        manifest_block(&manifest),
        choice.as_ref().map(|(_, directive)| directive.clone()),
        plan_directive,
    ]);

    // The system prompt rides on the first user turn when there is one.
    let merge_system = req.messages[0].role == Role::User;
    let mut system_prefix = if merge_system { system.clone() } else { None };
    let mut history = Vec::with_capacity(req.messages.len());
    if !merge_system && let Some(system) = system {
        history.push(ChatTurn::UserInputMessage(user_turn(
            system,
            model_id,
            TurnParts::default(),
            None,
        )));
    }

    for message in earlier {
        let mut parts = TurnParts::collect(message);
        if message.role != Role::Assistant
            && let Some(prefix) = system_prefix.take()
        {
            parts.text = combine([Some(prefix), Some(parts.text)]).unwrap_or_default();
        }
        history.push(match message.role {
            Role::Assistant => ChatTurn::AssistantResponseMessage(AssistantResponseMessage {
                content: parts.text,
                tool_uses: parts.tool_uses,
            }),
            _ => {
                let context = UserInputMessageContext {
                    tool_results: std::mem::take(&mut parts.tool_results),
                    ..Default::default()
                };
                ChatTurn::UserInputMessage(user_turn(parts.text.clone(), model_id, parts, Some(context)))
            }
        });
    }

    let mut parts = TurnParts::collect(last);
    if let Some(prefix) = system_prefix.take() {
        parts.text = combine([Some(prefix), Some(parts.text)]).unwrap_or_default();
    }
    let current_message = if last.role == Role::Assistant {
        ChatTurn::AssistantResponseMessage(AssistantResponseMessage {
            content: parts.text,
            tool_uses: parts.tool_uses,
        })
    } else {
        let context = UserInputMessageContext {
            tool_results: std::mem::take(&mut parts.tool_results),
            tools,
            tool_context_manifest: manifest,
            claude_tool_choice: choice.map(|(meta, _)| meta),
            plan_mode: plan,
        };
        ChatTurn::UserInputMessage(user_turn(parts.text.clone(), model_id, parts, Some(context)))
    };

    let profile_arn = Some(cred.profile_arn.trim())
        .filter(|arn| cred.is_social() && !arn.is_empty())
        .map(str::to_string);
    let project_name = metadata
        .get("project")
        .and_then(Value::as_str)
        .or_else(|| req.metadata_str("project"))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    Ok(ConversationEnvelope {
        conversation_state: ConversationState {
            chat_trigger_type: CHAT_TRIGGER_TYPE.to_string(),
            conversation_id: Uuid::new_v4().to_string(),
            current_message,
            history,
        },
        profile_arn,
        project_name,
    })
}

fn user_turn(
    text: String,
    model_id: &str,
    parts: TurnParts,
    context: Option<UserInputMessageContext>,
) -> UserInputMessage {
    let content = if text.trim().is_empty() {
        EMPTY_USER_CONTENT.to_string()
    } else {
        text
    };
    UserInputMessage {
        content,
        model_id: model_id.to_string(),
        origin: ORIGIN.to_string(),
        images: parts.images,
        user_input_message_context: context.filter(|ctx| !ctx.is_empty()),
        tool_uses: parts.tool_uses,
    }
}

/// Everything one message contributes to a turn.
#[derive(Debug, Default)]
struct TurnParts {
    text: String,
    tool_uses: Vec<KiroToolUse>,
    tool_results: Vec<KiroToolResult>,
    images: Vec<KiroImage>,
}

impl TurnParts {
    fn collect(message: &Message) -> Self {
        let mut texts = Vec::new();
        let mut out = TurnParts::default();
        for part in message.parts() {
            match part {
                ContentPart::Text { text } => texts.push(text),
                ContentPart::ToolUse { id, name, input } => {
                    let name = sanitize_text(&name);
                    if name.is_empty() {
                        continue;
                    }
                    out.tool_uses.push(KiroToolUse {
                        name,
                        tool_use_id: normalize_tool_id(&id),
                        input: if input.is_object() {
                            input
                        } else {
                            Value::Object(Map::new())
                        },
                    });
                }
                ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    status,
                    is_error,
                } => {
                    let text = content.as_ref().map(tool_result_text).unwrap_or_default();
                    let status = status
                        .map(|s| s.trim().to_ascii_lowercase())
                        .filter(|s| !s.is_empty())
                        .unwrap_or_else(|| if is_error { "error" } else { "success" }.to_string());
                    out.tool_results.push(KiroToolResult {
                        content: vec![TextBlock { text }],
                        status,
                        tool_use_id: normalize_tool_id(&tool_use_id),
                    });
                }
                ContentPart::Image { source } => {
                    if source.data.trim().is_empty() {
                        continue;
                    }
                    out.images.push(KiroImage {
                        format: image_format(&source.media_type),
                        source: KiroImageSource { bytes: source.data },
                    });
                }
                ContentPart::ImageUrl { image_url } => {
                    if let Some(image) = data_url_image(&image_url.url) {
                        out.images.push(image);
                    }
                }
                ContentPart::Unknown => {}
            }
        }
        out.text = sanitize_text(&texts.join("\n"));
        out
    }
}

fn has_tool_result(message: &Message) -> bool {
    message
        .parts()
        .iter()
        .any(|part| matches!(part, ContentPart::ToolResult { .. }))
}

/// Anthropic Messages transcript clean-up: adjacent user or assistant
/// messages are concatenated unless either carries a tool result, and a
/// trailing assistant message consisting of a lone `{` text block is dropped.
pub fn coalesce_messages(messages: &[Message]) -> Vec<Message> {
    let mut merged: Vec<Message> = Vec::with_capacity(messages.len());
    for message in messages {
        let Some(prev) = merged.last_mut() else {
            merged.push(message.clone());
            continue;
        };
        let mergeable = matches!(prev.role, Role::User | Role::Assistant)
            && prev.role == message.role
            && !has_tool_result(prev)
            && !has_tool_result(message);
        if !mergeable {
            merged.push(message.clone());
            continue;
        }
        let mut parts = prev.parts();
        parts.extend(message.parts());
        *prev = Message::with_parts(prev.role, parts);
    }

    if let Some(last) = merged.last()
        && last.role == Role::Assistant
        && last.tool_calls.is_empty()
        && let [ContentPart::Text { text }] = last.parts().as_slice()
        && text.trim() == "{"
    {
        merged.pop();
    }
    merged
}

/// Reads a tool result's own `content`: a string, or an array of strings and
/// `{"text": ...}` blocks.
fn tool_result_text(content: &Value) -> String {
    let text = match content {
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text.as_str()),
                Value::Object(block) => block.get("text").and_then(Value::as_str),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(block) => block
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| content.to_string()),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    sanitize_text(&text)
}

fn image_format(media_type: &str) -> String {
    media_type
        .split('/')
        .nth(1)
        .map(|subtype| subtype.trim().to_ascii_lowercase())
        .filter(|subtype| !subtype.is_empty())
        .unwrap_or_else(|| "png".to_string())
}

/// `data:image/png;base64,<bytes>`
fn data_url_image(url: &str) -> Option<KiroImage> {
    let rest = url.trim().strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let media_type = meta.strip_suffix(";base64")?;
    if data.is_empty() {
        return None;
    }
    Some(KiroImage {
        format: image_format(media_type),
        source: KiroImageSource {
            bytes: data.to_string(),
        },
    })
}

pub(crate) fn normalize_tool_id(id: &str) -> String {
    let id = id.trim();
    if id.is_empty() {
        format!("call_{}", Uuid::new_v4().simple())
    } else {
        id.to_string()
    }
}

/// Drops control characters other than newline and tab, then trims.
pub(crate) fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Non-empty parts joined by a blank line.
pub(crate) fn combine<I>(parts: I) -> Option<String>
where
    I: IntoIterator<Item = Option<String>>,
{
    let parts: Vec<String> = parts
        .into_iter()
        .flatten()
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

fn angle_bracket_blocks() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]+>").expect("static regex"))
}

/// Returns the upstream description and, when it had to be cut, the full text.
fn clean_description(name: &str, description: &str) -> (String, Option<String>) {
    let sanitized = sanitize_text(description);
    let stripped = angle_bracket_blocks().replace_all(&sanitized, "");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    let full = if collapsed.is_empty() {
        format!("Tool {name}")
    } else {
        collapsed
    };
    if full.chars().count() > MAX_TOOL_DESCRIPTION_CHARS {
        let short = full.chars().take(MAX_TOOL_DESCRIPTION_CHARS).collect();
        (short, Some(full))
    } else {
        (full, None)
    }
}

fn tool_specification(
    name: String,
    description: &str,
    schema: Option<&Value>,
) -> (KiroTool, Option<ToolContextEntry>) {
    let (description, full) = clean_description(&name, description);
    let manifest_entry = full.map(|full| {
        let digest = Sha256::digest(full.as_bytes());
        ToolContextEntry {
            name: name.clone(),
            hash: digest[..8].iter().map(|b| format!("{b:02x}")).collect(),
            length: full.chars().count(),
            description: full,
        }
    });
    let json = schema
        .filter(|schema| schema.is_object())
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));
    let tool = KiroTool {
        tool_specification: ToolSpecification {
            name,
            description,
            input_schema: InputSchema { json },
        },
    };
    (tool, manifest_entry)
}

/// Declared tools in upstream form, plus the full text of every description
/// that had to be shortened. Without declared tools, specs are synthesized
/// for every tool the transcript invokes.
fn convert_tools(
    tools: &[ToolSpec],
    messages: &[Message],
) -> (Vec<KiroTool>, Vec<ToolContextEntry>) {
    let mut out = Vec::new();
    let mut manifest = Vec::new();
    if tools.is_empty() {
        let mut seen = HashSet::new();
        for message in messages {
            for part in message.parts() {
                if let ContentPart::ToolUse { name, .. } = part {
                    let name = sanitize_text(&name);
                    if !name.is_empty() && seen.insert(name.clone()) {
                        out.push(tool_specification(name, "", None).0);
                    }
                }
            }
        }
        return (out, manifest);
    }
    for tool in tools {
        let name = sanitize_text(&tool.name);
        if name.is_empty() {
            continue;
        }
        let (spec, line) = tool_specification(name, &tool.description, tool.parameters.as_ref());
        out.push(spec);
        manifest.extend(line);
    }
    (out, manifest)
}

/// One system-text line per shortened description; the full text travels in
/// the context's `toolContextManifest`.
fn manifest_block(entries: &[ToolContextEntry]) -> Option<String> {
    if entries.is_empty() {
        return None;
    }
    let lines: Vec<String> = entries
        .iter()
        .map(|entry| format!("- {} [{}, {} chars]", entry.name, entry.hash, entry.length))
        .collect();
    Some(format!(
        "Tool reference manifest (hash -> tool). Full descriptions are in toolContextManifest:\n{}",
        lines.join("\n")
    ))
}

/// `tool_choice` as upstream metadata plus a directive sentence. `auto`
/// (and anything unrecognised) yields nothing.
fn parse_tool_choice(choice: &Value) -> Option<(ToolChoiceMeta, String)> {
    let (mode, name) = match choice {
        Value::String(mode) => (mode.trim().to_ascii_lowercase(), None),
        Value::Object(obj) => {
            let kind = obj
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            let name = obj
                .get("name")
                .and_then(Value::as_str)
                .or_else(|| {
                    obj.get("function")
                        .and_then(|f| f.get("name"))
                        .and_then(Value::as_str)
                })
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string);
            (kind, name)
        }
        _ => return None,
    };
    match (mode.as_str(), name) {
        ("none", _) => Some((
            ToolChoiceMeta {
                mode: "none".to_string(),
                name: None,
            },
            "Tool directive: respond directly without invoking any tools for this turn.".to_string(),
        )),
        ("required" | "any", _) => Some((
            ToolChoiceMeta {
                mode: "required".to_string(),
                name: None,
            },
            "Tool directive: you must use at least one available tool before concluding your response."
                .to_string(),
        )),
        ("tool" | "function", Some(name)) => Some((
            ToolChoiceMeta {
                mode: "tool".to_string(),
                name: Some(name.clone()),
            },
            format!("Tool directive: you must call the tool \"{name}\" before responding to the user."),
        )),
        _ => None,
    }
}
