use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form per-call metadata (e.g. `project`, `credential_path`).
pub type Metadata = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Anthropic-style top level system prompt (string or text blocks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl ChatRequest {
    pub fn system_text(&self) -> Option<String> {
        let text = self.system.as_ref()?.joined_text();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    #[serde(alias = "developer")]
    System,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    /// OpenAI-style assistant tool invocations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,
    /// OpenAI-style `tool` role back-reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(text.into())),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn with_parts(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Parts(parts)),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// All parts of this message in a single shape.
    ///
    /// OpenAI `tool_calls` become `tool_use` parts and a `tool` role message
    /// carrying `tool_call_id` becomes one `tool_result` part.
    pub fn parts(&self) -> Vec<ContentPart> {
        if self.role == Role::Tool
            && let Some(id) = self.tool_call_id.as_deref()
        {
            let content = match &self.content {
                Some(MessageContent::Text(text)) => Some(Value::String(text.clone())),
                Some(MessageContent::Parts(parts)) => Some(
                    serde_json::to_value(parts).unwrap_or(Value::Array(Vec::new())),
                ),
                None => None,
            };
            return vec![ContentPart::ToolResult {
                tool_use_id: id.to_string(),
                content,
                status: None,
                is_error: false,
            }];
        }

        let mut parts = match &self.content {
            Some(MessageContent::Text(text)) => vec![ContentPart::Text { text: text.clone() }],
            Some(MessageContent::Parts(parts)) => parts.clone(),
            None => Vec::new(),
        };
        for call in &self.tool_calls {
            let input = serde_json::from_str::<Value>(&call.function.arguments)
                .ok()
                .filter(Value::is_object)
                .unwrap_or_else(|| Value::Object(Default::default()));
            parts.push(ContentPart::ToolUse {
                id: call.id.clone(),
                name: call.function.name.clone(),
                input,
            });
        }
        parts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Text parts joined by newlines.
    pub fn joined_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    #[serde(alias = "input_text", alias = "output_text")]
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default, alias = "tool_useId")]
        tool_use_id: String,
        /// Either a plain string or an array of strings / `{"text": ...}` blocks.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(default)]
        is_error: bool,
    },
    Image {
        source: ImageSource,
    },
    ImageUrl {
        image_url: ImageUrl,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageToolCall {
    #[serde(default)]
    pub id: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// A callable tool. Accepts the Anthropic (`input_schema`) and OpenAI
/// (`{"type":"function","function":{...}}`) declaration shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawToolSpec")]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Deserialize)]
struct RawToolSpec {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: Option<Value>,
    #[serde(default)]
    parameters: Option<Value>,
    #[serde(default)]
    function: Option<RawFunctionSpec>,
}

#[derive(Deserialize)]
struct RawFunctionSpec {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<Value>,
}

impl From<RawToolSpec> for ToolSpec {
    fn from(raw: RawToolSpec) -> Self {
        let function = raw.function;
        let (fn_name, fn_description, fn_parameters) = match function {
            Some(f) => (f.name, f.description, f.parameters),
            None => (None, None, None),
        };
        Self {
            name: raw.name.or(fn_name).unwrap_or_default(),
            description: raw.description.or(fn_description).unwrap_or_default(),
            parameters: raw
                .input_schema
                .or(raw.parameters)
                .or(fn_parameters)
                .filter(|value| !value.is_null()),
        }
    }
}
