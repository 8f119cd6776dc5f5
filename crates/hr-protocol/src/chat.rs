//! OpenAI-style chat completion wire types.
//!
//! Both backends speak (or are adapted to) this shape: the router receives a
//! `ChatRequest`, forwards it to the cloud provider unchanged apart from
//! temperature and system instruction, and hands a `ChatCompletion` back to
//! the caller regardless of which backend produced it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::routing::FunctionCall;

/// Model name reported on locally produced completions when the request
/// doesn't carry one.
pub const LOCAL_MODEL_NAME: &str = "cactus/functiongemma-270m-it";

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Image reference inside a multimodal content part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One part of a multimodal message body.
///
/// Only bare text and image parts are decoded. Every other part, including
/// text or image parts carrying extra keys, is kept verbatim in `Other` so
/// forwarding a request never changes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    Other(Value),
}

/// Wire form of the decoded part types.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KnownPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl From<Value> for ContentPart {
    fn from(raw: Value) -> Self {
        let decoded = match KnownPart::deserialize(&raw) {
            Ok(KnownPart::Text { text }) => Self::Text { text },
            Ok(KnownPart::ImageUrl { image_url }) => Self::ImageUrl { image_url },
            Err(_) => return Self::Other(raw),
        };
        // Decoded only if re-encoding reproduces the part exactly.
        if Value::from(decoded.clone()) == raw {
            decoded
        } else {
            Self::Other(raw)
        }
    }
}

impl From<ContentPart> for Value {
    fn from(part: ContentPart) -> Self {
        match part {
            ContentPart::Text { text } => json!({"type": "text", "text": text}),
            ContentPart::ImageUrl { image_url } => json!({"type": "image_url", "image_url": image_url}),
            ContentPart::Other(raw) => raw,
        }
    }
}

impl ContentPart {
    fn raw_type(raw: &Value) -> Option<&str> {
        raw.get("type").and_then(Value::as_str)
    }

    /// Text carried by a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::ImageUrl { .. } => None,
            Self::Other(raw) if Self::raw_type(raw) == Some("text") => {
                raw.get("text").and_then(Value::as_str)
            }
            Self::Other(_) => None,
        }
    }

    pub fn is_image(&self) -> bool {
        match self {
            Self::ImageUrl { .. } => true,
            Self::Text { .. } => false,
            Self::Other(raw) => Self::raw_type(raw) == Some("image_url"),
        }
    }
}

/// Message body: either plain text or a list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Textual content of the message. Part lists are reduced to their
    /// non-empty text parts joined by single spaces, then trimmed.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(ContentPart::as_text)
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
                .trim()
                .to_string(),
        }
    }

    /// True if any part is an image.
    pub fn has_image(&self) -> bool {
        match self {
            Self::Text(_) => false,
            Self::Parts(parts) => parts.iter().any(ContentPart::is_image),
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<MessageContent>,
    /// Tool calls requested by the assistant in this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// For tool-result messages, the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Fields not modelled above (`name`, `refusal`, ...), passed through.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(content.into())),
            tool_calls: None,
            tool_call_id: None,
            extra: Map::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// User message built from multimodal parts.
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: Some(MessageContent::Parts(parts)),
            tool_calls: None,
            tool_call_id: None,
            extra: Map::new(),
        }
    }

    /// Trimmed textual content, empty when the message has none.
    pub fn text(&self) -> String {
        self.content
            .as_ref()
            .map(|content| content.text().trim().to_string())
            .unwrap_or_default()
    }
}

/// A tool call requested by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_tool_type")]
    pub call_type: String,
    pub function: ToolCallFunction,
}

/// Function invocation inside a tool call. `arguments` is JSON-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// A tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(rename = "type", default = "default_tool_type")]
    pub tool_type: String,
    pub function: FunctionSpec,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ToolSpec {
    /// Convenience constructor for a function tool.
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            tool_type: default_tool_type(),
            function: FunctionSpec {
                name: name.into(),
                description: Some(description.into()),
                parameters: Some(parameters),
                extra: Map::new(),
            },
            extra: Map::new(),
        }
    }

    pub fn is_function(&self) -> bool {
        self.tool_type == "function"
    }
}

/// Function signature exposed as a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema object describing the arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// e.g. `strict`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_tool_type() -> String {
    "function".into()
}

/// Chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Provider options the router doesn't interpret (`top_p`,
    /// `response_format`, ...). Forwarded to the cloud unchanged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            temperature: None,
            max_tokens: None,
            tool_choice: None,
            stream: None,
            extra: Map::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    /// Copy of this request whose only system message is `instruction`,
    /// placed first. Existing system messages are dropped.
    pub fn with_system_instruction(&self, instruction: &str) -> Self {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        messages.push(ChatMessage::system(instruction));
        messages.extend(
            self.messages
                .iter()
                .filter(|message| message.role != Role::System)
                .cloned(),
        );
        Self {
            messages,
            ..self.clone()
        }
    }
}

/// Chat completion response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    #[serde(default = "default_object")]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

fn default_object() -> String {
    "chat.completion".into()
}

impl ChatCompletion {
    /// Synthesize a completion carrying `calls` as assistant tool calls, so
    /// locally routed answers look exactly like cloud ones.
    pub fn from_function_calls(model: &str, calls: &[FunctionCall]) -> Self {
        let model = if model.trim().is_empty() {
            LOCAL_MODEL_NAME
        } else {
            model
        };
        let tool_calls = calls
            .iter()
            .enumerate()
            .map(|(index, call)| call.to_tool_call(index))
            .collect();

        Self {
            id: format!("chatcmpl-local-{}", Uuid::now_v7()),
            object: default_object(),
            created: Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage {
                    role: Role::Assistant,
                    content: None,
                    tool_calls: Some(tool_calls),
                    tool_call_id: None,
                    extra: Map::new(),
                },
                finish_reason: Some("tool_calls".into()),
            }],
            usage: None,
        }
    }

    /// Number of tool calls on the first choice.
    pub fn tool_call_count(&self) -> usize {
        self.choices
            .first()
            .and_then(|choice| choice.message.tool_calls.as_ref())
            .map_or(0, Vec::len)
    }
}

/// One completion choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
