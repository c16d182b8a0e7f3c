//! Canonical chat protocol: the one request/response shape the gateway
//! pipeline operates on between intake and dispatch.
//!
//! Wire-family specifics (OpenAI tool_call envelopes, Anthropic content
//! blocks) never leak into these types; the transformers own that
//! boundary. Tool-call arguments are carried as JSON strings here and
//! (de)serialized by the transformers at the wire boundary.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

/// Maximum number of opaque annotation entries a request may carry.
pub const MAX_ANNOTATIONS: usize = 32;

// ============================================================================
// Request Types
// ============================================================================

/// A chat request in canonical form.
///
/// `virtual_model` is either a logical category name ("default",
/// "background", "reasoning", "longContext", "webSearch") or a concrete
/// upstream model id; the router resolves it either way.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChatRequest {
    /// Opaque request identifier, unique per request. The intake layer
    /// mints one when absent; by validation time it is never empty.
    #[serde(default)]
    #[validate(length(min = 1, message = "id is required and cannot be empty"))]
    pub id: String,

    /// Logical model name or concrete model id.
    #[validate(length(min = 1, message = "model field is required and cannot be empty"))]
    #[serde(alias = "virtual_model")]
    pub model: String,

    /// Ordered conversation messages.
    #[validate(length(min = 1, message = "messages array is required and cannot be empty"))]
    pub messages: Vec<Message>,

    /// Tool definitions the model may invoke. Names are unique per request.
    pub tools: Option<Vec<Tool>>,

    /// How the model should use the provided tools.
    pub tool_choice: Option<ToolChoice>,

    /// Amount of randomness injected into sampling.
    pub temperature: Option<f64>,

    /// Nucleus sampling parameter.
    pub top_p: Option<f64>,

    /// Stop sequence(s) terminating generation.
    pub stop: Option<StopSequences>,

    /// Maximum number of tokens to generate.
    pub max_tokens: Option<u32>,

    /// Whether the client expects chunked delivery.
    #[serde(default)]
    pub stream: bool,

    /// Request metadata (never forwarded upstream).
    #[serde(default)]
    pub metadata: RequestMetadata,
}

impl ChatRequest {
    pub fn is_stream(&self) -> bool {
        self.stream
    }

    pub fn has_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|t| !t.is_empty())
    }
}

/// Request metadata: a small typed struct plus a bounded opaque
/// annotations map.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// When the gateway accepted the request.
    pub received_at: Option<DateTime<Utc>>,

    /// Where the request entered (surface name, client tag).
    pub source: Option<String>,

    /// Scheduling priority hint.
    pub priority: Option<i32>,

    /// Opaque annotations, bounded by [`MAX_ANNOTATIONS`].
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, Value>,
}

/// A single conversation message.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    pub content: MessageContent,

    /// For `role: tool` messages, the id of the call being answered.
    pub tool_call_id: Option<String>,

    /// For assistant messages that invoked tools.
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    /// Convenience constructor for plain-text messages.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
            tool_call_id: None,
            tool_calls: None,
        }
    }
}

/// Message sender role.
///
/// `Developer` exists so intake accepts the OpenAI developer role; the
/// preprocessor down-converts or rejects it before dispatch to wire
/// families that do not know it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
    Tool,
}

/// Message content: a plain string or an ordered sequence of typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Flatten to the concatenated text of all textual parts.
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// Typed content part.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text { text: String },
    /// Image input.
    Image { source: ImageSource },
    /// A tool invocation recorded in an assistant turn.
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    /// The result of a tool invocation.
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// Image source (base64 payload or URL).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

/// A completed tool call as seen by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    /// Provider-assigned call id.
    pub id: String,

    /// Call kind; only "function" today.
    #[serde(rename = "type")]
    pub kind: ToolCallKind,

    pub function: FunctionCall,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallKind {
    Function,
}

/// Function name + arguments. Arguments are always a JSON string at this
/// boundary; transformers convert to structured values where a wire
/// family requires it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Tool definition.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name, unique within a request.
    pub name: String,

    pub description: Option<String>,

    /// JSON-schema describing the tool's parameters.
    pub parameters: Value,
}

/// How the model should use the provided tools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(ToolChoiceMode),
    Function { function: NamedFunction },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoiceMode {
    Auto,
    None,
    Required,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamedFunction {
    pub name: String,
}

/// One stop sequence or several.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum StopSequences {
    Single(String),
    Many(Vec<String>),
}

impl StopSequences {
    /// Normalize to a vector, the form Anthropic-style wires require.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StopSequences::Single(s) => vec![s.clone()],
            StopSequences::Many(v) => v.clone(),
        }
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// A chat response in canonical form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,

    /// The model that actually served the request.
    pub model: String,

    /// Unix seconds.
    pub created: u64,

    pub choices: Vec<Choice>,

    pub usage: Usage,

    #[serde(default)]
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: FinishReason,
}

/// The assistant turn of a response choice.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: Role,
    pub content: String,
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

/// Token accounting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Gateway-added response metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Worker id that served the request.
    pub provider_served: String,

    /// Ordered names of the pipeline stages that actually ran.
    pub processing_steps: Vec<String>,

    /// Per-stage wall time in milliseconds.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub timings_ms: HashMap<String, u64>,

    /// Upstream attempts beyond the first.
    pub retry_count: u32,
}

// ============================================================================
// Streaming Event Types
// ============================================================================

/// Canonical streaming chunk.
///
/// Tool calls are always delivered whole: the streaming layer reassembles
/// partial argument fragments before emitting a `ToolCall` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatStreamEvent {
    /// First event of a stream.
    Start { id: String, model: String },
    /// Incremental text for a choice.
    TextDelta { index: u32, text: String },
    /// One complete tool call.
    ToolCall { index: u32, tool_call: ToolCall },
    /// Terminal event.
    Finish {
        finish_reason: FinishReason,
        usage: Option<Usage>,
    },
}

// ============================================================================
// Count Tokens Types
// ============================================================================

/// Token estimate request; bypasses the pipeline past routing.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CountTokensRequest {
    #[validate(length(min = 1, message = "model field is required and cannot be empty"))]
    pub model: String,

    #[validate(length(min = 1, message = "messages array is required and cannot be empty"))]
    pub messages: Vec<Message>,

    pub tools: Option<Vec<Tool>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountTokensResponse {
    pub input_tokens: u32,
}
