//! OpenAI chat/completions wire protocol definitions.
//!
//! Covers the request/response/stream triple for
//! `POST /v1/chat/completions` as OpenAI-compatible upstreams speak it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Request Types
// ============================================================================

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// ID of the model to use.
    pub model: String,

    /// Conversation so far.
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature, between 0 and 2.
    pub temperature: Option<f64>,

    /// Nucleus sampling parameter.
    pub top_p: Option<f64>,

    /// Up to 4 sequences where the API stops generating.
    pub stop: Option<StringOrArray>,

    /// Maximum number of tokens to generate.
    pub max_tokens: Option<u32>,

    /// Whether to stream back partial progress.
    #[serde(default)]
    pub stream: bool,

    /// Tools the model may call.
    pub tools: Option<Vec<ToolDefinition>>,

    /// Controls which (if any) tool is called by the model.
    pub tool_choice: Option<OpenAiToolChoice>,

    /// A unique identifier representing the end-user.
    pub user: Option<String>,

    /// Additional provider-specific fields passed through untouched.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// One chat message on the OpenAI wire.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: OpenAiRole,

    /// Absent for assistant messages that carry only tool calls.
    pub content: Option<OpenAiContent>,

    /// Tool calls issued by an assistant message.
    pub tool_calls: Option<Vec<OpenAiToolCall>>,

    /// For `role: tool`, the id of the call being answered.
    pub tool_call_id: Option<String>,

    /// Optional participant name.
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OpenAiRole {
    System,
    Developer,
    User,
    Assistant,
    Tool,
}

/// Message content: plain string or multimodal parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenAiContent {
    Text(String),
    Parts(Vec<OpenAiContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAiContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    pub detail: Option<String>,
}

/// A tool call carried on an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenAiToolCall {
    pub id: String,

    /// Always "function" today.
    #[serde(rename = "type")]
    pub kind: String,

    pub function: OpenAiFunctionCall,
}

/// Function name plus arguments as a JSON-encoded string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenAiFunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Tool definition on the OpenAI wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Always "function" today.
    #[serde(rename = "type")]
    pub kind: String,

    pub function: FunctionSpec,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: Option<String>,
    /// JSON schema for the function parameters.
    pub parameters: Value,
}

/// Tool choice: a bare mode string or a named function object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OpenAiToolChoice {
    Mode(OpenAiToolChoiceMode),
    Named {
        #[serde(rename = "type")]
        kind: String,
        function: NamedFunctionRef,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OpenAiToolChoiceMode {
    Auto,
    None,
    Required,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamedFunctionRef {
    pub name: String,
}

/// String-or-array union used by `stop`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum StringOrArray {
    String(String),
    Array(Vec<String>),
}

impl StringOrArray {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StringOrArray::String(s) => vec![s.clone()],
            StringOrArray::Array(v) => v.clone(),
        }
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String, // "chat.completion"
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Option<OpenAiUsage>,
    pub system_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatChoiceMessage,
    pub finish_reason: Option<OpenAiFinishReason>,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoiceMessage {
    pub role: OpenAiRole,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OpenAiFinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OpenAiUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

// ============================================================================
// Streaming Types
// ============================================================================

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String, // "chat.completion.chunk"
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    pub usage: Option<OpenAiUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChatDelta,
    pub finish_reason: Option<OpenAiFinishReason>,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatDelta {
    pub role: Option<OpenAiRole>,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// A fragment of a tool call inside a streamed delta. `arguments`
/// accumulates across fragments with the same `index`.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub function: Option<FunctionCallDelta>,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallDelta {
    pub name: Option<String>,
    pub arguments: Option<String>,
}
