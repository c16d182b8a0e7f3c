//! Anthropic Messages API wire protocol definitions.
//!
//! Covers the subset of `POST /v1/messages` the gateway transports:
//! text, image, tool_use and tool_result content, tool definitions with
//! input schemas, and the SSE streaming event set.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Request Types
// ============================================================================

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessageRequest {
    /// The model that will complete the prompt.
    pub model: String,

    /// Input messages for the conversation. System content is carried
    /// out-of-band in `system`, never here.
    pub messages: Vec<InputMessage>,

    /// The maximum number of tokens to generate. Required on this wire.
    pub max_tokens: u32,

    /// Custom text sequences that stop generation.
    pub stop_sequences: Option<Vec<String>>,

    /// Whether to stream the response as server-sent events.
    pub stream: Option<bool>,

    /// System prompt.
    pub system: Option<SystemContent>,

    /// Amount of randomness injected into the response (0.0 to 1.0).
    pub temperature: Option<f64>,

    /// How the model should use the provided tools.
    pub tool_choice: Option<AnthropicToolChoice>,

    /// Definitions of tools the model may use.
    pub tools: Option<Vec<AnthropicTool>>,

    /// Nucleus sampling parameter.
    pub top_p: Option<f64>,

    /// Request metadata.
    pub metadata: Option<AnthropicMetadata>,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMetadata {
    /// External identifier for the end user.
    pub user_id: Option<String>,
}

/// System content: a string or an array of text blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemContent {
    String(String),
    Blocks(Vec<TextBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputMessage {
    pub role: AnthropicRole,
    pub content: InputContent,
}

/// Only user and assistant exist on this wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnthropicRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputContent {
    String(String),
    Blocks(Vec<InputContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputContentBlock {
    Text(TextBlock),
    Image(ImageBlock),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBlock {
    pub source: AnthropicImageSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

/// Tool use block in assistant messages. `input` is a structured JSON
/// object on this wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Tool result block in user messages.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: Option<ToolResultContent>,
    pub is_error: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    String(String),
    Blocks(Vec<TextBlock>),
}

// ============================================================================
// Tool Definitions
// ============================================================================

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: InputSchema,
}

/// JSON Schema for tool input.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(rename = "type")]
    pub schema_type: String,

    pub properties: Option<HashMap<String, Value>>,

    pub required: Option<Vec<String>>,

    /// Any further schema keywords.
    #[serde(flatten)]
    pub additional: HashMap<String, Value>,
}

/// How the model should use the provided tools. "None" is not a wire
/// value: it is expressed by omitting `tools` entirely.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicToolChoice {
    Auto {
        disable_parallel_tool_use: Option<bool>,
    },
    Any {
        disable_parallel_tool_use: Option<bool>,
    },
    Tool {
        name: String,
        disable_parallel_tool_use: Option<bool>,
    },
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    /// Unique object identifier.
    pub id: String,

    /// Always "message".
    #[serde(rename = "type")]
    pub message_type: String,

    /// Always "assistant".
    pub role: String,

    /// Content generated by the model.
    pub content: Vec<ContentBlock>,

    /// The model that generated the message.
    pub model: String,

    /// Why the model stopped generating.
    pub stop_reason: Option<StopReason>,

    /// Which custom stop sequence was generated, if any.
    pub stop_sequence: Option<String>,

    pub usage: AnthropicUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    Refusal,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnthropicUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

// ============================================================================
// Streaming Event Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageStreamEvent {
    MessageStart {
        message: AnthropicMessage,
    },
    ContentBlockStart {
        index: u32,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: ContentBlockDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        usage: MessageDeltaUsage,
    },
    MessageStop,
    Ping,
    Error {
        error: AnthropicErrorBody,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlockDelta {
    TextDelta { text: String },
    /// Partial JSON fragment of a tool_use input.
    InputJsonDelta { partial_json: String },
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeltaBody {
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MessageDeltaUsage {
    pub output_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicErrorBody {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_use_block_parses() {
        let json = serde_json::json!({
            "type": "tool_use",
            "id": "tu1",
            "name": "lookup",
            "input": {"q": "x"}
        });
        let block: ContentBlock = serde_json::from_value(json).unwrap();
        match block {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "tu1");
                assert_eq!(name, "lookup");
                assert_eq!(input["q"], "x");
            }
            _ => panic!("expected tool_use"),
        }
    }

    #[test]
    fn stop_reason_wire_names() {
        assert_eq!(
            serde_json::to_value(StopReason::EndTurn).unwrap(),
            "end_turn"
        );
        assert_eq!(
            serde_json::from_value::<StopReason>(serde_json::json!("tool_use")).unwrap(),
            StopReason::ToolUse
        );
    }

    #[test]
    fn tool_choice_serializes_tagged() {
        let choice = AnthropicToolChoice::Tool {
            name: "lookup".to_string(),
            disable_parallel_tool_use: None,
        };
        assert_eq!(
            serde_json::to_value(&choice).unwrap(),
            serde_json::json!({"type": "tool", "name": "lookup"})
        );
    }

    #[test]
    fn input_json_delta_parses() {
        let json = serde_json::json!({
            "type": "input_json_delta",
            "partial_json": "{\"q\":\""
        });
        let delta: ContentBlockDelta = serde_json::from_value(json).unwrap();
        assert!(matches!(delta, ContentBlockDelta::InputJsonDelta { .. }));
    }

    #[test]
    fn system_content_accepts_both_forms() {
        let s: SystemContent = serde_json::from_value(serde_json::json!("be brief")).unwrap();
        assert!(matches!(s, SystemContent::String(_)));
        let blocks: Result<SystemContent, _> =
            serde_json::from_value(serde_json::json!([{"type": "text", "text": "be brief"}]));
        // Blocks form carries a `type` tag on the wire but TextBlock only
        // keeps `text`; unknown fields are ignored by serde's default.
        assert!(blocks.is_ok());
    }
}
