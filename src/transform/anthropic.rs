//! Canonical <-> Anthropic messages transformer.
//!
//! Wire rules this side owns: system content moves to the top-level
//! `system` field, tool results become user-role content blocks,
//! `max_tokens` is mandatory, stop sequences are always an array, and
//! `tool_choice: "none"` is expressed by omitting tools entirely.

use gateway_protocol::{
    anthropic::{
        AnthropicImageSource, AnthropicMessage, AnthropicTool, AnthropicToolChoice, ContentBlock,
        CreateMessageRequest, ImageBlock, InputContent, InputContentBlock, InputMessage,
        InputSchema, StopReason, SystemContent, TextBlock, ToolResultBlock, ToolResultContent,
        ToolUseBlock,
    },
    canonical::{
        AssistantMessage, ChatRequest, ChatResponse, Choice, ContentPart, FinishReason,
        FunctionCall, ImageSource, Message, MessageContent, Role, Tool, ToolCall, ToolCallKind,
        ToolChoice, ToolChoiceMode, Usage,
    },
    provider::WireFamily,
};
use gateway_protocol::anthropic::AnthropicRole;

use super::{parse_tool_arguments, TransformOptions, Transformer, WireRequest, WireResponse};
use crate::error::{GatewayError, GatewayResult};

/// Last-resort max_tokens when neither the request nor the provider
/// config supplies one.
const FALLBACK_MAX_TOKENS: u32 = 4096;

pub struct AnthropicTransformer;

impl AnthropicTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AnthropicTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for AnthropicTransformer {
    fn family(&self) -> WireFamily {
        WireFamily::Anthropic
    }

    fn request_forward(
        &self,
        request: &ChatRequest,
        target_model: &str,
        options: &TransformOptions,
    ) -> GatewayResult<WireRequest> {
        let mut system_parts: Vec<String> = Vec::new();
        let mut messages: Vec<InputMessage> = Vec::new();

        for message in &request.messages {
            match message.role {
                Role::System => system_parts.push(message.content.as_text()),
                Role::Developer => {
                    // The preprocessor down-converts or rejects this role
                    // before dispatch; reaching the wire with it is
                    // structural.
                    return Err(GatewayError::transform(
                        "role 'developer' is not expressible on the anthropic wire",
                    ));
                }
                Role::User => messages.push(InputMessage {
                    role: AnthropicRole::User,
                    content: forward_user_content(&message.content, options)?,
                }),
                Role::Assistant => messages.push(InputMessage {
                    role: AnthropicRole::Assistant,
                    content: forward_assistant_content(message)?,
                }),
                Role::Tool => {
                    let tool_use_id = message.tool_call_id.clone().ok_or_else(|| {
                        GatewayError::transform("tool message missing tool_call_id")
                    })?;
                    messages.push(InputMessage {
                        role: AnthropicRole::User,
                        content: InputContent::Blocks(vec![InputContentBlock::ToolResult(
                            ToolResultBlock {
                                tool_use_id,
                                content: Some(ToolResultContent::String(
                                    message.content.as_text(),
                                )),
                                is_error: None,
                            },
                        )]),
                    });
                }
            }
        }

        // "none" strips tools entirely on this wire.
        let suppress_tools = matches!(
            request.tool_choice,
            Some(ToolChoice::Mode(ToolChoiceMode::None))
        );

        let tools = if suppress_tools {
            None
        } else {
            request
                .tools
                .as_ref()
                .map(|tools| tools.iter().map(forward_tool).collect::<GatewayResult<_>>())
                .transpose()?
        };

        let tool_choice = if suppress_tools {
            None
        } else {
            request.tool_choice.as_ref().map(forward_tool_choice)
        };

        Ok(WireRequest::Anthropic(CreateMessageRequest {
            model: target_model.to_string(),
            messages,
            max_tokens: request
                .max_tokens
                .or(options.default_max_tokens)
                .unwrap_or(FALLBACK_MAX_TOKENS),
            stop_sequences: request.stop.as_ref().map(|s| s.to_vec()),
            stream: Some(request.stream),
            system: if system_parts.is_empty() {
                None
            } else {
                Some(SystemContent::String(system_parts.join("\n\n")))
            },
            temperature: request.temperature,
            tool_choice,
            tools,
            top_p: request.top_p,
            metadata: None,
        }))
    }

    fn response_reverse(
        &self,
        response: WireResponse,
        request: &ChatRequest,
    ) -> GatewayResult<ChatResponse> {
        let WireResponse::Anthropic(message) = response else {
            return Err(GatewayError::transform(
                "anthropic transformer received a response from another wire family",
            ));
        };

        let mut text = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        for block in message.content {
            match block {
                ContentBlock::Text { text: t } => text.push_str(&t),
                ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall {
                        id,
                        kind: ToolCallKind::Function,
                        function: FunctionCall {
                            arguments: serde_json::to_string(&input).map_err(|e| {
                                GatewayError::transform(format!(
                                    "tool_use input for '{}' is not serializable: {}",
                                    name, e
                                ))
                            })?,
                            name,
                        },
                    });
                }
            }
        }

        let finish_reason = match message.stop_reason {
            Some(StopReason::EndTurn) | Some(StopReason::StopSequence) | None => {
                FinishReason::Stop
            }
            Some(StopReason::MaxTokens) => FinishReason::Length,
            Some(StopReason::ToolUse) => FinishReason::ToolCalls,
            Some(StopReason::Refusal) => FinishReason::ContentFilter,
        };

        // Transformers never consult the clock; the intake timestamp
        // stands in for "created".
        let created = request
            .metadata
            .received_at
            .map(|t| t.timestamp().max(0) as u64)
            .unwrap_or(0);

        Ok(ChatResponse {
            id: message.id,
            model: message.model,
            created,
            choices: vec![Choice {
                index: 0,
                message: AssistantMessage {
                    role: Role::Assistant,
                    content: text,
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(tool_calls)
                    },
                },
                finish_reason,
            }],
            usage: Usage {
                prompt_tokens: message.usage.input_tokens,
                completion_tokens: message.usage.output_tokens,
                total_tokens: message.usage.input_tokens + message.usage.output_tokens,
            },
            metadata: Default::default(),
        })
    }
}

// ============================================================================
// Request Forward Helpers
// ============================================================================

fn forward_user_content(
    content: &MessageContent,
    options: &TransformOptions,
) -> GatewayResult<InputContent> {
    match content {
        MessageContent::Text(text) => Ok(InputContent::String(text.clone())),
        MessageContent::Parts(parts) => {
            let blocks = parts
                .iter()
                .map(|part| forward_part(part, options))
                .collect::<GatewayResult<Vec<_>>>()?;
            Ok(InputContent::Blocks(blocks))
        }
    }
}

fn forward_part(
    part: &ContentPart,
    options: &TransformOptions,
) -> GatewayResult<InputContentBlock> {
    match part {
        ContentPart::Text { text } => {
            Ok(InputContentBlock::Text(TextBlock { text: text.clone() }))
        }
        ContentPart::Image { source } => {
            if !options.capabilities.multimodal {
                return Err(GatewayError::transform(
                    "image content targeted at a worker without multimodal capability",
                ));
            }
            Ok(InputContentBlock::Image(ImageBlock {
                source: match source {
                    ImageSource::Base64 { media_type, data } => AnthropicImageSource::Base64 {
                        media_type: media_type.clone(),
                        data: data.clone(),
                    },
                    ImageSource::Url { url } => AnthropicImageSource::Url { url: url.clone() },
                },
            }))
        }
        ContentPart::ToolUse { id, name, input } => Ok(InputContentBlock::ToolUse(ToolUseBlock {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        })),
        ContentPart::ToolResult {
            tool_use_id,
            content,
        } => Ok(InputContentBlock::ToolResult(ToolResultBlock {
            tool_use_id: tool_use_id.clone(),
            content: Some(ToolResultContent::String(content.clone())),
            is_error: None,
        })),
    }
}

fn forward_assistant_content(message: &Message) -> GatewayResult<InputContent> {
    let mut blocks: Vec<InputContentBlock> = Vec::new();

    match &message.content {
        MessageContent::Text(text) => {
            if !text.is_empty() {
                blocks.push(InputContentBlock::Text(TextBlock { text: text.clone() }));
            }
        }
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => {
                        blocks.push(InputContentBlock::Text(TextBlock { text: text.clone() }));
                    }
                    ContentPart::ToolUse { id, name, input } => {
                        blocks.push(InputContentBlock::ToolUse(ToolUseBlock {
                            id: id.clone(),
                            name: name.clone(),
                            input: input.clone(),
                        }));
                    }
                    _ => {
                        return Err(GatewayError::transform(
                            "assistant messages carry only text and tool_use on the anthropic wire",
                        ));
                    }
                }
            }
        }
    }

    // Tool calls become structured tool_use blocks; arguments are parsed
    // from their JSON-string form.
    if let Some(calls) = &message.tool_calls {
        for call in calls {
            blocks.push(InputContentBlock::ToolUse(ToolUseBlock {
                id: call.id.clone(),
                name: call.function.name.clone(),
                input: parse_tool_arguments(&call.function.name, &call.function.arguments)?,
            }));
        }
    }

    if blocks.is_empty() {
        // Anthropic rejects empty content arrays.
        blocks.push(InputContentBlock::Text(TextBlock {
            text: String::new(),
        }));
    }
    Ok(InputContent::Blocks(blocks))
}

fn forward_tool(tool: &Tool) -> GatewayResult<AnthropicTool> {
    let schema = tool.parameters.as_object().ok_or_else(|| {
        GatewayError::transform(format!(
            "tool '{}' parameters must be a JSON-schema object",
            tool.name
        ))
    })?;

    let schema_type = schema
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("object")
        .to_string();

    let properties = schema.get("properties").and_then(|v| v.as_object()).map(
        |props| {
            props
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        },
    );

    let required = schema.get("required").and_then(|v| v.as_array()).map(|arr| {
        arr.iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect()
    });

    let additional = schema
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), "type" | "properties" | "required"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(AnthropicTool {
        name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema: InputSchema {
            schema_type,
            properties,
            required,
            additional,
        },
    })
}

fn forward_tool_choice(choice: &ToolChoice) -> AnthropicToolChoice {
    match choice {
        ToolChoice::Mode(ToolChoiceMode::Auto) | ToolChoice::Mode(ToolChoiceMode::None) => {
            // "none" never reaches here: tools are stripped first.
            AnthropicToolChoice::Auto {
                disable_parallel_tool_use: None,
            }
        }
        ToolChoice::Mode(ToolChoiceMode::Required) => AnthropicToolChoice::Any {
            disable_parallel_tool_use: None,
        },
        ToolChoice::Function { function } => AnthropicToolChoice::Tool {
            name: function.name.clone(),
            disable_parallel_tool_use: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use gateway_protocol::canonical::{RequestMetadata, StopSequences};
    use serde_json::json;

    use super::*;

    fn options() -> TransformOptions {
        TransformOptions::default()
    }

    fn request_with(messages: Vec<Message>) -> ChatRequest {
        ChatRequest {
            id: "t1".to_string(),
            model: "default".to_string(),
            messages,
            tools: None,
            tool_choice: None,
            temperature: None,
            top_p: None,
            stop: None,
            max_tokens: Some(32),
            stream: false,
            metadata: RequestMetadata::default(),
        }
    }

    fn unwrap_anthropic(wire: WireRequest) -> CreateMessageRequest {
        match wire {
            WireRequest::Anthropic(req) => req,
            WireRequest::OpenAi(_) => panic!("expected anthropic wire request"),
        }
    }

    #[test]
    fn system_message_moves_to_top_level() {
        let transformer = AnthropicTransformer::new();
        let request = request_with(vec![
            Message::text(Role::System, "be brief"),
            Message::text(Role::User, "Hello"),
        ]);

        let wire = unwrap_anthropic(
            transformer
                .request_forward(&request, "m-a", &options())
                .unwrap(),
        );
        assert!(matches!(
            wire.system,
            Some(SystemContent::String(ref s)) if s == "be brief"
        ));
        // System content is removed from the messages array.
        assert_eq!(wire.messages.len(), 1);
        assert_eq!(wire.messages[0].role, AnthropicRole::User);
    }

    #[test]
    fn missing_max_tokens_acquires_default() {
        let transformer = AnthropicTransformer::new();
        let mut request = request_with(vec![Message::text(Role::User, "Hello")]);
        request.max_tokens = None;

        let mut opts = options();
        opts.default_max_tokens = Some(2048);
        let wire = unwrap_anthropic(
            transformer
                .request_forward(&request, "m-a", &opts)
                .unwrap(),
        );
        assert_eq!(wire.max_tokens, 2048);

        // Without a provider default the compiled fallback applies.
        let wire = unwrap_anthropic(
            transformer
                .request_forward(&request, "m-a", &options())
                .unwrap(),
        );
        assert_eq!(wire.max_tokens, FALLBACK_MAX_TOKENS);
    }

    #[test]
    fn tool_choice_none_strips_tools_entirely() {
        let transformer = AnthropicTransformer::new();
        let mut request = request_with(vec![Message::text(Role::User, "Hello")]);
        request.tools = Some(vec![Tool {
            name: "lookup".to_string(),
            description: None,
            parameters: json!({"type": "object"}),
        }]);
        request.tool_choice = Some(ToolChoice::Mode(ToolChoiceMode::None));

        let wire = unwrap_anthropic(
            transformer
                .request_forward(&request, "m-a", &options())
                .unwrap(),
        );
        assert!(wire.tools.is_none());
        assert!(wire.tool_choice.is_none());
    }

    #[test]
    fn required_maps_to_any() {
        let transformer = AnthropicTransformer::new();
        let mut request = request_with(vec![Message::text(Role::User, "Hello")]);
        request.tools = Some(vec![Tool {
            name: "lookup".to_string(),
            description: None,
            parameters: json!({"type": "object", "properties": {"q": {"type": "string"}}, "required": ["q"]}),
        }]);
        request.tool_choice = Some(ToolChoice::Mode(ToolChoiceMode::Required));

        let wire = unwrap_anthropic(
            transformer
                .request_forward(&request, "m-a", &options())
                .unwrap(),
        );
        assert!(matches!(
            wire.tool_choice,
            Some(AnthropicToolChoice::Any { .. })
        ));
        let tool = &wire.tools.as_ref().unwrap()[0];
        assert_eq!(tool.input_schema.schema_type, "object");
        assert_eq!(
            tool.input_schema.required.as_ref().unwrap(),
            &vec!["q".to_string()]
        );
    }

    #[test]
    fn assistant_tool_calls_become_tool_use_blocks() {
        let transformer = AnthropicTransformer::new();
        let request = request_with(vec![
            Message::text(Role::User, "look up x"),
            Message {
                role: Role::Assistant,
                content: MessageContent::Text(String::new()),
                tool_call_id: None,
                tool_calls: Some(vec![ToolCall {
                    id: "tu1".to_string(),
                    kind: ToolCallKind::Function,
                    function: FunctionCall {
                        name: "lookup".to_string(),
                        arguments: "{\"q\":\"x\"}".to_string(),
                    },
                }]),
            },
            Message {
                role: Role::Tool,
                content: MessageContent::Text("found it".to_string()),
                tool_call_id: Some("tu1".to_string()),
                tool_calls: None,
            },
        ]);

        let wire = unwrap_anthropic(
            transformer
                .request_forward(&request, "m-a", &options())
                .unwrap(),
        );
        assert_eq!(wire.messages.len(), 3);

        // Arguments string became a structured input object.
        let InputContent::Blocks(blocks) = &wire.messages[1].content else {
            panic!("expected blocks");
        };
        let InputContentBlock::ToolUse(tool_use) = &blocks[0] else {
            panic!("expected tool_use block");
        };
        assert_eq!(tool_use.input, json!({"q": "x"}));

        // Tool result rides a user-role message.
        assert_eq!(wire.messages[2].role, AnthropicRole::User);
        let InputContent::Blocks(blocks) = &wire.messages[2].content else {
            panic!("expected blocks");
        };
        assert!(matches!(blocks[0], InputContentBlock::ToolResult(_)));
    }

    #[test]
    fn invalid_tool_arguments_are_structural() {
        let transformer = AnthropicTransformer::new();
        let request = request_with(vec![Message {
            role: Role::Assistant,
            content: MessageContent::Text(String::new()),
            tool_call_id: None,
            tool_calls: Some(vec![ToolCall {
                id: "tu1".to_string(),
                kind: ToolCallKind::Function,
                function: FunctionCall {
                    name: "lookup".to_string(),
                    arguments: "{\"q\":".to_string(),
                },
            }]),
        }]);

        let err = transformer
            .request_forward(&request, "m-a", &options())
            .unwrap_err();
        assert_eq!(err.kind_code(), "TransformError");
    }

    #[test]
    fn stop_sequences_always_an_array() {
        let transformer = AnthropicTransformer::new();
        let mut request = request_with(vec![Message::text(Role::User, "Hello")]);
        request.stop = Some(StopSequences::Single("END".to_string()));

        let wire = unwrap_anthropic(
            transformer
                .request_forward(&request, "m-a", &options())
                .unwrap(),
        );
        assert_eq!(wire.stop_sequences, Some(vec!["END".to_string()]));
    }

    #[test]
    fn reverses_tool_use_response() {
        let transformer = AnthropicTransformer::new();
        let request = request_with(vec![Message::text(Role::User, "look up x")]);

        let message: AnthropicMessage = serde_json::from_value(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "m-a",
            "content": [
                {"type": "tool_use", "id": "tu1", "name": "lookup", "input": {"q": "x"}}
            ],
            "stop_reason": "tool_use",
            "stop_sequence": null,
            "usage": {"input_tokens": 3, "output_tokens": 5}
        }))
        .unwrap();

        let canonical = transformer
            .response_reverse(WireResponse::Anthropic(message), &request)
            .unwrap();
        assert_eq!(canonical.choices[0].finish_reason, FinishReason::ToolCalls);
        let call = &canonical.choices[0].message.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.id, "tu1");
        assert_eq!(call.kind, ToolCallKind::Function);
        assert_eq!(call.function.name, "lookup");
        assert_eq!(call.function.arguments, "{\"q\":\"x\"}");
        assert_eq!(canonical.usage.total_tokens, 8);
    }

    #[test]
    fn stop_reason_mapping_is_total() {
        let transformer = AnthropicTransformer::new();
        let request = request_with(vec![Message::text(Role::User, "Hello")]);

        let cases = [
            (json!("end_turn"), FinishReason::Stop),
            (json!("stop_sequence"), FinishReason::Stop),
            (json!("max_tokens"), FinishReason::Length),
            (json!("tool_use"), FinishReason::ToolCalls),
            (json!("refusal"), FinishReason::ContentFilter),
            (json!(null), FinishReason::Stop),
        ];
        for (wire_reason, expected) in cases {
            let message: AnthropicMessage = serde_json::from_value(json!({
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "model": "m-a",
                "content": [{"type": "text", "text": "hi"}],
                "stop_reason": wire_reason,
                "stop_sequence": null,
                "usage": {"input_tokens": 1, "output_tokens": 1}
            }))
            .unwrap();
            let canonical = transformer
                .response_reverse(WireResponse::Anthropic(message), &request)
                .unwrap();
            assert_eq!(canonical.choices[0].finish_reason, expected);
        }
    }

    #[test]
    fn developer_role_is_rejected_at_the_wire() {
        let transformer = AnthropicTransformer::new();
        let request = request_with(vec![Message::text(Role::Developer, "instructions")]);
        let err = transformer
            .request_forward(&request, "m-a", &options())
            .unwrap_err();
        assert_eq!(err.kind_code(), "TransformError");
    }
}
