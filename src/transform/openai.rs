//! Canonical <-> OpenAI chat/completions transformer.
//!
//! This family also backs the gateway's own `/v1/chat/completions`
//! surface, so both directions exist for requests and responses: the
//! intake path runs `request_reverse`/`response_forward`.

use gateway_protocol::{
    canonical::{
        AssistantMessage, ChatRequest, ChatResponse, Choice, ContentPart, FinishReason,
        FunctionCall, ImageSource, Message, MessageContent, RequestMetadata, Role, StopSequences,
        Tool, ToolCall, ToolCallKind, ToolChoice, ToolChoiceMode, Usage,
    },
    openai::{
        ChatChoiceMessage, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
        FunctionSpec, ImageUrl, NamedFunctionRef, OpenAiContent, OpenAiContentPart,
        OpenAiFinishReason, OpenAiFunctionCall, OpenAiRole, OpenAiToolCall, OpenAiToolChoice,
        OpenAiToolChoiceMode, OpenAiUsage, StringOrArray, ToolDefinition,
    },
    provider::WireFamily,
};
use serde_json::Map;

use super::{TransformOptions, Transformer, WireRequest, WireResponse};
use crate::error::{GatewayError, GatewayResult};

pub struct OpenAiTransformer;

impl OpenAiTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OpenAiTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for OpenAiTransformer {
    fn family(&self) -> WireFamily {
        WireFamily::OpenAi
    }

    fn request_forward(
        &self,
        request: &ChatRequest,
        target_model: &str,
        options: &TransformOptions,
    ) -> GatewayResult<WireRequest> {
        let mut messages = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            forward_message(message, options, &mut messages)?;
        }

        Ok(WireRequest::OpenAi(ChatCompletionRequest {
            model: target_model.to_string(),
            messages,
            temperature: request.temperature,
            top_p: request.top_p,
            stop: request.stop.as_ref().map(|stop| match stop {
                StopSequences::Single(s) => StringOrArray::String(s.clone()),
                StopSequences::Many(v) => StringOrArray::Array(v.clone()),
            }),
            max_tokens: request.max_tokens,
            stream: request.stream,
            tools: request
                .tools
                .as_ref()
                .map(|tools| tools.iter().map(forward_tool).collect()),
            // "none" is forwarded on this wire; the Anthropic transformer
            // strips tools instead.
            tool_choice: request.tool_choice.as_ref().map(forward_tool_choice),
            user: None,
            other: Map::new(),
        }))
    }

    fn response_reverse(
        &self,
        response: WireResponse,
        _request: &ChatRequest,
    ) -> GatewayResult<ChatResponse> {
        let WireResponse::OpenAi(response) = response else {
            return Err(GatewayError::transform(
                "openai transformer received a response from another wire family",
            ));
        };

        let choices = response
            .choices
            .into_iter()
            .map(reverse_choice)
            .collect::<GatewayResult<Vec<_>>>()?;

        Ok(ChatResponse {
            id: response.id,
            model: response.model,
            created: response.created,
            choices,
            usage: response.usage.map(reverse_usage).unwrap_or_default(),
            metadata: Default::default(),
        })
    }
}

impl OpenAiTransformer {
    /// Intake direction: an OpenAI wire request becomes canonical. The
    /// caller supplies the request id.
    pub fn request_reverse(
        &self,
        wire: ChatCompletionRequest,
        id: String,
    ) -> GatewayResult<ChatRequest> {
        let messages = wire
            .messages
            .into_iter()
            .map(reverse_message)
            .collect::<GatewayResult<Vec<_>>>()?;

        Ok(ChatRequest {
            id,
            model: wire.model,
            messages,
            tools: wire.tools.map(|tools| {
                tools
                    .into_iter()
                    .map(|t| Tool {
                        name: t.function.name,
                        description: t.function.description,
                        parameters: t.function.parameters,
                    })
                    .collect()
            }),
            tool_choice: wire.tool_choice.map(reverse_tool_choice),
            temperature: wire.temperature,
            top_p: wire.top_p,
            stop: wire.stop.map(|stop| match stop {
                StringOrArray::String(s) => StopSequences::Single(s),
                StringOrArray::Array(v) => StopSequences::Many(v),
            }),
            max_tokens: wire.max_tokens,
            stream: wire.stream,
            metadata: RequestMetadata::default(),
        })
    }

    /// Exit direction for the OpenAI surface: canonical response back to
    /// the wire shape.
    pub fn response_forward(&self, response: ChatResponse) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: response.id,
            object: "chat.completion".to_string(),
            created: response.created,
            model: response.model,
            choices: response
                .choices
                .into_iter()
                .map(|choice| gateway_protocol::openai::ChatChoice {
                    index: choice.index,
                    message: ChatChoiceMessage {
                        role: OpenAiRole::Assistant,
                        content: if choice.message.content.is_empty()
                            && choice.message.tool_calls.is_some()
                        {
                            None
                        } else {
                            Some(choice.message.content)
                        },
                        tool_calls: choice.message.tool_calls.map(|calls| {
                            calls.into_iter().map(forward_tool_call).collect()
                        }),
                    },
                    finish_reason: Some(forward_finish_reason(choice.finish_reason)),
                })
                .collect(),
            usage: Some(OpenAiUsage {
                prompt_tokens: response.usage.prompt_tokens,
                completion_tokens: response.usage.completion_tokens,
                total_tokens: response.usage.total_tokens,
            }),
            system_fingerprint: None,
        }
    }
}

// ============================================================================
// Request Forward Helpers
// ============================================================================

fn forward_message(
    message: &Message,
    options: &TransformOptions,
    out: &mut Vec<ChatMessage>,
) -> GatewayResult<()> {
    let role = forward_role(message.role);

    match &message.content {
        MessageContent::Text(text) => {
            out.push(ChatMessage {
                role,
                content: Some(OpenAiContent::Text(text.clone())),
                tool_calls: forward_tool_calls(message)?,
                tool_call_id: message.tool_call_id.clone(),
                name: None,
            });
        }
        MessageContent::Parts(parts) => {
            let mut wire_parts = Vec::new();
            let mut extra_calls: Vec<OpenAiToolCall> = Vec::new();
            let mut emitted_tool_results = false;

            for part in parts {
                match part {
                    ContentPart::Text { text } => {
                        wire_parts.push(OpenAiContentPart::Text { text: text.clone() });
                    }
                    ContentPart::Image { source } => {
                        if !options.capabilities.multimodal {
                            return Err(GatewayError::transform(
                                "image content targeted at a worker without multimodal capability",
                            ));
                        }
                        wire_parts.push(OpenAiContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: image_source_to_url(source),
                                detail: None,
                            },
                        });
                    }
                    ContentPart::ToolUse { id, name, input } => {
                        extra_calls.push(OpenAiToolCall {
                            id: id.clone(),
                            kind: "function".to_string(),
                            function: OpenAiFunctionCall {
                                name: name.clone(),
                                arguments: input.to_string(),
                            },
                        });
                    }
                    // A tool result embedded in content becomes its own
                    // tool-role message on this wire.
                    ContentPart::ToolResult {
                        tool_use_id,
                        content,
                    } => {
                        out.push(ChatMessage {
                            role: OpenAiRole::Tool,
                            content: Some(OpenAiContent::Text(content.clone())),
                            tool_calls: None,
                            tool_call_id: Some(tool_use_id.clone()),
                            name: None,
                        });
                        emitted_tool_results = true;
                    }
                }
            }

            let mut tool_calls = forward_tool_calls(message)?.unwrap_or_default();
            tool_calls.extend(extra_calls);

            // Tool-result-only content already produced its messages.
            if wire_parts.is_empty() && tool_calls.is_empty() && emitted_tool_results {
                return Ok(());
            }

            out.push(ChatMessage {
                role,
                content: if wire_parts.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(OpenAiContent::Parts(wire_parts))
                },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                tool_call_id: message.tool_call_id.clone(),
                name: None,
            });
        }
    }
    Ok(())
}

fn forward_role(role: Role) -> OpenAiRole {
    match role {
        Role::System => OpenAiRole::System,
        Role::Developer => OpenAiRole::Developer,
        Role::User => OpenAiRole::User,
        Role::Assistant => OpenAiRole::Assistant,
        Role::Tool => OpenAiRole::Tool,
    }
}

fn forward_tool_calls(message: &Message) -> GatewayResult<Option<Vec<OpenAiToolCall>>> {
    Ok(message.tool_calls.as_ref().map(|calls| {
        calls
            .iter()
            .map(|call| forward_tool_call(call.clone()))
            .collect()
    }))
}

fn forward_tool_call(call: ToolCall) -> OpenAiToolCall {
    OpenAiToolCall {
        id: call.id,
        kind: "function".to_string(),
        function: OpenAiFunctionCall {
            name: call.function.name,
            arguments: call.function.arguments,
        },
    }
}

fn forward_tool(tool: &Tool) -> ToolDefinition {
    ToolDefinition {
        kind: "function".to_string(),
        function: FunctionSpec {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

fn forward_tool_choice(choice: &ToolChoice) -> OpenAiToolChoice {
    match choice {
        ToolChoice::Mode(ToolChoiceMode::Auto) => {
            OpenAiToolChoice::Mode(OpenAiToolChoiceMode::Auto)
        }
        ToolChoice::Mode(ToolChoiceMode::None) => {
            OpenAiToolChoice::Mode(OpenAiToolChoiceMode::None)
        }
        ToolChoice::Mode(ToolChoiceMode::Required) => {
            OpenAiToolChoice::Mode(OpenAiToolChoiceMode::Required)
        }
        ToolChoice::Function { function } => OpenAiToolChoice::Named {
            kind: "function".to_string(),
            function: NamedFunctionRef {
                name: function.name.clone(),
            },
        },
    }
}

fn image_source_to_url(source: &ImageSource) -> String {
    match source {
        ImageSource::Url { url } => url.clone(),
        ImageSource::Base64 { media_type, data } => {
            format!("data:{};base64,{}", media_type, data)
        }
    }
}

// ============================================================================
// Response Reverse Helpers
// ============================================================================

fn reverse_choice(choice: gateway_protocol::openai::ChatChoice) -> GatewayResult<Choice> {
    let tool_calls = choice
        .message
        .tool_calls
        .map(|calls| calls.into_iter().map(reverse_tool_call).collect::<Vec<_>>());

    let finish_reason = match choice.finish_reason {
        Some(reason) => reverse_finish_reason(reason),
        None if tool_calls.is_some() => FinishReason::ToolCalls,
        None => FinishReason::Stop,
    };

    Ok(Choice {
        index: choice.index,
        message: AssistantMessage {
            role: Role::Assistant,
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
        },
        finish_reason,
    })
}

fn reverse_tool_call(call: OpenAiToolCall) -> ToolCall {
    ToolCall {
        id: call.id,
        kind: ToolCallKind::Function,
        function: FunctionCall {
            name: call.function.name,
            arguments: call.function.arguments,
        },
    }
}

fn reverse_finish_reason(reason: OpenAiFinishReason) -> FinishReason {
    match reason {
        OpenAiFinishReason::Stop => FinishReason::Stop,
        OpenAiFinishReason::Length => FinishReason::Length,
        OpenAiFinishReason::ToolCalls => FinishReason::ToolCalls,
        OpenAiFinishReason::ContentFilter => FinishReason::ContentFilter,
    }
}

fn forward_finish_reason(reason: FinishReason) -> OpenAiFinishReason {
    match reason {
        FinishReason::Stop => OpenAiFinishReason::Stop,
        FinishReason::Length => OpenAiFinishReason::Length,
        FinishReason::ToolCalls => OpenAiFinishReason::ToolCalls,
        FinishReason::ContentFilter => OpenAiFinishReason::ContentFilter,
    }
}

fn reverse_usage(usage: OpenAiUsage) -> Usage {
    Usage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

// ============================================================================
// Intake Helpers
// ============================================================================

fn reverse_message(wire: ChatMessage) -> GatewayResult<Message> {
    let role = match wire.role {
        OpenAiRole::System => Role::System,
        OpenAiRole::Developer => Role::Developer,
        OpenAiRole::User => Role::User,
        OpenAiRole::Assistant => Role::Assistant,
        OpenAiRole::Tool => Role::Tool,
    };

    let content = match wire.content {
        Some(OpenAiContent::Text(text)) => MessageContent::Text(text),
        Some(OpenAiContent::Parts(parts)) => MessageContent::Parts(
            parts
                .into_iter()
                .map(|part| match part {
                    OpenAiContentPart::Text { text } => ContentPart::Text { text },
                    OpenAiContentPart::ImageUrl { image_url } => ContentPart::Image {
                        source: url_to_image_source(image_url.url),
                    },
                })
                .collect(),
        ),
        None => MessageContent::Text(String::new()),
    };

    Ok(Message {
        role,
        content,
        tool_call_id: wire.tool_call_id,
        tool_calls: wire.tool_calls.map(|calls| {
            calls.into_iter().map(reverse_tool_call).collect()
        }),
    })
}

fn url_to_image_source(url: String) -> ImageSource {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((media_type, data)) = rest.split_once(";base64,") {
            return ImageSource::Base64 {
                media_type: media_type.to_string(),
                data: data.to_string(),
            };
        }
    }
    ImageSource::Url { url }
}

fn reverse_tool_choice(choice: OpenAiToolChoice) -> ToolChoice {
    match choice {
        OpenAiToolChoice::Mode(OpenAiToolChoiceMode::Auto) => {
            ToolChoice::Mode(ToolChoiceMode::Auto)
        }
        OpenAiToolChoice::Mode(OpenAiToolChoiceMode::None) => {
            ToolChoice::Mode(ToolChoiceMode::None)
        }
        OpenAiToolChoice::Mode(OpenAiToolChoiceMode::Required) => {
            ToolChoice::Mode(ToolChoiceMode::Required)
        }
        OpenAiToolChoice::Named { function, .. } => ToolChoice::Function {
            function: gateway_protocol::canonical::NamedFunction {
                name: function.name,
            },
        },
    }
}
