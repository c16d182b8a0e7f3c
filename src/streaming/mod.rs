//! Streaming modes and stream translation.
//!
//! Three modes: force_non_streaming (buffer upstream, return complete),
//! native (pass adapter events through the family translator), simulated
//! (chunk a complete response into text slices). Whatever the mode,
//! callers that consume tool calls see exactly one complete
//! `{name, arguments}` object per call: partial fragments are
//! reassembled before anything is emitted.

use std::{collections::BTreeMap, pin::Pin, time::Duration};

use futures::{Stream, StreamExt};
use gateway_protocol::{
    anthropic::{ContentBlockDelta, MessageStreamEvent, StopReason},
    canonical::{
        ChatResponse, ChatStreamEvent, FinishReason, FunctionCall, ToolCall, ToolCallKind, Usage,
    },
    openai::{
        ChatCompletionChunk, ChatDelta, ChunkChoice, FunctionCallDelta, OpenAiFinishReason,
        OpenAiRole, OpenAiUsage, ToolCallDelta,
    },
};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    adapters::{WireEventStream, WireStreamEvent},
    config::StreamingConfig,
    error::{GatewayError, GatewayResult},
};

pub type CanonicalEventStream = Pin<Box<dyn Stream<Item = GatewayResult<ChatStreamEvent>> + Send>>;

/// How streaming requests are served.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    /// Buffer the upstream fully; the client gets one complete response.
    ForceNonStreaming,
    /// Pass upstream chunks through the family translator.
    Native,
    /// Call upstream non-streaming, then emit synthetic chunks.
    Simulated,
}

impl Default for StreamingMode {
    fn default() -> Self {
        StreamingMode::Native
    }
}

// ============================================================================
// Tool Call Reassembly
// ============================================================================

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Reassembles tool-call arguments from partial fragments. One complete
/// call per index comes out; half-JSON never does.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    calls: BTreeMap<u32, PendingToolCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Absorb an OpenAI-style delta fragment.
    pub fn absorb_openai(&mut self, delta: &ToolCallDelta) {
        let call = self.calls.entry(delta.index).or_default();
        if let Some(id) = &delta.id {
            if call.id.is_empty() {
                call.id = id.clone();
            }
        }
        if let Some(function) = &delta.function {
            if let Some(name) = &function.name {
                call.name.push_str(name);
            }
            if let Some(fragment) = &function.arguments {
                call.arguments.push_str(fragment);
            }
        }
    }

    /// Open an Anthropic tool_use block.
    pub fn start_anthropic(&mut self, index: u32, id: String, name: String) {
        self.calls.insert(
            index,
            PendingToolCall {
                id,
                name,
                arguments: String::new(),
            },
        );
    }

    /// Absorb an Anthropic `input_json_delta` fragment.
    pub fn absorb_anthropic(&mut self, index: u32, fragment: &str) {
        if let Some(call) = self.calls.get_mut(&index) {
            call.arguments.push_str(fragment);
        }
    }

    /// Validate and emit the completed calls in index order.
    pub fn finish(self) -> GatewayResult<Vec<ToolCall>> {
        self.calls
            .into_values()
            .map(|call| {
                let arguments = if call.arguments.is_empty() {
                    "{}".to_string()
                } else {
                    call.arguments
                };
                // Arguments must be one complete JSON document.
                serde_json::from_str::<serde_json::Value>(&arguments).map_err(|e| {
                    GatewayError::PartialResponse {
                        message: format!(
                            "tool call '{}' arguments never became valid JSON: {}",
                            call.name, e
                        ),
                        partial: None,
                    }
                })?;
                Ok(ToolCall {
                    id: call.id,
                    kind: ToolCallKind::Function,
                    function: FunctionCall {
                        name: call.name,
                        arguments,
                    },
                })
            })
            .collect()
    }
}

// ============================================================================
// Simulated Streaming
// ============================================================================

/// Slice text into chunks of at most `chunk_size` characters, never
/// splitting a multi-byte sequence.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;

    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count >= size {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Chunk a complete response into a synthetic event stream. Text is
/// sliced by the configured chunk size with the configured inter-chunk
/// delay; tool calls are emitted as single coherent events.
pub fn simulate_stream(response: ChatResponse, config: &StreamingConfig) -> CanonicalEventStream {
    let chunk_size = config.chunk_size;
    let delay = Duration::from_millis(config.chunk_delay_ms);
    let (tx, rx) = tokio::sync::mpsc::channel::<GatewayResult<ChatStreamEvent>>(32);

    tokio::spawn(async move {
        if tx
            .send(Ok(ChatStreamEvent::Start {
                id: response.id.clone(),
                model: response.model.clone(),
            }))
            .await
            .is_err()
        {
            return;
        }

        let mut finish_reason = FinishReason::Stop;
        for choice in &response.choices {
            finish_reason = choice.finish_reason;

            let mut first = true;
            for chunk in chunk_text(&choice.message.content, chunk_size) {
                if !first && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                first = false;
                if tx
                    .send(Ok(ChatStreamEvent::TextDelta {
                        index: choice.index,
                        text: chunk,
                    }))
                    .await
                    .is_err()
                {
                    return;
                }
            }

            if let Some(calls) = &choice.message.tool_calls {
                for call in calls {
                    if tx
                        .send(Ok(ChatStreamEvent::ToolCall {
                            index: choice.index,
                            tool_call: call.clone(),
                        }))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
        }

        let _ = tx
            .send(Ok(ChatStreamEvent::Finish {
                finish_reason,
                usage: Some(response.usage),
            }))
            .await;
    });

    Box::pin(ReceiverStream::new(rx))
}

// ============================================================================
// Native Stream Translation
// ============================================================================

/// Translate a wire event stream into canonical events. Text deltas pass
/// through; tool-call fragments are held back until complete.
pub fn translate_stream(events: WireEventStream) -> CanonicalEventStream {
    let (tx, rx) = tokio::sync::mpsc::channel::<GatewayResult<ChatStreamEvent>>(32);

    tokio::spawn(async move {
        let mut events = events;
        let mut assembler = ToolCallAssembler::new();
        let mut started = false;
        let mut finish_reason: Option<FinishReason> = None;
        let mut usage: Option<Usage> = None;
        let mut prompt_tokens = 0u32;

        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            match event {
                WireStreamEvent::OpenAi(chunk) => {
                    if !started {
                        started = true;
                        if tx
                            .send(Ok(ChatStreamEvent::Start {
                                id: chunk.id.clone(),
                                model: chunk.model.clone(),
                            }))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    if let Some(u) = chunk.usage {
                        usage = Some(Usage {
                            prompt_tokens: u.prompt_tokens,
                            completion_tokens: u.completion_tokens,
                            total_tokens: u.total_tokens,
                        });
                    }
                    for choice in chunk.choices {
                        if let Some(text) = choice.delta.content {
                            if !text.is_empty()
                                && tx
                                    .send(Ok(ChatStreamEvent::TextDelta {
                                        index: choice.index,
                                        text,
                                    }))
                                    .await
                                    .is_err()
                            {
                                return;
                            }
                        }
                        if let Some(calls) = choice.delta.tool_calls {
                            for delta in &calls {
                                assembler.absorb_openai(delta);
                            }
                        }
                        if let Some(reason) = choice.finish_reason {
                            finish_reason = Some(match reason {
                                OpenAiFinishReason::Stop => FinishReason::Stop,
                                OpenAiFinishReason::Length => FinishReason::Length,
                                OpenAiFinishReason::ToolCalls => FinishReason::ToolCalls,
                                OpenAiFinishReason::ContentFilter => FinishReason::ContentFilter,
                            });
                        }
                    }
                }
                WireStreamEvent::Anthropic(event) => match event {
                    MessageStreamEvent::MessageStart { message } => {
                        started = true;
                        prompt_tokens = message.usage.input_tokens;
                        if tx
                            .send(Ok(ChatStreamEvent::Start {
                                id: message.id,
                                model: message.model,
                            }))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    MessageStreamEvent::ContentBlockStart {
                        index,
                        content_block,
                    } => {
                        if let gateway_protocol::anthropic::ContentBlock::ToolUse {
                            id,
                            name,
                            ..
                        } = content_block
                        {
                            assembler.start_anthropic(index, id, name);
                        }
                    }
                    MessageStreamEvent::ContentBlockDelta { index, delta } => match delta {
                        ContentBlockDelta::TextDelta { text } => {
                            if tx
                                .send(Ok(ChatStreamEvent::TextDelta { index: 0, text }))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        ContentBlockDelta::InputJsonDelta { partial_json } => {
                            assembler.absorb_anthropic(index, &partial_json);
                        }
                    },
                    MessageStreamEvent::MessageDelta { delta, usage: u } => {
                        if let Some(reason) = delta.stop_reason {
                            finish_reason = Some(match reason {
                                StopReason::EndTurn | StopReason::StopSequence => {
                                    FinishReason::Stop
                                }
                                StopReason::MaxTokens => FinishReason::Length,
                                StopReason::ToolUse => FinishReason::ToolCalls,
                                StopReason::Refusal => FinishReason::ContentFilter,
                            });
                        }
                        usage = Some(Usage {
                            prompt_tokens,
                            completion_tokens: u.output_tokens,
                            total_tokens: prompt_tokens + u.output_tokens,
                        });
                    }
                    MessageStreamEvent::MessageStop => break,
                    MessageStreamEvent::ContentBlockStop { .. }
                    | MessageStreamEvent::Ping => {}
                    MessageStreamEvent::Error { error } => {
                        let _ = tx
                            .send(Err(GatewayError::PartialResponse {
                                message: format!("upstream error event: {}", error.message),
                                partial: None,
                            }))
                            .await;
                        return;
                    }
                },
            }
        }

        // Flush completed tool calls before the terminal event.
        if !assembler.is_empty() {
            match assembler.finish() {
                Ok(calls) => {
                    for call in calls {
                        if tx
                            .send(Ok(ChatStreamEvent::ToolCall {
                                index: 0,
                                tool_call: call,
                            }))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    if finish_reason.is_none() {
                        finish_reason = Some(FinishReason::ToolCalls);
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }

        let _ = tx
            .send(Ok(ChatStreamEvent::Finish {
                finish_reason: finish_reason.unwrap_or(FinishReason::Stop),
                usage,
            }))
            .await;
    });

    Box::pin(ReceiverStream::new(rx))
}

// ============================================================================
// OpenAI Surface Exit
// ============================================================================

/// Convert one canonical event into an OpenAI chunk for the
/// `/v1/chat/completions` streaming exit. `Start` carries the role
/// delta; tool calls are emitted as one whole fragment.
pub fn event_to_openai_chunk(
    event: &ChatStreamEvent,
    fallback_id: &str,
    fallback_model: &str,
    created: u64,
) -> ChatCompletionChunk {
    let base = |choices: Vec<ChunkChoice>, usage: Option<OpenAiUsage>| ChatCompletionChunk {
        id: fallback_id.to_string(),
        object: "chat.completion.chunk".to_string(),
        created,
        model: fallback_model.to_string(),
        choices,
        usage,
    };

    match event {
        ChatStreamEvent::Start { id, model } => ChatCompletionChunk {
            id: id.clone(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChatDelta {
                    role: Some(OpenAiRole::Assistant),
                    content: None,
                    tool_calls: None,
                },
                finish_reason: None,
            }],
            usage: None,
        },
        ChatStreamEvent::TextDelta { index, text } => base(
            vec![ChunkChoice {
                index: *index,
                delta: ChatDelta {
                    role: None,
                    content: Some(text.clone()),
                    tool_calls: None,
                },
                finish_reason: None,
            }],
            None,
        ),
        ChatStreamEvent::ToolCall { index, tool_call } => base(
            vec![ChunkChoice {
                index: *index,
                delta: ChatDelta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![ToolCallDelta {
                        index: 0,
                        id: Some(tool_call.id.clone()),
                        kind: Some("function".to_string()),
                        function: Some(FunctionCallDelta {
                            name: Some(tool_call.function.name.clone()),
                            arguments: Some(tool_call.function.arguments.clone()),
                        }),
                    }]),
                },
                finish_reason: None,
            }],
            None,
        ),
        ChatStreamEvent::Finish {
            finish_reason,
            usage,
        } => base(
            vec![ChunkChoice {
                index: 0,
                delta: ChatDelta::default(),
                finish_reason: Some(match finish_reason {
                    FinishReason::Stop => OpenAiFinishReason::Stop,
                    FinishReason::Length => OpenAiFinishReason::Length,
                    FinishReason::ToolCalls => OpenAiFinishReason::ToolCalls,
                    FinishReason::ContentFilter => OpenAiFinishReason::ContentFilter,
                }),
            }],
            usage.map(|u| OpenAiUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use gateway_protocol::canonical::{AssistantMessage, Choice, Role};
    use serde_json::json;

    use super::*;

    #[test]
    fn chunking_respects_character_boundaries() {
        // Multi-byte characters stay whole.
        let text = "héllo wörld ascii";
        let chunks = chunk_text(text, 4);
        assert_eq!(chunks.join(""), text);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 4);
        }

        let emoji = "ab🎉cd🎉ef";
        let chunks = chunk_text(emoji, 3);
        assert_eq!(chunks.join(""), emoji);
    }

    #[test]
    fn chunking_zero_size_still_makes_progress() {
        assert_eq!(chunk_text("abc", 0), vec!["a", "b", "c"]);
    }

    #[test]
    fn assembler_rejects_incomplete_json() {
        let mut assembler = ToolCallAssembler::new();
        assembler.start_anthropic(0, "tu1".to_string(), "lookup".to_string());
        assembler.absorb_anthropic(0, "{\"q\":\"");
        assert!(assembler.finish().is_err());
    }

    #[test]
    fn assembler_joins_openai_fragments() {
        let mut assembler = ToolCallAssembler::new();
        let first: ToolCallDelta = serde_json::from_value(json!({
            "index": 0, "id": "call_1", "type": "function",
            "function": {"name": "lookup", "arguments": "{\"q\":\""}
        }))
        .unwrap();
        let second: ToolCallDelta = serde_json::from_value(json!({
            "index": 0, "function": {"arguments": "hello\"}"}
        }))
        .unwrap();
        assembler.absorb_openai(&first);
        assembler.absorb_openai(&second);

        let calls = assembler.finish().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.arguments, "{\"q\":\"hello\"}");
    }

    fn response_with_tool_call() -> ChatResponse {
        ChatResponse {
            id: "r1".to_string(),
            model: "m-x".to_string(),
            created: 1,
            choices: vec![Choice {
                index: 0,
                message: AssistantMessage {
                    role: Role::Assistant,
                    content: "hello world".to_string(),
                    tool_calls: Some(vec![ToolCall {
                        id: "tu1".to_string(),
                        kind: ToolCallKind::Function,
                        function: FunctionCall {
                            name: "lookup".to_string(),
                            arguments: "{\"q\":\"x\"}".to_string(),
                        },
                    }]),
                },
                finish_reason: FinishReason::ToolCalls,
            }],
            usage: Usage {
                prompt_tokens: 1,
                completion_tokens: 2,
                total_tokens: 3,
            },
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn simulated_stream_emits_whole_tool_calls() {
        let config = StreamingConfig {
            mode: StreamingMode::Simulated,
            chunk_size: 4,
            chunk_delay_ms: 0,
        };
        let mut stream = simulate_stream(response_with_tool_call(), &config);

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut finished = false;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                ChatStreamEvent::Start { id, .. } => assert_eq!(id, "r1"),
                ChatStreamEvent::TextDelta { text: t, .. } => {
                    assert!(t.chars().count() <= 4);
                    text.push_str(&t);
                }
                ChatStreamEvent::ToolCall { tool_call, .. } => tool_calls.push(tool_call),
                ChatStreamEvent::Finish { finish_reason, .. } => {
                    assert_eq!(finish_reason, FinishReason::ToolCalls);
                    finished = true;
                }
            }
        }
        assert!(finished);
        assert_eq!(text, "hello world");
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].function.arguments, "{\"q\":\"x\"}");
    }

    #[tokio::test]
    async fn translate_anthropic_stream_reassembles_tool_args() {
        use futures::stream;

        let events: Vec<GatewayResult<WireStreamEvent>> = vec![
            Ok(WireStreamEvent::Anthropic(
                serde_json::from_value(json!({
                    "type": "message_start",
                    "message": {
                        "id": "msg_1", "type": "message", "role": "assistant", "model": "m-a",
                        "content": [], "stop_reason": null, "stop_sequence": null,
                        "usage": {"input_tokens": 3, "output_tokens": 0}
                    }
                }))
                .unwrap(),
            )),
            Ok(WireStreamEvent::Anthropic(
                serde_json::from_value(json!({
                    "type": "content_block_start", "index": 0,
                    "content_block": {"type": "tool_use", "id": "tu1", "name": "lookup", "input": {}}
                }))
                .unwrap(),
            )),
            Ok(WireStreamEvent::Anthropic(
                serde_json::from_value(json!({
                    "type": "content_block_delta", "index": 0,
                    "delta": {"type": "input_json_delta", "partial_json": "{\"q\":\""}
                }))
                .unwrap(),
            )),
            Ok(WireStreamEvent::Anthropic(
                serde_json::from_value(json!({
                    "type": "content_block_delta", "index": 0,
                    "delta": {"type": "input_json_delta", "partial_json": "hello\"}"}
                }))
                .unwrap(),
            )),
            Ok(WireStreamEvent::Anthropic(
                serde_json::from_value(json!({
                    "type": "message_delta",
                    "delta": {"stop_reason": "tool_use", "stop_sequence": null},
                    "usage": {"output_tokens": 5}
                }))
                .unwrap(),
            )),
            Ok(WireStreamEvent::Anthropic(
                serde_json::from_value(json!({"type": "message_stop"})).unwrap(),
            )),
        ];

        let mut stream = translate_stream(Box::pin(stream::iter(events)));
        let mut tool_calls = Vec::new();
        let mut finish = None;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                ChatStreamEvent::ToolCall { tool_call, .. } => tool_calls.push(tool_call),
                ChatStreamEvent::Finish {
                    finish_reason,
                    usage,
                } => {
                    finish = Some((finish_reason, usage));
                }
                _ => {}
            }
        }

        // No half-JSON ever surfaced; one coherent call came out.
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].function.arguments, "{\"q\":\"hello\"}");
        let (reason, usage) = finish.unwrap();
        assert_eq!(reason, FinishReason::ToolCalls);
        assert_eq!(usage.unwrap().total_tokens, 8);
    }

    #[test]
    fn openai_chunk_conversion() {
        let event = ChatStreamEvent::TextDelta {
            index: 0,
            text: "hi".to_string(),
        };
        let chunk = event_to_openai_chunk(&event, "r1", "m-x", 1);
        assert_eq!(chunk.object, "chat.completion.chunk");
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("hi"));
    }
}
