//! Anthropic messages adapter.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use gateway_protocol::{
    anthropic::{
        AnthropicMessage, AnthropicUsage, ContentBlock, ContentBlockDelta, MessageStreamEvent,
        StopReason,
    },
    provider::{WireFamily, WorkerSpec},
};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::{
    apply_credential, build_url, send_with_retries, AdapterReply, ProviderAdapter, SseParser,
    WireEventStream, WireStreamEvent,
};
use crate::{
    config::RetryConfig,
    core::credentials::Credential,
    error::{GatewayError, GatewayResult},
    transform::{WireRequest, WireResponse},
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    client: reqwest::Client,
    retry: RetryConfig,
    force_non_streaming: bool,
}

impl AnthropicAdapter {
    pub fn new(retry: RetryConfig, force_non_streaming: bool) -> Self {
        Self {
            client: reqwest::Client::builder()
                .build()
                .expect("failed to build upstream HTTP client"),
            retry,
            force_non_streaming,
        }
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn family(&self) -> WireFamily {
        WireFamily::Anthropic
    }

    async fn call(
        &self,
        worker: &WorkerSpec,
        credential: &Credential,
        request: WireRequest,
        deadline: Instant,
    ) -> GatewayResult<AdapterReply> {
        let WireRequest::Anthropic(wire) = request else {
            return Err(GatewayError::internal(
                "anthropic adapter received a request from another wire family",
            ));
        };

        let url = build_url(&worker.endpoint, "/messages", &wire.model);
        let streaming = wire.stream.unwrap_or(false);

        let response = send_with_retries(worker, &self.retry, deadline, || {
            apply_credential(self.client.post(&url), credential)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&wire)
        })
        .await?;

        if streaming {
            let events = event_stream(response, worker.worker_id.clone());
            if self.force_non_streaming {
                let assembled = assemble_stream(events, &worker.worker_id).await?;
                return Ok(AdapterReply::Complete(WireResponse::Anthropic(assembled)));
            }
            return Ok(AdapterReply::Stream(events));
        }

        let parsed: AnthropicMessage = response.json().await.map_err(|e| {
            GatewayError::Upstream {
                worker_id: worker.worker_id.clone(),
                message: format!("invalid response body: {}", e),
            }
        })?;
        Ok(AdapterReply::Complete(WireResponse::Anthropic(parsed)))
    }
}

/// Parse the upstream SSE body into message events on a channel-backed
/// stream. Terminates on `message_stop`.
fn event_stream(response: reqwest::Response, worker_id: String) -> WireEventStream {
    let (tx, rx) = tokio::sync::mpsc::channel::<GatewayResult<WireStreamEvent>>(32);

    tokio::spawn(async move {
        let mut bytes = response.bytes_stream();
        let mut parser = SseParser::new();

        while let Some(chunk) = bytes.next().await {
            let data = match chunk {
                Ok(data) => data,
                Err(e) => {
                    warn!(worker_id = %worker_id, error = %e, "Upstream stream broke");
                    let _ = tx
                        .send(Err(GatewayError::PartialResponse {
                            message: format!("stream terminated: {}", e),
                            partial: None,
                        }))
                        .await;
                    return;
                }
            };

            for payload in parser.push(&data) {
                match serde_json::from_str::<MessageStreamEvent>(&payload) {
                    Ok(event) => {
                        let stop = matches!(event, MessageStreamEvent::MessageStop);
                        if tx
                            .send(Ok(WireStreamEvent::Anthropic(event)))
                            .await
                            .is_err()
                        {
                            return;
                        }
                        if stop {
                            debug!(worker_id = %worker_id, "Upstream stream complete");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(worker_id = %worker_id, error = %e, "Unparseable stream event");
                        let _ = tx
                            .send(Err(GatewayError::Upstream {
                                worker_id: worker_id.clone(),
                                message: format!("invalid stream event: {}", e),
                            }))
                            .await;
                        return;
                    }
                }
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}

enum BlockAccum {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        initial_input: serde_json::Value,
        partial_json: String,
    },
}

/// Consume a message event stream fully and assemble the complete
/// response (force-non-streaming). `input_json_delta` fragments are
/// concatenated per block and parsed once, whole.
pub(crate) async fn assemble_stream(
    mut events: WireEventStream,
    worker_id: &str,
) -> GatewayResult<AnthropicMessage> {
    let mut base: Option<AnthropicMessage> = None;
    let mut blocks: BTreeMap<u32, BlockAccum> = BTreeMap::new();
    let mut stop_reason: Option<StopReason> = None;
    let mut stop_sequence: Option<String> = None;
    let mut output_tokens: Option<u32> = None;
    let mut finished = false;

    while let Some(event) = events.next().await {
        let event = match event {
            Ok(WireStreamEvent::Anthropic(event)) => event,
            Ok(_) => {
                return Err(GatewayError::internal(
                    "anthropic assembler received an event from another wire family",
                ))
            }
            Err(e) => {
                return Err(GatewayError::PartialResponse {
                    message: format!("stream broke during assembly: {}", e),
                    partial: partial_value(&base, &blocks),
                });
            }
        };

        match event {
            MessageStreamEvent::MessageStart { message } => base = Some(message),
            MessageStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                let accum = match content_block {
                    ContentBlock::Text { text } => BlockAccum::Text(text),
                    ContentBlock::ToolUse { id, name, input } => BlockAccum::ToolUse {
                        id,
                        name,
                        initial_input: input,
                        partial_json: String::new(),
                    },
                };
                blocks.insert(index, accum);
            }
            MessageStreamEvent::ContentBlockDelta { index, delta } => {
                match (blocks.get_mut(&index), delta) {
                    (Some(BlockAccum::Text(text)), ContentBlockDelta::TextDelta { text: t }) => {
                        text.push_str(&t);
                    }
                    (
                        Some(BlockAccum::ToolUse { partial_json, .. }),
                        ContentBlockDelta::InputJsonDelta { partial_json: p },
                    ) => {
                        partial_json.push_str(&p);
                    }
                    (Some(_), _) => {
                        return Err(GatewayError::PartialResponse {
                            message: "delta type does not match its content block".to_string(),
                            partial: partial_value(&base, &blocks),
                        });
                    }
                    (None, _) => {
                        return Err(GatewayError::PartialResponse {
                            message: format!("delta for unknown content block {}", index),
                            partial: partial_value(&base, &blocks),
                        });
                    }
                }
            }
            MessageStreamEvent::ContentBlockStop { .. } => {}
            MessageStreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    stop_reason = delta.stop_reason;
                }
                if delta.stop_sequence.is_some() {
                    stop_sequence = delta.stop_sequence;
                }
                output_tokens = Some(usage.output_tokens);
            }
            MessageStreamEvent::MessageStop => {
                finished = true;
                break;
            }
            MessageStreamEvent::Ping => {}
            MessageStreamEvent::Error { error } => {
                return Err(GatewayError::PartialResponse {
                    message: format!("upstream error event: {}", error.message),
                    partial: partial_value(&base, &blocks),
                });
            }
        }
    }

    if !finished {
        return Err(GatewayError::PartialResponse {
            message: format!("worker {} stream ended before message_stop", worker_id),
            partial: partial_value(&base, &blocks),
        });
    }

    let mut message = base.ok_or_else(|| GatewayError::PartialResponse {
        message: "stream finished without message_start".to_string(),
        partial: None,
    })?;

    message.content = blocks
        .into_values()
        .map(|accum| match accum {
            BlockAccum::Text(text) => Ok(ContentBlock::Text { text }),
            BlockAccum::ToolUse {
                id,
                name,
                initial_input,
                partial_json,
            } => {
                let input = if partial_json.is_empty() {
                    initial_input
                } else {
                    serde_json::from_str(&partial_json).map_err(|e| {
                        GatewayError::PartialResponse {
                            message: format!(
                                "tool_use input for '{}' never became valid JSON: {}",
                                name, e
                            ),
                            partial: None,
                        }
                    })?
                };
                Ok(ContentBlock::ToolUse { id, name, input })
            }
        })
        .collect::<GatewayResult<Vec<_>>>()?;

    if stop_reason.is_some() {
        message.stop_reason = stop_reason;
    }
    if stop_sequence.is_some() {
        message.stop_sequence = stop_sequence;
    }
    if let Some(tokens) = output_tokens {
        message.usage = AnthropicUsage {
            input_tokens: message.usage.input_tokens,
            output_tokens: tokens,
        };
    }

    Ok(message)
}

fn partial_value(
    base: &Option<AnthropicMessage>,
    blocks: &BTreeMap<u32, BlockAccum>,
) -> Option<serde_json::Value> {
    let text: Vec<String> = blocks
        .values()
        .filter_map(|accum| match accum {
            BlockAccum::Text(text) => Some(text.clone()),
            BlockAccum::ToolUse { .. } => None,
        })
        .collect();
    Some(serde_json::json!({
        "id": base.as_ref().map(|m| m.id.clone()),
        "model": base.as_ref().map(|m| m.model.clone()),
        "content": text,
    }))
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use serde_json::json;

    use super::*;

    fn event(value: serde_json::Value) -> GatewayResult<WireStreamEvent> {
        Ok(WireStreamEvent::Anthropic(
            serde_json::from_value(value).unwrap(),
        ))
    }

    fn to_stream(events: Vec<GatewayResult<WireStreamEvent>>) -> WireEventStream {
        Box::pin(stream::iter(events))
    }

    fn start_event() -> GatewayResult<WireStreamEvent> {
        event(json!({
            "type": "message_start",
            "message": {
                "id": "msg_1", "type": "message", "role": "assistant", "model": "m-a",
                "content": [], "stop_reason": null, "stop_sequence": null,
                "usage": {"input_tokens": 3, "output_tokens": 0}
            }
        }))
    }

    #[tokio::test]
    async fn assembles_text_stream() {
        let events = to_stream(vec![
            start_event(),
            event(json!({"type": "content_block_start", "index": 0,
                         "content_block": {"type": "text", "text": ""}})),
            event(json!({"type": "content_block_delta", "index": 0,
                         "delta": {"type": "text_delta", "text": "Hel"}})),
            event(json!({"type": "content_block_delta", "index": 0,
                         "delta": {"type": "text_delta", "text": "lo"}})),
            event(json!({"type": "content_block_stop", "index": 0})),
            event(json!({"type": "message_delta",
                         "delta": {"stop_reason": "end_turn", "stop_sequence": null},
                         "usage": {"output_tokens": 2}})),
            event(json!({"type": "message_stop"})),
        ]);

        let message = assemble_stream(events, "acme:0").await.unwrap();
        assert!(matches!(
            &message.content[0],
            ContentBlock::Text { text } if text == "Hello"
        ));
        assert_eq!(message.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(message.usage.output_tokens, 2);
    }

    #[tokio::test]
    async fn reassembles_partial_json_tool_input() {
        let events = to_stream(vec![
            start_event(),
            event(json!({"type": "content_block_start", "index": 0,
                         "content_block": {"type": "tool_use", "id": "tu1",
                                            "name": "lookup", "input": {}}})),
            event(json!({"type": "content_block_delta", "index": 0,
                         "delta": {"type": "input_json_delta", "partial_json": "{\"q\":\""}})),
            event(json!({"type": "content_block_delta", "index": 0,
                         "delta": {"type": "input_json_delta", "partial_json": "hello\"}"}})),
            event(json!({"type": "content_block_stop", "index": 0})),
            event(json!({"type": "message_delta",
                         "delta": {"stop_reason": "tool_use", "stop_sequence": null},
                         "usage": {"output_tokens": 5}})),
            event(json!({"type": "message_stop"})),
        ]);

        let message = assemble_stream(events, "acme:0").await.unwrap();
        let ContentBlock::ToolUse { id, name, input } = &message.content[0] else {
            panic!("expected tool_use block");
        };
        assert_eq!(id, "tu1");
        assert_eq!(name, "lookup");
        assert_eq!(input, &json!({"q": "hello"}));
        assert_eq!(message.stop_reason, Some(StopReason::ToolUse));
    }

    #[tokio::test]
    async fn missing_message_stop_is_partial() {
        let events = to_stream(vec![
            start_event(),
            event(json!({"type": "content_block_start", "index": 0,
                         "content_block": {"type": "text", "text": "Hel"}})),
        ]);

        let err = assemble_stream(events, "acme:0").await.unwrap_err();
        let GatewayError::PartialResponse { partial, .. } = err else {
            panic!("expected partial response");
        };
        assert_eq!(partial.unwrap()["content"][0], "Hel");
    }

    #[tokio::test]
    async fn upstream_error_event_is_partial() {
        let events = to_stream(vec![
            start_event(),
            event(json!({"type": "error",
                         "error": {"type": "overloaded_error", "message": "overloaded"}})),
        ]);

        let err = assemble_stream(events, "acme:0").await.unwrap_err();
        assert_eq!(err.kind_code(), "PartialResponse");
    }
}
