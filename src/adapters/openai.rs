//! OpenAI-compatible chat/completions adapter.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use gateway_protocol::{
    openai::{
        ChatChoice, ChatChoiceMessage, ChatCompletionChunk, ChatCompletionResponse,
        OpenAiFinishReason, OpenAiFunctionCall, OpenAiRole, OpenAiToolCall,
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

pub struct OpenAiAdapter {
    client: reqwest::Client,
    retry: RetryConfig,
    force_non_streaming: bool,
}

impl OpenAiAdapter {
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
impl ProviderAdapter for OpenAiAdapter {
    fn family(&self) -> WireFamily {
        WireFamily::OpenAi
    }

    async fn call(
        &self,
        worker: &WorkerSpec,
        credential: &Credential,
        request: WireRequest,
        deadline: Instant,
    ) -> GatewayResult<AdapterReply> {
        let WireRequest::OpenAi(wire) = request else {
            return Err(GatewayError::internal(
                "openai adapter received a request from another wire family",
            ));
        };

        let url = build_url(&worker.endpoint, "/chat/completions", &wire.model);
        let streaming = wire.stream;

        let response = send_with_retries(worker, &self.retry, deadline, || {
            apply_credential(self.client.post(&url), credential).json(&wire)
        })
        .await?;

        if streaming {
            let events = event_stream(response, worker.worker_id.clone());
            if self.force_non_streaming {
                let assembled = assemble_stream(events, &worker.worker_id).await?;
                return Ok(AdapterReply::Complete(WireResponse::OpenAi(assembled)));
            }
            return Ok(AdapterReply::Stream(events));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            GatewayError::Upstream {
                worker_id: worker.worker_id.clone(),
                message: format!("invalid response body: {}", e),
            }
        })?;
        Ok(AdapterReply::Complete(WireResponse::OpenAi(parsed)))
    }
}

/// Parse the upstream SSE body into chunk events on a channel-backed
/// stream.
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
                if payload == "[DONE]" {
                    debug!(worker_id = %worker_id, "Upstream stream complete");
                    return;
                }
                match serde_json::from_str::<ChatCompletionChunk>(&payload) {
                    Ok(parsed) => {
                        if tx.send(Ok(WireStreamEvent::OpenAi(parsed))).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(worker_id = %worker_id, error = %e, "Unparseable stream chunk");
                        let _ = tx
                            .send(Err(GatewayError::Upstream {
                                worker_id: worker_id.clone(),
                                message: format!("invalid stream chunk: {}", e),
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

#[derive(Default)]
struct ToolCallAccum {
    id: Option<String>,
    name: String,
    arguments: String,
}

#[derive(Default)]
struct ChoiceAccum {
    content: String,
    tool_calls: BTreeMap<u32, ToolCallAccum>,
    finish_reason: Option<OpenAiFinishReason>,
}

/// Consume a chunk stream fully and assemble the complete response
/// (force-non-streaming). Tool-call argument fragments are concatenated
/// per call index.
pub(crate) async fn assemble_stream(
    mut events: WireEventStream,
    worker_id: &str,
) -> GatewayResult<ChatCompletionResponse> {
    let mut id = None;
    let mut model = None;
    let mut created = 0u64;
    let mut usage = None;
    let mut choices: BTreeMap<u32, ChoiceAccum> = BTreeMap::new();
    let mut saw_chunk = false;

    while let Some(event) = events.next().await {
        let chunk = match event {
            Ok(WireStreamEvent::OpenAi(chunk)) => chunk,
            Ok(_) => {
                return Err(GatewayError::internal(
                    "openai assembler received an event from another wire family",
                ))
            }
            Err(e) => {
                return Err(GatewayError::PartialResponse {
                    message: format!("stream broke during assembly: {}", e),
                    partial: partial_value(&id, &model, &choices),
                });
            }
        };

        saw_chunk = true;
        id.get_or_insert(chunk.id);
        model.get_or_insert(chunk.model);
        if created == 0 {
            created = chunk.created;
        }
        if chunk.usage.is_some() {
            usage = chunk.usage;
        }

        for choice in chunk.choices {
            let accum = choices.entry(choice.index).or_default();
            if let Some(text) = choice.delta.content {
                accum.content.push_str(&text);
            }
            if let Some(calls) = choice.delta.tool_calls {
                for delta in calls {
                    let call = accum.tool_calls.entry(delta.index).or_default();
                    if let Some(call_id) = delta.id {
                        call.id.get_or_insert(call_id);
                    }
                    if let Some(function) = delta.function {
                        if let Some(name) = function.name {
                            call.name.push_str(&name);
                        }
                        if let Some(fragment) = function.arguments {
                            call.arguments.push_str(&fragment);
                        }
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                accum.finish_reason = Some(reason);
            }
        }
    }

    if !saw_chunk {
        return Err(GatewayError::PartialResponse {
            message: format!("worker {} stream produced no chunks", worker_id),
            partial: None,
        });
    }

    Ok(ChatCompletionResponse {
        id: id.unwrap_or_default(),
        object: "chat.completion".to_string(),
        created,
        model: model.unwrap_or_default(),
        choices: choices
            .into_iter()
            .map(|(index, accum)| {
                let tool_calls: Vec<OpenAiToolCall> = accum
                    .tool_calls
                    .into_values()
                    .map(|call| OpenAiToolCall {
                        id: call.id.unwrap_or_default(),
                        kind: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: call.name,
                            arguments: call.arguments,
                        },
                    })
                    .collect();
                ChatChoice {
                    index,
                    message: ChatChoiceMessage {
                        role: OpenAiRole::Assistant,
                        content: if accum.content.is_empty() && !tool_calls.is_empty() {
                            None
                        } else {
                            Some(accum.content)
                        },
                        tool_calls: if tool_calls.is_empty() {
                            None
                        } else {
                            Some(tool_calls)
                        },
                    },
                    finish_reason: accum.finish_reason,
                }
            })
            .collect(),
        usage,
        system_fingerprint: None,
    })
}

fn partial_value(
    id: &Option<String>,
    model: &Option<String>,
    choices: &BTreeMap<u32, ChoiceAccum>,
) -> Option<serde_json::Value> {
    Some(serde_json::json!({
        "id": id,
        "model": model,
        "content": choices
            .values()
            .map(|c| c.content.clone())
            .collect::<Vec<_>>(),
    }))
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use serde_json::json;

    use super::*;

    fn chunk(value: serde_json::Value) -> GatewayResult<WireStreamEvent> {
        Ok(WireStreamEvent::OpenAi(
            serde_json::from_value(value).unwrap(),
        ))
    }

    fn to_stream(events: Vec<GatewayResult<WireStreamEvent>>) -> WireEventStream {
        Box::pin(stream::iter(events))
    }

    #[tokio::test]
    async fn assembles_text_chunks() {
        let events = to_stream(vec![
            chunk(json!({
                "id": "u1", "object": "chat.completion.chunk", "created": 1, "model": "m-x",
                "choices": [{"index": 0, "delta": {"role": "assistant", "content": "Hel"}, "finish_reason": null}]
            })),
            chunk(json!({
                "id": "u1", "object": "chat.completion.chunk", "created": 1, "model": "m-x",
                "choices": [{"index": 0, "delta": {"content": "lo"}, "finish_reason": "stop"}]
            })),
        ]);

        let assembled = assemble_stream(events, "acme:0").await.unwrap();
        assert_eq!(assembled.choices[0].message.content.as_deref(), Some("Hello"));
        assert_eq!(
            assembled.choices[0].finish_reason,
            Some(OpenAiFinishReason::Stop)
        );
    }

    #[tokio::test]
    async fn reassembles_split_tool_arguments() {
        let events = to_stream(vec![
            chunk(json!({
                "id": "u1", "object": "chat.completion.chunk", "created": 1, "model": "m-x",
                "choices": [{"index": 0, "delta": {"tool_calls": [
                    {"index": 0, "id": "call_1", "type": "function",
                     "function": {"name": "lookup", "arguments": "{\"q\":\""}}
                ]}, "finish_reason": null}]
            })),
            chunk(json!({
                "id": "u1", "object": "chat.completion.chunk", "created": 1, "model": "m-x",
                "choices": [{"index": 0, "delta": {"tool_calls": [
                    {"index": 0, "function": {"arguments": "hello\"}"}}
                ]}, "finish_reason": "tool_calls"}]
            })),
        ]);

        let assembled = assemble_stream(events, "acme:0").await.unwrap();
        let calls = assembled.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "lookup");
        assert_eq!(calls[0].function.arguments, "{\"q\":\"hello\"}");
    }

    #[tokio::test]
    async fn broken_stream_is_partial_response() {
        let events = to_stream(vec![
            chunk(json!({
                "id": "u1", "object": "chat.completion.chunk", "created": 1, "model": "m-x",
                "choices": [{"index": 0, "delta": {"content": "Hel"}, "finish_reason": null}]
            })),
            Err(GatewayError::PartialResponse {
                message: "connection reset".to_string(),
                partial: None,
            }),
        ]);

        let err = assemble_stream(events, "acme:0").await.unwrap_err();
        let GatewayError::PartialResponse { partial, .. } = err else {
            panic!("expected partial response");
        };
        let partial = partial.unwrap();
        assert_eq!(partial["content"][0], "Hel");
    }

    #[tokio::test]
    async fn empty_stream_is_partial_response() {
        let err = assemble_stream(to_stream(vec![]), "acme:0").await.unwrap_err();
        assert_eq!(err.kind_code(), "PartialResponse");
    }
}
