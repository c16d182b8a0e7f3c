//! Protocol adapters: wire-level clients for each upstream family.
//!
//! Every adapter implements the same contract: given a wire-format
//! request, produce a wire-format response or a wire event stream.
//! Adapters own endpoint construction, credential headers, per-attempt
//! timeouts, retry with jittered backoff, and HTTP outcome
//! classification. Retryable outcomes are absorbed up to the worker's
//! retry limit, then surfaced with their kind preserved.

pub mod anthropic;
pub mod openai;

use std::{collections::HashMap, pin::Pin, sync::Arc, time::Duration};

pub use anthropic::AnthropicAdapter;
use async_trait::async_trait;
use futures::Stream;
use gateway_protocol::{
    anthropic::MessageStreamEvent,
    openai::ChatCompletionChunk,
    provider::{AuthScheme, WireFamily, WorkerSpec},
};
pub use openai::OpenAiAdapter;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    config::RetryConfig,
    core::credentials::Credential,
    error::{GatewayError, GatewayResult},
    observability::metrics::Metrics,
    transform::{WireRequest, WireResponse},
};

/// Maximum error response body size read back for diagnostics.
pub(crate) const MAX_ERROR_RESPONSE_SIZE: usize = 64 * 1024;

/// Upstream reply: a complete response or an event stream.
pub enum AdapterReply {
    Complete(WireResponse),
    Stream(WireEventStream),
}

impl std::fmt::Debug for AdapterReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterReply::Complete(_) => f.write_str("AdapterReply::Complete"),
            AdapterReply::Stream(_) => f.write_str("AdapterReply::Stream"),
        }
    }
}

/// One parsed upstream streaming event.
#[derive(Debug, Clone)]
pub enum WireStreamEvent {
    OpenAi(ChatCompletionChunk),
    Anthropic(MessageStreamEvent),
}

pub type WireEventStream = Pin<Box<dyn Stream<Item = GatewayResult<WireStreamEvent>> + Send>>;

/// Contract every upstream family client implements.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn family(&self) -> WireFamily;

    async fn call(
        &self,
        worker: &WorkerSpec,
        credential: &Credential,
        request: WireRequest,
        deadline: Instant,
    ) -> GatewayResult<AdapterReply>;
}

/// Wire-family dispatch for adapters.
pub struct AdapterRegistry {
    adapters: HashMap<WireFamily, Arc<dyn ProviderAdapter>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("families", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AdapterRegistry {
    pub fn new(retry: RetryConfig, force_non_streaming: bool) -> Self {
        let mut adapters: HashMap<WireFamily, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert(
            WireFamily::OpenAi,
            Arc::new(OpenAiAdapter::new(retry.clone(), force_non_streaming)),
        );
        adapters.insert(
            WireFamily::Anthropic,
            Arc::new(AnthropicAdapter::new(retry, force_non_streaming)),
        );
        Self { adapters }
    }

    /// Register or replace an adapter (stub adapters in tests).
    pub fn insert(&mut self, family: WireFamily, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(family, adapter);
    }

    pub fn get(&self, family: WireFamily) -> GatewayResult<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&family).cloned().ok_or_else(|| {
            GatewayError::internal(format!("no adapter registered for wire family '{}'", family))
        })
    }
}

// ============================================================================
// HTTP Outcome Classification
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeClass {
    Success,
    /// 408/429/502/503/504: retry with backoff.
    Retryable,
    /// 401/403: credential cooldown, AuthError.
    FatalAuth,
    /// 400/404 and (by decision) 409/422: RequestError, no retry.
    FatalRequest,
    /// Everything else, including non-retryable 5xx.
    Fatal,
}

pub fn classify_status(status: u16) -> OutcomeClass {
    match status {
        200..=299 => OutcomeClass::Success,
        408 | 429 | 502 | 503 | 504 => OutcomeClass::Retryable,
        401 | 403 => OutcomeClass::FatalAuth,
        400 | 404 | 409 | 422 => OutcomeClass::FatalRequest,
        _ => OutcomeClass::Fatal,
    }
}

// ============================================================================
// Shared Transport Helpers
// ============================================================================

/// Construct the endpoint URL. A `{model}` placeholder in the base (the
/// Gemini-style URL shape) is substituted with the target model.
pub(crate) fn build_url(endpoint: &str, path: &str, model: &str) -> String {
    let base = endpoint.trim_end_matches('/').replace("{model}", model);
    format!("{}{}", base, path)
}

/// Attach credential-derived and provider-level headers.
pub(crate) fn apply_credential(
    builder: reqwest::RequestBuilder,
    credential: &Credential,
) -> reqwest::RequestBuilder {
    let builder = match &credential.scheme {
        AuthScheme::Bearer | AuthScheme::OAuth => builder.bearer_auth(&credential.secret),
        AuthScheme::ApiKey { header } => {
            builder.header(header.as_str(), credential.secret.as_str())
        }
    };
    credential
        .extra_headers
        .iter()
        .fold(builder, |builder, (name, value)| {
            builder.header(name.as_str(), value.as_str())
        })
}

/// Exponential backoff with jitter: half fixed, half random.
pub(crate) fn backoff_delay(attempt: u32, retry: &RetryConfig) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    let base = (retry.base_backoff_ms << exponent).min(retry.max_backoff_ms);
    let jittered = base / 2 + rand::rng().random_range(0..=base / 2);
    Duration::from_millis(jittered)
}

pub(crate) fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Read a response body with a size cap; never buffers unbounded error
/// payloads.
pub(crate) async fn read_body_limited(response: reqwest::Response, max: usize) -> String {
    use futures_util::StreamExt;

    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                if buffer.len() + bytes.len() > max {
                    buffer.extend_from_slice(&bytes[..max - buffer.len()]);
                    break;
                }
                buffer.extend_from_slice(&bytes);
            }
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

fn truncate_message(body: &str) -> String {
    body.chars().take(200).collect()
}

/// Send a request with per-attempt timeouts and retry-on-retryable, up
/// to the worker's retry limit. The builder closure is invoked fresh for
/// every attempt.
pub(crate) async fn send_with_retries<F>(
    worker: &WorkerSpec,
    retry: &RetryConfig,
    deadline: Instant,
    mut build: F,
) -> GatewayResult<reqwest::Response>
where
    F: FnMut() -> reqwest::RequestBuilder + Send,
{
    let worker_id = worker.worker_id.as_str();
    let max_attempts = worker.max_retries + 1;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let now = Instant::now();
        if now >= deadline {
            return Err(GatewayError::Timeout {
                stage: "call".to_string(),
            });
        }
        let per_attempt = Duration::from_secs(worker.timeout_secs).min(deadline - now);

        debug!(
            worker_id = %worker_id,
            attempt = %attempt,
            "Sending upstream request"
        );

        match build().timeout(per_attempt).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                match classify_status(status) {
                    OutcomeClass::Success => return Ok(response),
                    OutcomeClass::Retryable => {
                        let retry_after = retry_after_secs(response.headers());
                        if attempt >= max_attempts {
                            let body =
                                read_body_limited(response, MAX_ERROR_RESPONSE_SIZE).await;
                            return Err(retryable_exhausted(
                                worker_id,
                                status,
                                retry_after,
                                &body,
                            ));
                        }
                        warn!(
                            worker_id = %worker_id,
                            status = %status,
                            attempt = %attempt,
                            "Retryable upstream status, backing off"
                        );
                        Metrics::record_upstream_retry(worker_id);
                        let delay = match retry_after {
                            Some(secs) => Duration::from_secs(secs),
                            None => backoff_delay(attempt, retry),
                        };
                        tokio::time::sleep(delay).await;
                    }
                    OutcomeClass::FatalAuth => {
                        let body = read_body_limited(response, MAX_ERROR_RESPONSE_SIZE).await;
                        return Err(GatewayError::Auth {
                            worker_id: worker_id.to_string(),
                            message: truncate_message(&body),
                        });
                    }
                    OutcomeClass::FatalRequest | OutcomeClass::Fatal => {
                        let body = read_body_limited(response, MAX_ERROR_RESPONSE_SIZE).await;
                        return Err(if matches!(classify_status(status), OutcomeClass::Fatal) {
                            GatewayError::Upstream {
                                worker_id: worker_id.to_string(),
                                message: format!("status {}: {}", status, truncate_message(&body)),
                            }
                        } else {
                            GatewayError::UpstreamFatal {
                                worker_id: worker_id.to_string(),
                                status,
                                message: truncate_message(&body),
                            }
                        });
                    }
                }
            }
            Err(e) if e.is_timeout() => {
                if attempt >= max_attempts {
                    return Err(GatewayError::Timeout {
                        stage: "call".to_string(),
                    });
                }
                warn!(worker_id = %worker_id, attempt = %attempt, "Upstream attempt timed out");
                Metrics::record_upstream_retry(worker_id);
                tokio::time::sleep(backoff_delay(attempt, retry)).await;
            }
            Err(e) if e.is_connect() => {
                if attempt >= max_attempts {
                    return Err(GatewayError::Upstream {
                        worker_id: worker_id.to_string(),
                        message: format!("connection failed: {}", e),
                    });
                }
                warn!(worker_id = %worker_id, attempt = %attempt, error = %e, "Connection failed");
                Metrics::record_upstream_retry(worker_id);
                tokio::time::sleep(backoff_delay(attempt, retry)).await;
            }
            Err(e) => {
                return Err(GatewayError::Upstream {
                    worker_id: worker_id.to_string(),
                    message: format!("request failed: {}", e),
                });
            }
        }
    }
}

fn retryable_exhausted(
    worker_id: &str,
    status: u16,
    retry_after: Option<u64>,
    body: &str,
) -> GatewayError {
    if status == 429 {
        GatewayError::RateLimited {
            worker_id: worker_id.to_string(),
            retry_after_secs: retry_after,
            message: truncate_message(body),
        }
    } else {
        GatewayError::Upstream {
            worker_id: worker_id.to_string(),
            message: format!("status {}: {}", status, truncate_message(body)),
        }
    }
}

// ============================================================================
// SSE Parsing
// ============================================================================

/// Incremental server-sent-events parser. Feed raw bytes, get back the
/// `data:` payloads of complete events.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut payloads = Vec::new();
        while let Some(boundary) = self.buffer.find("\n\n") {
            let event: String = self.buffer.drain(..boundary + 2).collect();
            let mut data_lines = Vec::new();
            for line in event.lines() {
                if let Some(data) = line.strip_prefix("data:") {
                    data_lines.push(data.trim_start().to_string());
                }
            }
            if !data_lines.is_empty() {
                payloads.push(data_lines.join("\n"));
            }
        }
        payloads
    }
}
