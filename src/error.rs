//! Gateway error kinds.
//!
//! Closed set: every failure the pipeline can surface is one of these,
//! each with a stable `error_code` for callers. No error is ever
//! converted into a synthesized success.

use serde_json::Value;
use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Structural validation failure of the canonical request.
    #[error("bad request: {message}")]
    BadRequest { message: String },

    /// No category or candidate list matches the request.
    #[error("no route for category '{category}'")]
    NoRoute { category: String },

    /// Candidates exist but none is currently eligible.
    #[error("no healthy worker: {message}")]
    NoHealthyWorker { message: String },

    /// Upstream rejected the worker's credentials.
    #[error("authentication rejected by upstream (worker {worker_id}): {message}")]
    Auth { worker_id: String, message: String },

    /// Upstream 429; the worker has been cooled down.
    #[error("rate limited by upstream (worker {worker_id}): {message}")]
    RateLimited {
        worker_id: String,
        retry_after_secs: Option<u64>,
        message: String,
    },

    /// Deadline exceeded.
    #[error("deadline exceeded in stage '{stage}'")]
    Timeout { stage: String },

    /// Retryable upstream failure, surfaced after retries were exhausted.
    #[error("upstream error (worker {worker_id}): {message}")]
    Upstream { worker_id: String, message: String },

    /// Non-retryable upstream rejection (4xx other than 401/403/429).
    #[error("upstream rejected request (worker {worker_id}, status {status}): {message}")]
    UpstreamFatal {
        worker_id: String,
        status: u16,
        message: String,
    },

    /// Structural impossibility in request/response translation.
    #[error("transform error: {message}")]
    Transform { message: String },

    /// Stream terminated before completion; carries what was assembled.
    #[error("partial response: {message}")]
    PartialResponse {
        message: String,
        partial: Option<Value>,
    },

    /// Unreachable-by-contract; indicates a bug.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        GatewayError::BadRequest {
            message: message.into(),
        }
    }

    pub fn transform(message: impl Into<String>) -> Self {
        GatewayError::Transform {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        GatewayError::Internal {
            message: message.into(),
        }
    }

    /// Stable client-visible error code.
    pub fn kind_code(&self) -> &'static str {
        match self {
            GatewayError::BadRequest { .. } => "BadRequest",
            GatewayError::NoRoute { .. } => "NoRoute",
            GatewayError::NoHealthyWorker { .. } => "NoHealthyWorker",
            GatewayError::Auth { .. } => "AuthError",
            GatewayError::RateLimited { .. } => "RateLimited",
            GatewayError::Timeout { .. } => "Timeout",
            GatewayError::Upstream { .. } => "UpstreamError",
            GatewayError::UpstreamFatal { .. } => "UpstreamFatal",
            GatewayError::Transform { .. } => "TransformError",
            GatewayError::PartialResponse { .. } => "PartialResponse",
            GatewayError::Internal { .. } => "Internal",
        }
    }

    /// Whether the orchestrator may try another candidate worker.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimited { .. }
                | GatewayError::Upstream { .. }
                | GatewayError::Auth { .. }
        )
    }

    /// The worker implicated in this error, if any.
    pub fn worker_id(&self) -> Option<&str> {
        match self {
            GatewayError::Auth { worker_id, .. }
            | GatewayError::RateLimited { worker_id, .. }
            | GatewayError::Upstream { worker_id, .. }
            | GatewayError::UpstreamFatal { worker_id, .. } => Some(worker_id),
            _ => None,
        }
    }
}
