//! HTTP surface.
//!
//! `POST /v1/messages` is the canonical entry point;
//! `POST /v1/chat/completions` is the OpenAI-compatible surface, run
//! through the reverse transformer at intake and the forward transformer
//! at exit. `GET /health`, `/status` and `/routing` are the operator
//! surface.

pub mod error;

use std::{collections::BTreeMap, sync::Arc};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use gateway_protocol::{
    canonical::{ChatRequest, CountTokensRequest, CountTokensResponse},
    openai::ChatCompletionRequest,
};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::debug;
use validator::Validate;

use self::error::{bad_request, error_response};
use crate::{
    core::worker::{worker_to_info, WorkerInfo},
    pipeline::{Pipeline, PipelineReply},
    routing::{estimate_tokens, RoutingHints},
    streaming::{event_to_openai_chunk, CanonicalEventStream},
    transform::OpenAiTransformer,
};

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    started_at: std::time::Instant,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            started_at: std::time::Instant::now(),
        }
    }
}

/// Build the axum application.
pub fn build_router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/v1/messages", post(messages))
        .route("/v1/messages/count_tokens", post(count_tokens))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(models))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/routing", get(routing))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState::new(pipeline))
}

fn request_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn mint_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4())
}

// ============================================================================
// Canonical Surface
// ============================================================================

async fn messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id_from(&headers).unwrap_or_else(mint_request_id);

    let mut request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return bad_request(format!("invalid request body: {}", e), &request_id),
    };
    if request.id.is_empty() {
        request.id = request_id.clone();
    }
    request.metadata.received_at.get_or_insert_with(Utc::now);
    request.metadata.source.get_or_insert_with(|| "messages".to_string());

    match state.pipeline.execute(request, RoutingHints::default()).await {
        Ok(PipelineReply::Complete(response)) => {
            with_request_id(Json(response).into_response(), &request_id)
        }
        Ok(PipelineReply::Streaming(stream)) => {
            with_request_id(canonical_sse(stream), &request_id)
        }
        Err(e) => error_response(&e, &request_id),
    }
}

fn with_request_id(mut response: Response, request_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Emit canonical events as SSE. An in-stream error becomes a terminal
/// error event; half-finished payloads are never silently dropped.
fn canonical_sse(stream: CanonicalEventStream) -> Response {
    let body = stream.map(|event| -> Result<Bytes, std::io::Error> {
        let payload = match event {
            Ok(event) => serde_json::to_string(&event)
                .unwrap_or_else(|e| json!({"type": "error", "message": e.to_string()}).to_string()),
            Err(e) => json!({
                "type": "error",
                "code": e.kind_code(),
                "message": e.to_string(),
            })
            .to_string(),
        };
        Ok(Bytes::from(format!("data: {}\n\n", payload)))
    });

    sse_response(Body::from_stream(body))
}

fn sse_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

// ============================================================================
// OpenAI-Compatible Surface
// ============================================================================

async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id =
        request_id_from(&headers).unwrap_or_else(|| format!("chatcmpl_{}", uuid::Uuid::new_v4()));

    let wire: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(wire) => wire,
        Err(e) => return bad_request(format!("invalid request body: {}", e), &request_id),
    };

    let transformer = OpenAiTransformer::new();
    let mut request = match transformer.request_reverse(wire, request_id.clone()) {
        Ok(request) => request,
        Err(e) => return error_response(&e, &request_id),
    };
    request.metadata.received_at = Some(Utc::now());
    request.metadata.source = Some("chat_completions".to_string());

    let fallback_model = request.model.clone();
    let created = request
        .metadata
        .received_at
        .map(|t| t.timestamp().max(0) as u64)
        .unwrap_or(0);

    match state.pipeline.execute(request, RoutingHints::default()).await {
        Ok(PipelineReply::Complete(response)) => with_request_id(
            Json(transformer.response_forward(response)).into_response(),
            &request_id,
        ),
        Ok(PipelineReply::Streaming(stream)) => {
            let response = openai_sse(stream, request_id.clone(), fallback_model, created);
            with_request_id(response, &request_id)
        }
        Err(e) => error_response(&e, &request_id),
    }
}

/// Emit canonical events as OpenAI chunks, terminated by `[DONE]`.
fn openai_sse(
    stream: CanonicalEventStream,
    request_id: String,
    model: String,
    created: u64,
) -> Response {
    let chunks = stream.map(move |event| -> Result<Bytes, std::io::Error> {
        let payload = match event {
            Ok(event) => {
                let chunk = event_to_openai_chunk(&event, &request_id, &model, created);
                serde_json::to_string(&chunk).unwrap_or_default()
            }
            Err(e) => json!({
                "error": {"code": e.kind_code(), "message": e.to_string()}
            })
            .to_string(),
        };
        Ok(Bytes::from(format!("data: {}\n\n", payload)))
    });

    let body = chunks.chain(futures::stream::once(async {
        Ok::<Bytes, std::io::Error>(Bytes::from("data: [DONE]\n\n"))
    }));

    sse_response(Body::from_stream(body))
}

// ============================================================================
// Token Counting
// ============================================================================

async fn count_tokens(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id_from(&headers).unwrap_or_else(mint_request_id);

    let count_request: CountTokensRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return bad_request(format!("invalid request body: {}", e), &request_id),
    };
    if let Err(e) = count_request.validate() {
        return bad_request(e.to_string(), &request_id);
    }

    // Token counting runs the pipeline only as far as routing: the
    // request must be routable, nothing is dispatched.
    let shim = ChatRequest {
        id: request_id.clone(),
        model: count_request.model.clone(),
        messages: count_request.messages.clone(),
        tools: count_request.tools.clone(),
        tool_choice: None,
        temperature: None,
        top_p: None,
        stop: None,
        max_tokens: None,
        stream: false,
        metadata: Default::default(),
    };

    let components = state.pipeline.components();
    if let Err(e) = components.router.route(&shim, &RoutingHints::default()) {
        return error_response(&e, &request_id);
    }

    debug!(request_id = %request_id, "Token estimate served");
    Json(CountTokensResponse {
        input_tokens: estimate_tokens(&shim),
    })
    .into_response()
}

// ============================================================================
// Operator Surface
// ============================================================================

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Serialize)]
struct StatusBody {
    uptime_secs: u64,
    generation: u64,
    worker_count: usize,
    workers: Vec<WorkerInfo>,
}

async fn status(State(state): State<AppState>) -> Json<StatusBody> {
    let components = state.pipeline.components();
    let mut workers: Vec<WorkerInfo> = components
        .registry
        .all()
        .iter()
        .map(worker_to_info)
        .collect();
    workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));

    Json(StatusBody {
        uptime_secs: state.started_at.elapsed().as_secs(),
        generation: components.router.snapshots().generation(),
        worker_count: workers.len(),
        workers,
    })
}

async fn routing(State(state): State<AppState>) -> Json<serde_json::Value> {
    let components = state.pipeline.components();
    let snapshot = components.router.snapshots().load();
    Json(json!({
        "generation": snapshot.generation,
        "policy": components.config.routing.policy,
        "categories": snapshot.table.summary(),
    }))
}

async fn models(State(state): State<AppState>) -> Json<serde_json::Value> {
    let components = state.pipeline.components();
    let mut models: BTreeMap<String, String> = BTreeMap::new();
    for worker in components.registry.all() {
        if !worker.is_healthy() {
            continue;
        }
        for model in &worker.spec.models {
            models
                .entry(model.clone())
                .or_insert_with(|| worker.spec.provider_id.clone());
        }
    }

    let data: Vec<serde_json::Value> = models
        .into_iter()
        .map(|(id, owner)| json!({"id": id, "object": "model", "owned_by": owner}))
        .collect();
    Json(json!({"object": "list", "data": data}))
}
