//! Bidirectional converters between the canonical shape and each wire
//! family.
//!
//! Transformers are pure total functions: no I/O, no logging
//! side-effects, no clock. They fail only on structural impossibilities
//! (an image part bound for a text-only wire, unparseable tool
//! arguments).

pub mod anthropic;
pub mod openai;

use std::{collections::HashMap, sync::Arc};

pub use anthropic::AnthropicTransformer;
use gateway_protocol::{
    anthropic::{AnthropicMessage, CreateMessageRequest},
    canonical::{ChatRequest, ChatResponse},
    openai::{ChatCompletionRequest, ChatCompletionResponse},
    provider::{ProviderCapabilities, WireFamily},
};
pub use openai::OpenAiTransformer;

use crate::error::{GatewayError, GatewayResult};

/// A request in some wire family's shape.
#[derive(Debug, Clone)]
pub enum WireRequest {
    OpenAi(ChatCompletionRequest),
    Anthropic(CreateMessageRequest),
}

impl WireRequest {
    pub fn family(&self) -> WireFamily {
        match self {
            WireRequest::OpenAi(_) => WireFamily::OpenAi,
            WireRequest::Anthropic(_) => WireFamily::Anthropic,
        }
    }

    pub fn is_stream(&self) -> bool {
        match self {
            WireRequest::OpenAi(req) => req.stream,
            WireRequest::Anthropic(req) => req.stream.unwrap_or(false),
        }
    }

    /// Flip the wire-level stream flag (force-non-streaming).
    pub fn set_stream(&mut self, stream: bool) {
        match self {
            WireRequest::OpenAi(req) => req.stream = stream,
            WireRequest::Anthropic(req) => req.stream = Some(stream),
        }
    }
}

/// A response in some wire family's shape.
#[derive(Debug, Clone)]
pub enum WireResponse {
    OpenAi(ChatCompletionResponse),
    Anthropic(AnthropicMessage),
}

/// Per-worker knobs a transformer needs besides the request itself.
#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    pub capabilities: ProviderCapabilities,
    /// Default max_tokens for wire families that require one.
    pub default_max_tokens: Option<u32>,
}

/// Canonical <-> wire converter for one family.
pub trait Transformer: Send + Sync {
    fn family(&self) -> WireFamily;

    /// Canonical request to wire request.
    fn request_forward(
        &self,
        request: &ChatRequest,
        target_model: &str,
        options: &TransformOptions,
    ) -> GatewayResult<WireRequest>;

    /// Wire response back to canonical. The originating request supplies
    /// context (timestamps, ids) so the transformer stays clock-free.
    fn response_reverse(
        &self,
        response: WireResponse,
        request: &ChatRequest,
    ) -> GatewayResult<ChatResponse>;
}

impl std::fmt::Debug for dyn Transformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transformer").field("family", &self.family()).finish()
    }
}

/// Wire-family dispatch for transformers.
pub struct TransformerRegistry {
    transformers: HashMap<WireFamily, Arc<dyn Transformer>>,
}

impl std::fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerRegistry")
            .field(
                "families",
                &self.transformers.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformerRegistry {
    pub fn new() -> Self {
        let mut transformers: HashMap<WireFamily, Arc<dyn Transformer>> = HashMap::new();
        transformers.insert(WireFamily::OpenAi, Arc::new(OpenAiTransformer::new()));
        transformers.insert(WireFamily::Anthropic, Arc::new(AnthropicTransformer::new()));
        Self { transformers }
    }

    pub fn get(&self, family: WireFamily) -> GatewayResult<Arc<dyn Transformer>> {
        self.transformers.get(&family).cloned().ok_or_else(|| {
            GatewayError::transform(format!("no transformer for wire family '{}'", family))
        })
    }
}

/// Decompose a JSON-string tool argument into a structured value.
/// Loss-free by the round-trip law; invalid JSON is structural.
pub(crate) fn parse_tool_arguments(name: &str, arguments: &str) -> GatewayResult<serde_json::Value> {
    serde_json::from_str(arguments).map_err(|e| {
        GatewayError::transform(format!(
            "tool call '{}' carries non-JSON arguments: {}",
            name, e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_serves_both_families() {
        let registry = TransformerRegistry::new();
        assert_eq!(
            registry.get(WireFamily::OpenAi).unwrap().family(),
            WireFamily::OpenAi
        );
        assert_eq!(
            registry.get(WireFamily::Anthropic).unwrap().family(),
            WireFamily::Anthropic
        );
        let err = registry.get(WireFamily::Gemini).unwrap_err();
        assert_eq!(err.kind_code(), "TransformError");
    }

    #[test]
    fn parse_tool_arguments_rejects_half_json() {
        assert!(parse_tool_arguments("lookup", "{\"q\":\"x\"}").is_ok());
        assert!(parse_tool_arguments("lookup", "{\"q\":\"").is_err());
    }
}
