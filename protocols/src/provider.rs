//! Provider configuration surface and derived worker identity.
//!
//! Logical provider configs are produced by an external loader and
//! passed in as these structured values; the expander derives one
//! [`WorkerSpec`] per (provider, credential index).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The concrete request/response shape an upstream understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WireFamily {
    OpenAi,
    Anthropic,
    Gemini,
    Codewhisperer,
}

impl WireFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFamily::OpenAi => "openai",
            WireFamily::Anthropic => "anthropic",
            WireFamily::Gemini => "gemini",
            WireFamily::Codewhisperer => "codewhisperer",
        }
    }
}

impl std::fmt::Display for WireFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a credential is attached to upstream requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>`.
    Bearer,
    /// A named key header, e.g. `x-api-key`.
    ApiKey { header: String },
    /// Opaque OAuth access token, obtained and refreshed elsewhere;
    /// attached as a bearer token.
    OAuth,
}

impl Default for AuthScheme {
    fn default() -> Self {
        AuthScheme::Bearer
    }
}

/// A single key or an ordered set of keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CredentialConfig {
    Single(String),
    Multiple(Vec<String>),
}

impl CredentialConfig {
    pub fn keys(&self) -> Vec<String> {
        match self {
            CredentialConfig::Single(k) => vec![k.clone()],
            CredentialConfig::Multiple(ks) => ks.clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CredentialConfig::Single(_) => 1,
            CredentialConfig::Multiple(ks) => ks.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Capabilities an upstream advertises.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub native_streaming: bool,
    pub tool_calls: bool,
    pub multimodal: bool,
    /// Maximum context window in tokens.
    pub max_context: u32,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            native_streaming: true,
            tool_calls: true,
            multimodal: false,
            max_context: 128_000,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    2
}

/// Logical provider configuration (external input).
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Logical provider id, unique across the configuration.
    pub id: String,

    pub wire_family: WireFamily,

    /// Base URL of the upstream API.
    pub endpoint: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Concrete model ids this provider can serve.
    #[serde(default)]
    pub models: Vec<String>,

    /// One key or an ordered set of keys.
    pub credentials: Option<CredentialConfig>,

    #[serde(default)]
    pub auth_scheme: AuthScheme,

    /// Extra headers attached to every upstream request.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub capabilities: ProviderCapabilities,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Higher value wins under the priority policy.
    #[serde(default)]
    pub priority: u32,

    /// Relative candidate weight within a category.
    #[serde(default)]
    pub weight: u32,

    /// Provider variant tag for preprocessing rule selection
    /// (e.g. "self-hosted").
    pub variant: Option<String>,

    /// Default max_tokens injected for wire families that require one.
    pub default_max_tokens: Option<u32>,

    /// Per-worker concurrency ceiling; saturated workers are ineligible.
    pub max_concurrency: Option<usize>,
}

/// Derived worker identity: one per (provider, credential index).
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// `{provider_id}:{credential_index}`.
    pub worker_id: String,

    pub provider_id: String,

    pub credential_index: usize,

    pub total_credentials: usize,

    pub wire_family: WireFamily,

    pub endpoint: String,

    pub models: Vec<String>,

    pub timeout_secs: u64,

    pub max_retries: u32,

    pub priority: u32,

    pub weight: u32,

    pub variant: Option<String>,

    pub default_max_tokens: Option<u32>,

    pub max_concurrency: Option<usize>,

    pub capabilities: ProviderCapabilities,

    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl WorkerSpec {
    /// Whether this worker advertises the given model.
    /// An empty model list accepts any model.
    pub fn supports_model(&self, model_id: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|m| m == model_id)
    }

    /// First advertised model, used when a virtual name has no explicit
    /// mapping.
    pub fn primary_model(&self) -> Option<&str> {
        self.models.first().map(String::as_str)
    }
}
