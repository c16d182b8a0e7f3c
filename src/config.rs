//! Gateway configuration.
//!
//! These structs are the values an external loader hands the gateway;
//! file formats are the loader's business. A small environment overlay
//! is applied once at startup; unknown variables are ignored.

use std::collections::HashMap;

use gateway_protocol::provider::ProviderConfig;
use serde::{Deserialize, Serialize};

use crate::streaming::StreamingMode;

/// Which selection policy the router uses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    RoundRobin,
    LeastLoaded,
    Random,
    Priority,
}

impl Default for PolicyKind {
    fn default() -> Self {
        PolicyKind::RoundRobin
    }
}

/// One candidate entry in a category route.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryTarget {
    /// Logical provider id.
    pub provider: String,

    /// Concrete model to request from this provider for this category.
    pub model: Option<String>,

    #[serde(default)]
    pub priority: u32,

    #[serde(default)]
    pub weight: u32,

    #[serde(default)]
    pub security_enhanced: bool,
}

fn default_long_context_threshold() -> u32 {
    60_000
}

fn default_background_markers() -> Vec<String> {
    ["haiku", "mini", "nano", "flash", "lite"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_reasoning_markers() -> Vec<String> {
    ["reasoning", "thinking", "o1", "o3", "r1"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_web_search_markers() -> Vec<String> {
    vec!["web_search".to_string()]
}

/// Routing configuration: category routes plus classifier tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub policy: PolicyKind,

    /// Category name ("default", "background", "reasoning",
    /// "longContext", "webSearch", "toolCall") to ordered candidates.
    #[serde(default)]
    pub categories: HashMap<String, Vec<CategoryTarget>>,

    /// Token estimate above which a request classifies as longContext.
    #[serde(default = "default_long_context_threshold")]
    pub long_context_threshold: u32,

    /// Model-name substrings that classify as background.
    #[serde(default = "default_background_markers")]
    pub background_markers: Vec<String>,

    /// Model-name substrings that classify as reasoning.
    #[serde(default = "default_reasoning_markers")]
    pub reasoning_markers: Vec<String>,

    /// Tool-name substrings that classify as webSearch.
    #[serde(default = "default_web_search_markers")]
    pub web_search_markers: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            categories: HashMap::new(),
            long_context_threshold: default_long_context_threshold(),
            background_markers: default_background_markers(),
            reasoning_markers: default_reasoning_markers(),
            web_search_markers: default_web_search_markers(),
        }
    }
}

/// Cooldown windows applied by the registry on worker failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownConfig {
    /// Window after an upstream 429, unless Retry-After is larger.
    pub rate_limit_secs: u64,
    /// Window after a credential rejection.
    pub auth_retry_secs: u64,
    /// Exponential backoff base for other failures.
    pub backoff_base_ms: u64,
    /// Backoff ceiling.
    pub backoff_cap_ms: u64,
    /// Consecutive failures before the health checker downgrades.
    pub failure_threshold: usize,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            rate_limit_secs: 60,
            auth_retry_secs: 300,
            backoff_base_ms: 500,
            backoff_cap_ms: 60_000,
            failure_threshold: 5,
        }
    }
}

/// Adapter retry behaviour for retryable upstream outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Backoff base per retry attempt.
    pub base_backoff_ms: u64,
    /// Maximum delay between attempts.
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: 250,
            max_backoff_ms: 10_000,
        }
    }
}

/// Streaming behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default)]
    pub mode: StreamingMode,
    /// Simulated-streaming chunk size in characters.
    pub chunk_size: usize,
    /// Delay between simulated chunks.
    pub chunk_delay_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            mode: StreamingMode::default(),
            chunk_size: 40,
            chunk_delay_ms: 10,
        }
    }
}

/// Background health-check scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3456
}

fn default_request_timeout_secs() -> u64 {
    300
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub cooldown: CooldownConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    /// Whole-request deadline floor; the effective deadline is
    /// max(this, worker timeout).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Reject (rather than down-convert) roles a wire family does not
    /// know.
    #[serde(default)]
    pub strict_roles: bool,

    /// Model-name rewrites applied by the preprocessor
    /// (e.g. "claude-3-5-haiku" -> "qwen2.5-7b" for self-hosted variants).
    #[serde(default)]
    pub model_map: HashMap<String, String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            providers: Vec::new(),
            routing: RoutingConfig::default(),
            retry: RetryConfig::default(),
            cooldown: CooldownConfig::default(),
            streaming: StreamingConfig::default(),
            health_check: HealthCheckConfig::default(),
            request_timeout_secs: default_request_timeout_secs(),
            strict_roles: false,
            model_map: HashMap::new(),
        }
    }
}

impl GatewayConfig {
    /// Apply environment-variable overrides. Read once at startup.
    ///
    /// Recognized: `MPG_HOST`, `MPG_PORT`, `MPG_REQUEST_TIMEOUT_SECS`,
    /// and per-provider `MPG_<ID>_BASE_URL` / `MPG_<ID>_API_KEY` where
    /// `<ID>` is the uppercased provider id with `-` mapped to `_`.
    /// Unknown variables are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("MPG_HOST") {
            if !host.is_empty() {
                self.host = host;
            }
        }
        if let Ok(port) = std::env::var("MPG_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
        if let Ok(timeout) = std::env::var("MPG_REQUEST_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse() {
                self.request_timeout_secs = timeout;
            }
        }

        for provider in &mut self.providers {
            let env_id = provider.id.to_uppercase().replace('-', "_");
            if let Ok(url) = std::env::var(format!("MPG_{}_BASE_URL", env_id)) {
                if !url.is_empty() {
                    provider.endpoint = url;
                }
            }
            if let Ok(key) = std::env::var(format!("MPG_{}_API_KEY", env_id)) {
                if !key.is_empty() {
                    provider.credentials =
                        Some(gateway_protocol::provider::CredentialConfig::Single(key));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.port, 3456);
        assert_eq!(cfg.routing.policy, PolicyKind::RoundRobin);
        assert_eq!(cfg.cooldown.rate_limit_secs, 60);
        assert!(cfg.streaming.chunk_size > 0);
    }

    #[test]
    fn deserializes_category_routes() {
        let cfg: GatewayConfig = serde_json::from_value(serde_json::json!({
            "providers": [],
            "routing": {
                "policy": "least_loaded",
                "categories": {
                    "default": [{"provider": "acme", "model": "m-x"}],
                    "reasoning": [{"provider": "acme", "priority": 10}]
                }
            }
        }))
        .unwrap();
        assert_eq!(cfg.routing.policy, PolicyKind::LeastLoaded);
        assert_eq!(cfg.routing.categories["default"][0].provider, "acme");
        assert_eq!(cfg.routing.categories["reasoning"][0].priority, 10);
    }
}
