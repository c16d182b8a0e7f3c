//! Metrics facade for the gateway.
//!
//! Thin static wrappers over the `metrics` crate; exporters are wired
//! (or not) by the embedding process. Label values must be low-cardinality:
//! worker ids, wire families, stage names, error codes.

use std::time::Duration;

pub mod metrics_labels {
    pub const RESULT_SUCCESS: &str = "success";
    pub const RESULT_ERROR: &str = "error";

    pub const TOKEN_INPUT: &str = "input";
    pub const TOKEN_OUTPUT: &str = "output";
}

pub fn bool_to_static_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Static metrics recording interface.
pub struct Metrics;

impl Metrics {
    pub fn record_request(family: &str, model: &str, streaming: bool) {
        metrics::counter!(
            "mpg_requests_total",
            "family" => family.to_string(),
            "model" => model.to_string(),
            "streaming" => bool_to_static_str(streaming),
        )
        .increment(1);
    }

    pub fn record_stage_duration(stage: &'static str, duration: Duration) {
        metrics::histogram!("mpg_stage_duration_seconds", "stage" => stage)
            .record(duration.as_secs_f64());
    }

    pub fn record_pipeline_error(code: &'static str) {
        metrics::counter!("mpg_pipeline_errors_total", "code" => code).increment(1);
    }

    pub fn record_worker_selected(worker_id: &str, policy: &'static str) {
        metrics::counter!(
            "mpg_worker_selected_total",
            "worker" => worker_id.to_string(),
            "policy" => policy,
        )
        .increment(1);
    }

    pub fn record_upstream_retry(worker_id: &str) {
        metrics::counter!("mpg_upstream_retries_total", "worker" => worker_id.to_string())
            .increment(1);
    }

    pub fn record_worker_cooldown(worker_id: &str, reason: &'static str) {
        metrics::counter!(
            "mpg_worker_cooldowns_total",
            "worker" => worker_id.to_string(),
            "reason" => reason,
        )
        .increment(1);
    }

    pub fn set_worker_health(worker_id: &str, healthy: bool) {
        metrics::gauge!("mpg_worker_healthy", "worker" => worker_id.to_string())
            .set(if healthy { 1.0 } else { 0.0 });
    }

    pub fn set_worker_requests_active(worker_id: &str, load: usize) {
        metrics::gauge!("mpg_worker_requests_active", "worker" => worker_id.to_string())
            .set(load as f64);
    }

    pub fn record_tokens(model: &str, direction: &'static str, count: u64) {
        metrics::counter!(
            "mpg_tokens_total",
            "model" => model.to_string(),
            "direction" => direction,
        )
        .increment(count);
    }
}
