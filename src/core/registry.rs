//! Worker registry: health, load, cooldown and selection state for the
//! expanded worker fleet.
//!
//! All mutations are per-worker atomics; selection reads a consistent
//! snapshot of a group under the map's short shard locks only. The
//! health-check scheduler runs off the request path.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::worker::{now_ms, Worker};
use crate::{
    config::CooldownConfig,
    error::{GatewayError, GatewayResult},
    observability::metrics::Metrics,
    policies::SelectionPolicy,
};

/// Why a worker call failed, for cooldown classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Upstream 429. Cooldown is the configured rate-limit window or the
    /// upstream Retry-After, whichever is larger.
    RateLimited { retry_after_secs: Option<u64> },
    /// Credential rejected. Cooldown is the auth-retry window.
    Auth,
    /// Retryable upstream failure (5xx, transport).
    Upstream,
    /// Per-attempt or deadline timeout.
    Timeout,
    /// Connection-level failure.
    Network,
}

impl FailureReason {
    fn label(&self) -> &'static str {
        match self {
            FailureReason::RateLimited { .. } => "rate_limited",
            FailureReason::Auth => "auth",
            FailureReason::Upstream => "upstream",
            FailureReason::Timeout => "timeout",
            FailureReason::Network => "network",
        }
    }
}

/// Registry over the expanded worker fleet.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: DashMap<String, Arc<Worker>>,
    groups: DashMap<String, Vec<Arc<Worker>>>,
    cooldown: CooldownConfig,
}

impl WorkerRegistry {
    pub fn new(cooldown: CooldownConfig) -> Self {
        Self {
            workers: DashMap::new(),
            groups: DashMap::new(),
            cooldown,
        }
    }

    /// Register a worker. Duplicate ids within a generation are a bug in
    /// the expander and surface as an error.
    pub fn register(&self, worker: Arc<Worker>) -> GatewayResult<()> {
        let id = worker.worker_id().to_string();
        match self.workers.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(GatewayError::internal(format!(
                "duplicate worker id '{}' in registry",
                id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                Metrics::set_worker_health(&id, true);
                slot.insert(worker);
                Ok(())
            }
        }
    }

    /// Define (or replace) a selection group's ordered membership.
    pub fn register_group(&self, group: &str, members: Vec<Arc<Worker>>) {
        self.groups.insert(group.to_string(), members);
    }

    pub fn get(&self, worker_id: &str) -> Option<Arc<Worker>> {
        self.workers.get(worker_id).map(|w| w.clone())
    }

    pub fn all(&self) -> Vec<Arc<Worker>> {
        self.workers.iter().map(|w| w.clone()).collect()
    }

    pub fn group(&self, group: &str) -> Vec<Arc<Worker>> {
        self.groups.get(group).map(|g| g.clone()).unwrap_or_default()
    }

    pub fn group_names(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.key().clone()).collect()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Currently-eligible members of a group, in group order.
    pub fn eligible(&self, group: &str) -> Vec<Arc<Worker>> {
        let now = now_ms();
        self.group(group)
            .into_iter()
            .filter(|w| w.is_eligible(now))
            .collect()
    }

    /// Record a successful completion: failures reset, cooldown cleared.
    pub fn mark_success(&self, worker: &Worker) {
        worker.reset_failures();
        worker.clear_cooldown();
        worker.increment_processed();
    }

    /// Record a terminal failure and apply the reason's cooldown window.
    pub fn mark_failure(&self, worker: &Worker, reason: FailureReason) {
        let failures = worker.record_failure();

        let window_ms = match reason {
            FailureReason::RateLimited { retry_after_secs } => {
                let configured = self.cooldown.rate_limit_secs * 1000;
                retry_after_secs
                    .map(|s| s * 1000)
                    .map_or(configured, |ra| ra.max(configured))
            }
            FailureReason::Auth => self.cooldown.auth_retry_secs * 1000,
            FailureReason::Upstream | FailureReason::Timeout | FailureReason::Network => {
                // Exponential backoff on consecutive failures.
                let exponent = (failures as u32).saturating_sub(1).min(16);
                (self.cooldown.backoff_base_ms << exponent).min(self.cooldown.backoff_cap_ms)
            }
        };

        let until = now_ms() + window_ms;
        worker.set_cooldown_until(until);
        Metrics::record_worker_cooldown(worker.worker_id(), reason.label());

        warn!(
            worker_id = %worker.worker_id(),
            reason = %reason.label(),
            consecutive_failures = %failures,
            cooldown_ms = %window_ms,
            "Worker cooled down after failure"
        );
    }

    /// Select one eligible worker from a group via the policy.
    pub fn select_available(
        &self,
        group: &str,
        policy: &dyn SelectionPolicy,
    ) -> GatewayResult<Arc<Worker>> {
        let eligible = self.eligible(group);
        if eligible.is_empty() {
            return Err(GatewayError::NoHealthyWorker {
                message: format!("no eligible worker in group '{}'", group),
            });
        }

        let index = policy.select(group, &eligible).ok_or_else(|| {
            GatewayError::internal(format!(
                "policy '{}' returned no index for non-empty group '{}'",
                policy.name(),
                group
            ))
        })?;

        let worker = eligible
            .get(index)
            .cloned()
            .ok_or_else(|| {
                GatewayError::internal(format!(
                    "policy '{}' returned out-of-range index {} for group '{}'",
                    policy.name(),
                    index,
                    group
                ))
            })?;

        Metrics::record_worker_selected(worker.worker_id(), policy.name());
        Ok(worker)
    }

    /// Install a new worker generation. In-flight requests keep their
    /// `Arc<Worker>` references from the old generation and complete
    /// against them.
    pub fn replace_generation(
        &self,
        workers: Vec<Arc<Worker>>,
        groups: Vec<(String, Vec<Arc<Worker>>)>,
    ) {
        self.workers.clear();
        self.groups.clear();
        for worker in workers {
            if let Err(e) = self.register(worker) {
                warn!(error = %e, "Skipped duplicate worker during generation swap");
            }
        }
        for (name, members) in groups {
            self.register_group(&name, members);
        }
    }

    /// One sweep of the health checker: downgrade workers past the
    /// failure threshold, restore workers whose cooldown expired.
    pub fn run_health_sweep(&self) {
        let now = now_ms();
        for entry in self.workers.iter() {
            let worker = entry.value();
            if worker.is_healthy() {
                if worker.consecutive_failures() >= self.cooldown.failure_threshold {
                    worker.set_healthy(false);
                    info!(
                        worker_id = %worker.worker_id(),
                        failures = %worker.consecutive_failures(),
                        "Health check downgraded worker"
                    );
                }
            } else if !worker.in_cooldown(now) {
                // Optimistic restore; the next failure cools it down again.
                worker.set_healthy(true);
                worker.reset_failures();
                info!(
                    worker_id = %worker.worker_id(),
                    "Health check restored worker after cooldown"
                );
            }
        }
    }

    /// Spawn the background health-check task.
    pub fn start_health_checker(self: &Arc<Self>, interval: Duration) -> HealthChecker {
        let registry = Arc::clone(self);
        let shutdown = Arc::new(Notify::new());
        let shutdown_task = Arc::clone(&shutdown);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!("Running worker health sweep");
                        registry.run_health_sweep();
                    }
                    _ = shutdown_task.notified() => {
                        debug!("Health checker shutting down");
                        break;
                    }
                }
            }
        });

        HealthChecker { handle, shutdown }
    }
}

/// Health checker handle with graceful shutdown.
pub struct HealthChecker {
    handle: tokio::task::JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker").finish()
    }
}

impl HealthChecker {
    /// Wake the sleeping task immediately so it can exit.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::worker::test_support;
    use crate::policies::RoundRobinPolicy;

    fn registry() -> WorkerRegistry {
        WorkerRegistry::new(CooldownConfig::default())
    }

    #[test]
    fn register_rejects_duplicates() {
        let reg = registry();
        reg.register(test_support::worker("acme", 0)).unwrap();
        let err = reg.register(test_support::worker("acme", 0)).unwrap_err();
        assert_eq!(err.kind_code(), "Internal");
        assert_eq!(reg.worker_count(), 1);
    }

    #[test]
    fn select_available_returns_eligible_worker() {
        let reg = registry();
        let a = test_support::worker("acme", 0);
        let b = test_support::worker("acme", 1);
        reg.register(a.clone()).unwrap();
        reg.register(b.clone()).unwrap();
        reg.register_group("default", vec![a.clone(), b.clone()]);

        let policy = RoundRobinPolicy::new();
        let selected = reg.select_available("default", &policy).unwrap();
        assert!(["acme:0", "acme:1"].contains(&selected.worker_id()));
    }

    #[test]
    fn select_available_fails_when_all_cooled_down() {
        let reg = registry();
        let a = test_support::worker("acme", 0);
        reg.register(a.clone()).unwrap();
        reg.register_group("default", vec![a.clone()]);

        reg.mark_failure(&a, FailureReason::RateLimited {
            retry_after_secs: Some(60),
        });

        let policy = RoundRobinPolicy::new();
        let err = reg.select_available("default", &policy).unwrap_err();
        assert_eq!(err.kind_code(), "NoHealthyWorker");
    }

    #[test]
    fn rate_limit_cooldown_honours_retry_after() {
        let reg = registry();
        let a = test_support::worker("acme", 0);

        let before = now_ms();
        reg.mark_failure(&a, FailureReason::RateLimited {
            retry_after_secs: Some(120),
        });
        // 120s Retry-After beats the 60s configured window.
        assert!(a.cooldown_until_ms() >= before + 120_000);
    }

    #[test]
    fn auth_cooldown_uses_auth_window() {
        let reg = registry();
        let a = test_support::worker("acme", 0);

        let before = now_ms();
        reg.mark_failure(&a, FailureReason::Auth);
        assert!(a.cooldown_until_ms() >= before + 300_000);
    }

    #[test]
    fn upstream_failures_back_off_exponentially() {
        let reg = registry();
        let a = test_support::worker("acme", 0);

        reg.mark_failure(&a, FailureReason::Upstream);
        let first = a.cooldown_until_ms();
        reg.mark_failure(&a, FailureReason::Upstream);
        let second = a.cooldown_until_ms();
        reg.mark_failure(&a, FailureReason::Upstream);
        let third = a.cooldown_until_ms();

        // Windows: base, 2*base, 4*base from roughly the same instant.
        assert!(second > first);
        assert!(third > second);
    }

    #[test]
    fn success_resets_failures_and_cooldown() {
        let reg = registry();
        let a = test_support::worker("acme", 0);
        reg.mark_failure(&a, FailureReason::Upstream);
        assert!(a.consecutive_failures() > 0);
        assert!(a.in_cooldown(now_ms()));

        reg.mark_success(&a);
        assert_eq!(a.consecutive_failures(), 0);
        assert!(!a.in_cooldown(now_ms()));
        assert_eq!(a.processed_requests(), 1);
    }

    #[test]
    fn health_sweep_downgrades_and_restores() {
        let reg = registry();
        let a = test_support::worker("acme", 0);
        reg.register(a.clone()).unwrap();

        for _ in 0..CooldownConfig::default().failure_threshold {
            a.record_failure();
        }
        reg.run_health_sweep();
        assert!(!a.is_healthy());

        // Cooldown expired (none was set) so the next sweep restores.
        reg.run_health_sweep();
        assert!(a.is_healthy());
        assert_eq!(a.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn health_checker_shuts_down() {
        let reg = Arc::new(registry());
        let checker = reg.start_health_checker(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        checker.shutdown().await;
    }
}
