//! Worker: the smallest routable unit, one per (provider, credential
//! index).
//!
//! All mutable state is atomics so the hot path takes no locks. Cooldown
//! timestamps are milliseconds on a process-epoch monotonic clock.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, LazyLock,
};
use std::time::Instant;

use gateway_protocol::provider::{WireFamily, WorkerSpec};
use serde::Serialize;

use crate::observability::metrics::Metrics;

static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Milliseconds since the process epoch. Monotonic.
pub fn now_ms() -> u64 {
    EPOCH.elapsed().as_millis() as u64
}

/// A routable worker with its health state.
#[derive(Debug)]
pub struct Worker {
    pub spec: WorkerSpec,
    healthy: AtomicBool,
    load: AtomicUsize,
    processed: AtomicUsize,
    consecutive_failures: AtomicUsize,
    cooldown_until_ms: AtomicU64,
}

impl Worker {
    pub fn new(spec: WorkerSpec) -> Self {
        Self {
            spec,
            healthy: AtomicBool::new(true),
            load: AtomicUsize::new(0),
            processed: AtomicUsize::new(0),
            consecutive_failures: AtomicUsize::new(0),
            cooldown_until_ms: AtomicU64::new(0),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.spec.worker_id
    }

    pub fn wire_family(&self) -> WireFamily {
        self.spec.wire_family
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
        Metrics::set_worker_health(self.worker_id(), healthy);
    }

    pub fn load(&self) -> usize {
        self.load.load(Ordering::Relaxed)
    }

    pub fn increment_load(&self) {
        self.load.fetch_add(1, Ordering::Relaxed);
        Metrics::set_worker_requests_active(self.worker_id(), self.load());
    }

    pub fn decrement_load(&self) {
        if self
            .load
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_sub(1)
            })
            .is_err()
        {
            tracing::warn!(
                worker_id = %self.worker_id(),
                "Attempted to decrement load counter that is already at 0"
            );
        }
        Metrics::set_worker_requests_active(self.worker_id(), self.load());
    }

    pub fn processed_requests(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn increment_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Increment the failure counter and return the new value.
    pub fn record_failure(&self) -> usize {
        self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn reset_failures(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
    }

    pub fn cooldown_until_ms(&self) -> u64 {
        self.cooldown_until_ms.load(Ordering::Acquire)
    }

    pub fn set_cooldown_until(&self, until_ms: u64) {
        self.cooldown_until_ms.store(until_ms, Ordering::Release);
    }

    pub fn clear_cooldown(&self) {
        self.cooldown_until_ms.store(0, Ordering::Release);
    }

    pub fn in_cooldown(&self, now_ms: u64) -> bool {
        now_ms < self.cooldown_until_ms()
    }

    /// Saturated when a concurrency ceiling is configured and reached.
    pub fn is_saturated(&self) -> bool {
        self.spec
            .max_concurrency
            .is_some_and(|ceiling| self.load() >= ceiling)
    }

    /// Eligible for selection: healthy, out of cooldown, not saturated.
    pub fn is_eligible(&self, now_ms: u64) -> bool {
        self.is_healthy() && !self.in_cooldown(now_ms) && !self.is_saturated()
    }

    pub fn supports_model(&self, model_id: &str) -> bool {
        self.spec.supports_model(model_id)
    }
}

/// RAII guard pairing MarkBusy with MarkIdle.
///
/// Increments worker load on construction and decrements on drop, so a
/// request releases its reference on every exit path, including
/// streaming bodies that outlive the handler.
pub struct WorkerLoadGuard {
    worker: Arc<Worker>,
}

impl WorkerLoadGuard {
    pub fn new(worker: Arc<Worker>) -> Self {
        worker.increment_load();
        Self { worker }
    }

    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }
}

impl Drop for WorkerLoadGuard {
    fn drop(&mut self) {
        self.worker.decrement_load();
    }
}

/// Point-in-time worker state for the operator surface.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    pub worker_id: String,
    pub provider_id: String,
    pub credential_index: usize,
    pub wire_family: WireFamily,
    pub endpoint: String,
    pub models: Vec<String>,
    pub healthy: bool,
    pub load: usize,
    pub processed_requests: usize,
    pub consecutive_failures: usize,
    pub cooldown_remaining_ms: u64,
}

pub fn worker_to_info(worker: &Arc<Worker>) -> WorkerInfo {
    let now = now_ms();
    WorkerInfo {
        worker_id: worker.spec.worker_id.clone(),
        provider_id: worker.spec.provider_id.clone(),
        credential_index: worker.spec.credential_index,
        wire_family: worker.spec.wire_family,
        endpoint: worker.spec.endpoint.clone(),
        models: worker.spec.models.clone(),
        healthy: worker.is_healthy(),
        load: worker.load(),
        processed_requests: worker.processed_requests(),
        consecutive_failures: worker.consecutive_failures(),
        cooldown_remaining_ms: worker.cooldown_until_ms().saturating_sub(now),
    }
}
