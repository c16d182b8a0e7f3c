//! Routing: category classification, candidate tables, generation
//! snapshots and the router itself.

mod category;
mod snapshot;
mod table;

use std::sync::Arc;

pub use category::{classify, estimate_tokens, Category};
use gateway_protocol::canonical::ChatRequest;
pub use snapshot::{RoutingSnapshot, SnapshotStore};
pub use table::{Candidate, RoutingTable};
use tracing::debug;

use crate::{
    config::RoutingConfig,
    core::{registry::WorkerRegistry, worker::Worker},
    error::{GatewayError, GatewayResult},
    policies::SelectionPolicy,
};

/// Routing-context hints supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RoutingHints {
    /// Explicit category override; wins over classification.
    pub category: Option<Category>,
    /// Scheduling priority hint.
    pub priority: Option<i32>,
    /// Streaming preference.
    pub prefer_streaming: Option<bool>,
    /// Reject rather than repair requests the wire cannot express.
    pub strict_validation: Option<bool>,
}

/// The router's verdict for one request.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub worker: Arc<Worker>,
    /// Concrete model to request upstream.
    pub target_model: String,
    /// Selection policy that produced this decision.
    pub strategy: &'static str,
    /// Other currently-eligible candidates in the same category, for
    /// retry only. Never used to cross categories.
    pub fallback_workers: Vec<Arc<Worker>>,
    /// The selected worker has recent failures; probe-worthy.
    pub requires_health_check: bool,
    pub category: Category,
    /// Generation snapshot bound at ROUTE, held until DONE.
    pub snapshot: Arc<RoutingSnapshot>,
}

/// Maps (virtual model, category, flags) to a worker.
///
/// Zero-fallback: a category with no healthy candidate surfaces
/// NoHealthyWorker; the router never rewrites to a different category.
#[derive(Debug)]
pub struct Router {
    snapshots: Arc<SnapshotStore>,
    registry: Arc<WorkerRegistry>,
    policy: Arc<dyn SelectionPolicy>,
    config: RoutingConfig,
}

impl Router {
    pub fn new(
        snapshots: Arc<SnapshotStore>,
        registry: Arc<WorkerRegistry>,
        policy: Arc<dyn SelectionPolicy>,
        config: RoutingConfig,
    ) -> Self {
        Self {
            snapshots,
            registry,
            policy,
            config,
        }
    }

    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.snapshots
    }

    pub fn route(
        &self,
        request: &ChatRequest,
        hints: &RoutingHints,
    ) -> GatewayResult<RoutingDecision> {
        let snapshot = self.snapshots.load();

        let category = hints
            .category
            .unwrap_or_else(|| classify(request, &self.config));

        // Candidate lookup with single-step fallback to default; a
        // missing default is NoRoute, never a substituted answer.
        let mut effective = category;
        if snapshot.table.candidates(effective).is_empty() {
            if effective != Category::Default
                && !snapshot.table.candidates(Category::Default).is_empty()
            {
                debug!(
                    category = %category,
                    "No candidates for category, falling back to default candidate list"
                );
                effective = Category::Default;
            } else {
                return Err(GatewayError::NoRoute {
                    category: category.to_string(),
                });
            }
        }

        let worker = self
            .registry
            .select_available(effective.as_str(), self.policy.as_ref())?;

        let target_model = resolve_target_model(request, &snapshot.table, effective, &worker);

        let fallback_workers: Vec<Arc<Worker>> = self
            .registry
            .eligible(effective.as_str())
            .into_iter()
            .filter(|w| w.worker_id() != worker.worker_id())
            .collect();

        debug!(
            category = %effective,
            worker_id = %worker.worker_id(),
            target_model = %target_model,
            fallbacks = %fallback_workers.len(),
            "Routed request"
        );

        Ok(RoutingDecision {
            requires_health_check: worker.consecutive_failures() > 0,
            worker,
            target_model,
            strategy: self.policy.name(),
            fallback_workers,
            category: effective,
            snapshot,
        })
    }

    /// Re-resolve the target model for a fallback worker.
    pub fn target_model_for(
        &self,
        request: &ChatRequest,
        decision: &RoutingDecision,
        worker: &Arc<Worker>,
    ) -> String {
        resolve_target_model(request, &decision.snapshot.table, decision.category, worker)
    }
}

/// Resolve the concrete model for a worker: a concrete requested model
/// the worker advertises wins; then the category route's mapping; then
/// the worker's first advertised model; a wildcard worker passes the
/// requested name through.
fn resolve_target_model(
    request: &ChatRequest,
    table: &RoutingTable,
    category: Category,
    worker: &Arc<Worker>,
) -> String {
    let requested_is_virtual = Category::from_name(&request.model).is_some();

    if !requested_is_virtual && worker.supports_model(&request.model) {
        return request.model.clone();
    }

    if let Some(mapped) = table.target_model(category, worker.worker_id()) {
        return mapped.to_string();
    }

    worker
        .spec
        .primary_model()
        .map(str::to_string)
        .unwrap_or_else(|| request.model.clone())
}

#[cfg(test)]
mod tests {
    use gateway_protocol::canonical::{Message, RequestMetadata, Role};

    use super::*;
    use crate::{
        config::CooldownConfig,
        core::{registry::FailureReason, worker::test_support},
        policies::RoundRobinPolicy,
    };

    fn request(model: &str) -> ChatRequest {
        ChatRequest {
            id: "t1".to_string(),
            model: model.to_string(),
            messages: vec![Message::text(Role::User, "Hello")],
            tools: None,
            tool_choice: None,
            temperature: None,
            top_p: None,
            stop: None,
            max_tokens: Some(32),
            stream: false,
            metadata: RequestMetadata::default(),
        }
    }

    fn router_with_two_workers() -> (Router, Arc<Worker>, Arc<Worker>) {
        let a = test_support::worker("acme", 0);
        let b = test_support::worker("acme", 1);

        let registry = Arc::new(WorkerRegistry::new(CooldownConfig::default()));
        registry.register(a.clone()).unwrap();
        registry.register(b.clone()).unwrap();
        registry.register_group("default", vec![a.clone(), b.clone()]);

        let mut table = RoutingTable::new();
        for worker in [&a, &b] {
            table.push(
                Category::Default,
                Candidate {
                    worker: worker.clone(),
                    target_model: Some("m-x".to_string()),
                    priority: 0,
                    weight: 1,
                    security_enhanced: false,
                },
            );
        }

        let router = Router::new(
            Arc::new(SnapshotStore::new(table)),
            registry,
            Arc::new(RoundRobinPolicy::new()),
            RoutingConfig::default(),
        );
        (router, a, b)
    }

    #[test]
    fn routes_to_eligible_worker_with_fallbacks() {
        let (router, _, _) = router_with_two_workers();
        let decision = router.route(&request("default"), &RoutingHints::default()).unwrap();
        assert_eq!(decision.target_model, "m-x");
        assert_eq!(decision.fallback_workers.len(), 1);
        assert_ne!(
            decision.fallback_workers[0].worker_id(),
            decision.worker.worker_id()
        );
        assert_eq!(decision.category, Category::Default);
    }

    #[test]
    fn unknown_category_falls_back_to_default_candidates() {
        let (router, _, _) = router_with_two_workers();
        let hints = RoutingHints {
            category: Some(Category::Reasoning),
            ..Default::default()
        };
        let decision = router.route(&request("default"), &hints).unwrap();
        assert_eq!(decision.category, Category::Default);
    }

    #[test]
    fn no_route_when_no_candidates_at_all() {
        let registry = Arc::new(WorkerRegistry::new(CooldownConfig::default()));
        let router = Router::new(
            Arc::new(SnapshotStore::new(RoutingTable::new())),
            registry,
            Arc::new(RoundRobinPolicy::new()),
            RoutingConfig::default(),
        );
        let err = router
            .route(&request("default"), &RoutingHints::default())
            .unwrap_err();
        assert_eq!(err.kind_code(), "NoRoute");
    }

    #[test]
    fn no_healthy_worker_when_all_cooling_down() {
        let (router, a, b) = router_with_two_workers();
        for w in [&a, &b] {
            router.registry.mark_failure(
                w,
                FailureReason::RateLimited {
                    retry_after_secs: Some(60),
                },
            );
        }
        let err = router
            .route(&request("default"), &RoutingHints::default())
            .unwrap_err();
        assert_eq!(err.kind_code(), "NoHealthyWorker");
    }

    #[test]
    fn concrete_model_passes_through_when_supported() {
        let (router, _, _) = router_with_two_workers();
        // Workers advertise "m-x" in test_support::spec.
        let decision = router.route(&request("m-x"), &RoutingHints::default()).unwrap();
        assert_eq!(decision.target_model, "m-x");
    }

    #[test]
    fn decision_binds_snapshot_generation() {
        let (router, _, _) = router_with_two_workers();
        let decision = router.route(&request("default"), &RoutingHints::default()).unwrap();
        assert_eq!(decision.snapshot.generation, 1);
    }
}
