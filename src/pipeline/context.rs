//! Per-request pipeline context and the shared component set.
//!
//! Shared singletons become explicit dependencies threaded through
//! construction: the server owns one [`GatewayComponents`] and the
//! pipeline borrows it per stage.

use std::{collections::HashMap, sync::Arc, time::Duration};

use gateway_protocol::canonical::{ChatRequest, ChatResponse};
use tokio::time::Instant;

use crate::{
    adapters::AdapterRegistry,
    config::GatewayConfig,
    core::{
        credentials::CredentialStore,
        expansion::{expand, ExpansionError},
        registry::WorkerRegistry,
        worker::{Worker, WorkerLoadGuard},
    },
    error::{GatewayError, GatewayResult},
    preprocess::PreprocessorSelector,
    routing::{Router, RoutingDecision, RoutingHints, SnapshotStore},
    streaming::StreamingMode,
    transform::{TransformerRegistry, WireRequest},
};

/// Everything the pipeline stages need, built once at startup.
#[derive(Debug)]
pub struct GatewayComponents {
    pub config: GatewayConfig,
    pub credentials: Arc<CredentialStore>,
    pub registry: Arc<WorkerRegistry>,
    pub router: Arc<Router>,
    pub transformers: Arc<TransformerRegistry>,
    pub preprocessor: Arc<PreprocessorSelector>,
    pub adapters: AdapterRegistry,
}

impl GatewayComponents {
    /// Expand providers, build the registry and routing table, wire the
    /// rest together.
    pub fn from_config(config: GatewayConfig) -> GatewayResult<Self> {
        let credentials = Arc::new(CredentialStore::from_configs(&config.providers));

        let topology = expand(&config.providers, &config.routing, &credentials)
            .map_err(expansion_error)?;

        let registry = Arc::new(WorkerRegistry::new(config.cooldown.clone()));
        for worker in &topology.workers {
            registry.register(worker.clone())?;
        }
        for (category, candidates) in topology.table.categories() {
            registry.register_group(category.as_str(), dedup_workers(candidates));
        }

        let snapshots = Arc::new(SnapshotStore::new(topology.table));
        let policy = crate::policies::policy_from_kind(config.routing.policy);
        let router = Arc::new(Router::new(
            snapshots,
            registry.clone(),
            policy,
            config.routing.clone(),
        ));

        let transformers = Arc::new(TransformerRegistry::new());
        let preprocessor = Arc::new(PreprocessorSelector::new(
            config.strict_roles,
            config.model_map.clone(),
        ));
        let adapters = AdapterRegistry::new(
            config.retry.clone(),
            config.streaming.mode == StreamingMode::ForceNonStreaming,
        );

        Ok(Self {
            config,
            credentials,
            registry,
            router,
            transformers,
            preprocessor,
            adapters,
        })
    }

    /// Install a new provider generation: credentials, workers, groups
    /// and routing table swap atomically from the router's point of
    /// view; in-flight requests complete against the snapshot they
    /// bound at ROUTE.
    pub fn reload_providers(
        &self,
        providers: &[gateway_protocol::provider::ProviderConfig],
    ) -> GatewayResult<u64> {
        self.credentials.reload(providers);
        let topology = expand(providers, &self.config.routing, &self.credentials)
            .map_err(expansion_error)?;

        let groups: Vec<(String, Vec<Arc<Worker>>)> = topology
            .table
            .categories()
            .map(|(category, candidates)| {
                (category.as_str().to_string(), dedup_workers(candidates))
            })
            .collect();

        self.registry.replace_generation(topology.workers, groups);
        Ok(self.router.snapshots().install(topology.table))
    }

    /// Whole-request deadline.
    pub fn deadline(&self) -> Instant {
        Instant::now() + Duration::from_secs(self.config.request_timeout_secs)
    }
}

fn expansion_error(e: ExpansionError) -> GatewayError {
    GatewayError::internal(e.to_string())
}

fn dedup_workers(candidates: &[crate::routing::Candidate]) -> Vec<Arc<Worker>> {
    let mut seen = std::collections::HashSet::new();
    candidates
        .iter()
        .filter(|c| seen.insert(c.worker.worker_id().to_string()))
        .map(|c| c.worker.clone())
        .collect()
}

/// Mutable state accumulated while a request walks the stages.
#[derive(Default)]
pub struct PipelineState {
    pub decision: Option<RoutingDecision>,
    /// MarkBusy reference held between ROUTE and CALL completion.
    pub load_guard: Option<WorkerLoadGuard>,
    /// The worker that actually served the request (differs from the
    /// decision's worker after fallback).
    pub served_worker: Option<Arc<Worker>>,
    pub wire_request: Option<WireRequest>,
    pub reply: Option<crate::adapters::AdapterReply>,
    pub response: Option<ChatResponse>,
    /// Ordered names of stages that actually ran.
    pub steps: Vec<&'static str>,
    pub timings_ms: HashMap<String, u64>,
    pub retry_count: u32,
    pub preprocess_warnings: Vec<String>,
}

/// Per-request context threaded through the stages.
pub struct RequestContext {
    pub request: ChatRequest,
    pub hints: RoutingHints,
    pub deadline: Instant,
    pub start: std::time::Instant,
    pub state: PipelineState,
}

impl RequestContext {
    pub fn new(request: ChatRequest, hints: RoutingHints, deadline: Instant) -> Self {
        Self {
            request,
            hints,
            deadline,
            start: std::time::Instant::now(),
            state: PipelineState::default(),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.request.stream
    }
}
