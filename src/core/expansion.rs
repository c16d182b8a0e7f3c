//! Expansion: logical provider configs to the concrete worker fleet.
//!
//! A provider with N credential entries yields N independently-routable
//! workers (`{provider_id}:{credential_index}`). Expansion is
//! deterministic given input order and rewrites the category routes so
//! every logical provider reference becomes its expanded workers.

use std::{collections::HashMap, sync::Arc};

use gateway_protocol::provider::{ProviderConfig, WorkerSpec};
use thiserror::Error;
use tracing::{info, warn};

use super::{credentials::CredentialStore, worker::Worker};
use crate::{
    config::RoutingConfig,
    routing::{Candidate, Category, RoutingTable},
};

#[derive(Debug, Error)]
pub enum ExpansionError {
    /// The entire expansion produced zero workers.
    #[error("expansion produced no workers: every provider was disabled or had no credentials")]
    ExpansionEmpty,
}

/// The expanded fleet plus the rewritten routing table.
#[derive(Debug)]
pub struct ExpandedTopology {
    pub workers: Vec<Arc<Worker>>,
    pub table: RoutingTable,
}

/// Expand logical provider configs into workers and category routes.
pub fn expand(
    configs: &[ProviderConfig],
    routing: &RoutingConfig,
    credentials: &CredentialStore,
) -> Result<ExpandedTopology, ExpansionError> {
    let mut workers: Vec<Arc<Worker>> = Vec::new();
    let mut by_provider: HashMap<String, Vec<Arc<Worker>>> = HashMap::new();

    for config in configs {
        if !config.enabled {
            warn!(provider = %config.id, "Provider disabled, no workers emitted");
            continue;
        }
        let total = credentials.count(&config.id);
        if total == 0 {
            warn!(provider = %config.id, "Provider has no credentials, no workers emitted");
            continue;
        }

        let mut expanded = Vec::with_capacity(total);
        for index in 0..total {
            let spec = WorkerSpec {
                worker_id: format!("{}:{}", config.id, index),
                provider_id: config.id.clone(),
                credential_index: index,
                total_credentials: total,
                wire_family: config.wire_family,
                endpoint: normalize_endpoint(&config.endpoint),
                models: config.models.clone(),
                timeout_secs: config.timeout_secs,
                max_retries: config.max_retries,
                priority: config.priority,
                weight: config.weight,
                variant: config.variant.clone(),
                default_max_tokens: config.default_max_tokens,
                max_concurrency: config.max_concurrency,
                capabilities: config.capabilities,
                headers: config.headers.clone(),
            };
            expanded.push(Arc::new(Worker::new(spec)));
        }

        info!(
            provider = %config.id,
            workers = %expanded.len(),
            family = %config.wire_family,
            "Expanded provider into workers"
        );

        by_provider.insert(config.id.clone(), expanded.clone());
        workers.extend(expanded);
    }

    if workers.is_empty() {
        return Err(ExpansionError::ExpansionEmpty);
    }

    let mut table = RoutingTable::new();

    for (category_name, targets) in ordered_categories(routing) {
        let Some(category) = Category::from_name(category_name) else {
            warn!(category = %category_name, "Unknown category in routing config, skipped");
            continue;
        };

        for target in targets {
            let Some(provider_workers) = by_provider.get(&target.provider) else {
                warn!(
                    category = %category_name,
                    provider = %target.provider,
                    "Category route references provider with no workers, skipped"
                );
                continue;
            };
            for worker in provider_workers {
                table.push(
                    category,
                    Candidate {
                        worker: worker.clone(),
                        target_model: target.model.clone(),
                        priority: target.priority,
                        weight: target.weight,
                        security_enhanced: target.security_enhanced,
                    },
                );
            }
        }
    }

    // A gateway with providers but no configured default route would be
    // unroutable; synthesize the default category from all workers in
    // config order.
    if table.candidates(Category::Default).is_empty() {
        info!("No default category configured, synthesizing from all workers");
        for worker in &workers {
            table.push(
                Category::Default,
                Candidate {
                    worker: worker.clone(),
                    target_model: None,
                    priority: worker.spec.priority,
                    weight: worker.spec.weight,
                    security_enhanced: false,
                },
            );
        }
    }

    Ok(ExpandedTopology { workers, table })
}

/// Category routes in deterministic order (config map iteration order is
/// not): named categories sorted by name.
fn ordered_categories(
    routing: &RoutingConfig,
) -> Vec<(&str, &[crate::config::CategoryTarget])> {
    let mut entries: Vec<_> = routing
        .categories
        .iter()
        .map(|(name, targets)| (name.as_str(), targets.as_slice()))
        .collect();
    entries.sort_by_key(|(name, _)| *name);
    entries
}

fn normalize_endpoint(endpoint: &str) -> String {
    endpoint.trim_end_matches('/').to_string()
}
