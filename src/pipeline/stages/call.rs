//! Call stage: dispatch to the selected worker, then walk the
//! same-category fallback list on retryable failure.
//!
//! The adapter absorbs retryable outcomes up to the worker's own retry
//! limit; what surfaces here is terminal for that worker. Failures are
//! recorded with their reason so the registry applies the right
//! cooldown. The fallback walk never crosses the category boundary, and
//! a terminal failure from the last candidate propagates as-is.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{adjust_stream_flag, transform_options};
use crate::{
    core::{
        registry::FailureReason,
        worker::{Worker, WorkerLoadGuard},
    },
    error::{GatewayError, GatewayResult},
    pipeline::{GatewayComponents, PipelineStage, RequestContext, StageFlow, StageResult},
    transform::WireRequest,
};

pub(crate) struct CallStage;

#[async_trait::async_trait]
impl PipelineStage for CallStage {
    async fn execute(
        &self,
        ctx: &mut RequestContext,
        components: &GatewayComponents,
    ) -> StageResult {
        let decision = ctx
            .state
            .decision
            .clone()
            .ok_or_else(|| GatewayError::internal("call stage ran without a decision"))?;
        let mut wire = ctx
            .state
            .wire_request
            .take()
            .ok_or_else(|| GatewayError::internal("call stage ran without a wire request"))?;

        let mut worker = decision.worker.clone();
        let mut fallbacks = decision.fallback_workers.clone().into_iter();

        loop {
            let adapter = components.adapters.get(worker.wire_family())?;
            let credential = components
                .credentials
                .get(&worker.spec.provider_id, worker.spec.credential_index)
                .ok_or_else(|| {
                    GatewayError::internal(format!(
                        "no credential at index {} for provider '{}'",
                        worker.spec.credential_index, worker.spec.provider_id
                    ))
                })?;

            debug!(
                request_id = %ctx.request.id,
                worker_id = %worker.worker_id(),
                "Dispatching upstream call"
            );

            match adapter
                .call(&worker.spec, &credential, wire.clone(), ctx.deadline)
                .await
            {
                Ok(reply) => {
                    components.registry.mark_success(&worker);
                    ctx.state.served_worker = Some(worker);
                    ctx.state.reply = Some(reply);
                    return Ok(StageFlow::Continue);
                }
                Err(e) => {
                    if let Some(reason) = failure_reason(&e) {
                        components.registry.mark_failure(&worker, reason);
                    }

                    if !e.is_retryable() {
                        return Err(e);
                    }

                    // Next eligible candidate in the same category.
                    let next = next_eligible(&mut fallbacks);
                    match next {
                        Some(next) => {
                            warn!(
                                request_id = %ctx.request.id,
                                failed_worker = %worker.worker_id(),
                                next_worker = %next.worker_id(),
                                error = %e,
                                "Worker failed, trying next candidate"
                            );
                            ctx.state.retry_count += 1;

                            wire = rebuild_wire(ctx, components, &decision, &next)?;
                            ctx.state.load_guard =
                                Some(WorkerLoadGuard::new(next.clone()));
                            ctx.state.served_worker = Some(next.clone());
                            worker = next;
                        }
                        None => {
                            warn!(
                                request_id = %ctx.request.id,
                                worker_id = %worker.worker_id(),
                                error = %e,
                                "All candidates exhausted"
                            );
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "call"
    }
}

/// Re-transform the canonical request for a fallback worker, whose
/// family or model mapping may differ from the original target.
fn rebuild_wire(
    ctx: &RequestContext,
    components: &GatewayComponents,
    decision: &crate::routing::RoutingDecision,
    worker: &Arc<Worker>,
) -> GatewayResult<WireRequest> {
    let target_model = components
        .router
        .target_model_for(&ctx.request, decision, worker);
    let transformer = components.transformers.get(worker.wire_family())?;
    let mut wire =
        transformer.request_forward(&ctx.request, &target_model, &transform_options(worker))?;
    adjust_stream_flag(
        &mut wire,
        ctx,
        components.config.streaming.mode,
        &worker.spec.capabilities,
    );
    Ok(wire)
}

/// Skip candidates that became ineligible since routing.
fn next_eligible(
    fallbacks: &mut impl Iterator<Item = Arc<Worker>>,
) -> Option<Arc<Worker>> {
    let now = crate::core::worker::now_ms();
    fallbacks.find(|w| w.is_eligible(now))
}

/// Cooldown classification for an upstream error; structural errors do
/// not implicate the worker.
fn failure_reason(error: &GatewayError) -> Option<FailureReason> {
    match error {
        GatewayError::RateLimited {
            retry_after_secs, ..
        } => Some(FailureReason::RateLimited {
            retry_after_secs: *retry_after_secs,
        }),
        GatewayError::Auth { .. } => Some(FailureReason::Auth),
        GatewayError::Upstream { .. } => Some(FailureReason::Upstream),
        GatewayError::Timeout { .. } => Some(FailureReason::Timeout),
        GatewayError::PartialResponse { .. } => Some(FailureReason::Network),
        _ => None,
    }
}
