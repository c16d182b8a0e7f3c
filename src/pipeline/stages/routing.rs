//! Routing stage: select a worker and acquire the busy reference held
//! until the call completes.

use tracing::debug;

use crate::{
    core::worker::WorkerLoadGuard,
    pipeline::{GatewayComponents, PipelineStage, RequestContext, StageFlow, StageResult},
};

pub(crate) struct RoutingStage;

#[async_trait::async_trait]
impl PipelineStage for RoutingStage {
    async fn execute(
        &self,
        ctx: &mut RequestContext,
        components: &GatewayComponents,
    ) -> StageResult {
        let decision = components.router.route(&ctx.request, &ctx.hints)?;

        debug!(
            request_id = %ctx.request.id,
            worker_id = %decision.worker.worker_id(),
            category = %decision.category,
            strategy = %decision.strategy,
            "Worker selected"
        );

        ctx.state.load_guard = Some(WorkerLoadGuard::new(decision.worker.clone()));
        ctx.state.served_worker = Some(decision.worker.clone());
        ctx.state.decision = Some(decision);
        Ok(StageFlow::Continue)
    }

    fn name(&self) -> &'static str {
        "routing"
    }
}
