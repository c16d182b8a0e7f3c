//! Transform-in stage: canonical request to the selected worker's wire
//! shape.

use tracing::debug;

use super::{adjust_stream_flag, transform_options};
use crate::{
    error::GatewayError,
    pipeline::{GatewayComponents, PipelineStage, RequestContext, StageFlow, StageResult},
};

pub(crate) struct TransformInStage;

#[async_trait::async_trait]
impl PipelineStage for TransformInStage {
    async fn execute(
        &self,
        ctx: &mut RequestContext,
        components: &GatewayComponents,
    ) -> StageResult {
        let decision = ctx
            .state
            .decision
            .as_ref()
            .ok_or_else(|| GatewayError::internal("transform_in stage ran without a decision"))?;
        let worker = decision.worker.clone();
        let target_model = decision.target_model.clone();

        let transformer = components.transformers.get(worker.wire_family())?;
        let mut wire =
            transformer.request_forward(&ctx.request, &target_model, &transform_options(&worker))?;

        adjust_stream_flag(
            &mut wire,
            ctx,
            components.config.streaming.mode,
            &worker.spec.capabilities,
        );

        debug!(
            request_id = %ctx.request.id,
            family = %worker.wire_family(),
            target_model = %target_model,
            wire_streaming = %wire.is_stream(),
            "Request transformed to wire shape"
        );

        ctx.state.wire_request = Some(wire);
        Ok(StageFlow::Continue)
    }

    fn name(&self) -> &'static str {
        "transform_in"
    }
}
