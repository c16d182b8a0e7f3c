//! Transform-out stage: wire response back to canonical form.
//!
//! Complete replies continue to postprocessing; native streams finish
//! the pipeline early, with the worker's busy reference tied to the
//! stream's lifetime.

use tracing::debug;

use crate::{
    adapters::AdapterReply,
    error::GatewayError,
    pipeline::{
        GatewayComponents, PipelineReply, PipelineStage, RequestContext, StageFlow, StageResult,
        TrackedStream,
    },
    streaming::translate_stream,
};

pub(crate) struct TransformOutStage;

#[async_trait::async_trait]
impl PipelineStage for TransformOutStage {
    async fn execute(
        &self,
        ctx: &mut RequestContext,
        components: &GatewayComponents,
    ) -> StageResult {
        let reply = ctx
            .state
            .reply
            .take()
            .ok_or_else(|| GatewayError::internal("transform_out stage ran without a reply"))?;
        let worker = ctx
            .state
            .served_worker
            .clone()
            .ok_or_else(|| GatewayError::internal("transform_out stage ran without a worker"))?;

        match reply {
            AdapterReply::Complete(wire) => {
                let transformer = components.transformers.get(worker.wire_family())?;
                let response = transformer.response_reverse(wire, &ctx.request)?;
                debug!(
                    request_id = %ctx.request.id,
                    response_id = %response.id,
                    "Response transformed to canonical shape"
                );
                ctx.state.response = Some(response);
                Ok(StageFlow::Continue)
            }
            AdapterReply::Stream(wire_stream) => {
                debug!(
                    request_id = %ctx.request.id,
                    worker_id = %worker.worker_id(),
                    "Passing native stream through the family translator"
                );
                let canonical = translate_stream(wire_stream);
                let tracked = TrackedStream::new(
                    canonical,
                    components.registry.clone(),
                    worker,
                    ctx.state.load_guard.take(),
                );
                Ok(StageFlow::Finished(PipelineReply::Streaming(Box::pin(
                    tracked,
                ))))
            }
        }
    }

    fn name(&self) -> &'static str {
        "transform_out"
    }
}
