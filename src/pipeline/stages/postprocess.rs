//! Postprocess stage: stamp response metadata and decide the final
//! delivery shape for streaming clients.

use gateway_protocol::canonical::ResponseMetadata;
use tracing::info;

use crate::{
    error::GatewayError,
    observability::metrics::{metrics_labels, Metrics},
    pipeline::{
        GatewayComponents, PipelineReply, PipelineStage, RequestContext, StageFlow, StageResult,
    },
    streaming::{simulate_stream, StreamingMode},
};

pub(crate) struct PostprocessStage;

#[async_trait::async_trait]
impl PipelineStage for PostprocessStage {
    async fn execute(
        &self,
        ctx: &mut RequestContext,
        components: &GatewayComponents,
    ) -> StageResult {
        let mut response = ctx
            .state
            .response
            .take()
            .ok_or_else(|| GatewayError::internal("postprocess stage ran without a response"))?;
        let worker = ctx
            .state
            .served_worker
            .clone()
            .ok_or_else(|| GatewayError::internal("postprocess stage ran without a worker"))?;

        let mut steps: Vec<String> =
            ctx.state.steps.iter().map(|s| s.to_string()).collect();
        steps.push(self.name().to_string());

        response.metadata = ResponseMetadata {
            provider_served: worker.worker_id().to_string(),
            processing_steps: steps,
            timings_ms: ctx.state.timings_ms.clone(),
            retry_count: ctx.state.retry_count,
        };

        Metrics::record_tokens(
            &response.model,
            metrics_labels::TOKEN_INPUT,
            response.usage.prompt_tokens as u64,
        );
        Metrics::record_tokens(
            &response.model,
            metrics_labels::TOKEN_OUTPUT,
            response.usage.completion_tokens as u64,
        );

        info!(
            request_id = %ctx.request.id,
            response_id = %response.id,
            worker_id = %worker.worker_id(),
            retries = %ctx.state.retry_count,
            total_tokens = %response.usage.total_tokens,
            elapsed_ms = %ctx.start.elapsed().as_millis(),
            "Request completed"
        );

        // Streaming clients served from a buffered response get synthetic
        // chunks, except in force-non-streaming mode where the complete
        // response is the contract.
        if ctx.request.stream
            && components.config.streaming.mode != StreamingMode::ForceNonStreaming
        {
            let stream = simulate_stream(response, &components.config.streaming);
            return Ok(StageFlow::Finished(PipelineReply::Streaming(stream)));
        }

        Ok(StageFlow::Finished(PipelineReply::Complete(response)))
    }

    fn name(&self) -> &'static str {
        "postprocess"
    }
}
