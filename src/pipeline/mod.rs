//! Pipeline orchestrator: the per-request state machine.
//!
//! Stages execute in sequence over a mutable context:
//! validation, routing, preprocess, transform_in, call, transform_out,
//! postprocess. A stage either continues, finishes early with a reply
//! (streaming), or fails with a [`GatewayError`] whose kind the server
//! maps to HTTP. Deadlines are observed at stage boundaries; the CALL
//! stage is the only long await.

pub mod context;
mod stages;

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context as TaskContext, Poll},
};

pub use context::{GatewayComponents, RequestContext};
use futures::Stream;
use gateway_protocol::canonical::{ChatRequest, ChatResponse, ChatStreamEvent};
use tokio::time::Instant;
use tracing::{debug, error};

use crate::{
    core::{
        registry::{FailureReason, WorkerRegistry},
        worker::{Worker, WorkerLoadGuard},
    },
    error::{GatewayError, GatewayResult},
    observability::metrics::Metrics,
    routing::RoutingHints,
    streaming::CanonicalEventStream,
};

/// What the pipeline hands back to the server.
pub enum PipelineReply {
    Complete(ChatResponse),
    Streaming(CanonicalEventStream),
}

impl std::fmt::Debug for PipelineReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineReply::Complete(_) => f.write_str("PipelineReply::Complete"),
            PipelineReply::Streaming(_) => f.write_str("PipelineReply::Streaming"),
        }
    }
}

/// Stage control flow.
pub(crate) enum StageFlow {
    Continue,
    Finished(PipelineReply),
}

pub(crate) type StageResult = GatewayResult<StageFlow>;

/// One stage of the request pipeline.
#[async_trait::async_trait]
pub(crate) trait PipelineStage: Send + Sync {
    async fn execute(
        &self,
        ctx: &mut RequestContext,
        components: &GatewayComponents,
    ) -> StageResult;

    fn name(&self) -> &'static str;
}

/// The six-stage pipeline plus terminal postprocessing.
pub struct Pipeline {
    components: Arc<GatewayComponents>,
    stages: Vec<Box<dyn PipelineStage>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field(
                "stages",
                &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Pipeline {
    pub fn new(components: Arc<GatewayComponents>) -> Self {
        let stages: Vec<Box<dyn PipelineStage>> = vec![
            Box::new(stages::ValidationStage),
            Box::new(stages::RoutingStage),
            Box::new(stages::PreprocessStage),
            Box::new(stages::TransformInStage),
            Box::new(stages::CallStage),
            Box::new(stages::TransformOutStage),
            Box::new(stages::PostprocessStage),
        ];
        Self { components, stages }
    }

    pub fn components(&self) -> &Arc<GatewayComponents> {
        &self.components
    }

    /// Execute the pipeline for one canonical request.
    pub async fn execute(
        &self,
        request: ChatRequest,
        hints: RoutingHints,
    ) -> GatewayResult<PipelineReply> {
        Metrics::record_request("canonical", &request.model, request.stream);

        let deadline = self.components.deadline();
        let mut ctx = RequestContext::new(request, hints, deadline);

        for stage in &self.stages {
            if Instant::now() >= ctx.deadline {
                let err = GatewayError::Timeout {
                    stage: stage.name().to_string(),
                };
                Metrics::record_pipeline_error(err.kind_code());
                return Err(err);
            }

            let stage_name = stage.name();
            debug!(stage = %stage_name, request_id = %ctx.request.id, "Executing pipeline stage");
            let stage_start = std::time::Instant::now();

            match stage.execute(&mut ctx, &self.components).await {
                Ok(flow) => {
                    ctx.state.steps.push(stage_name);
                    ctx.state.timings_ms.insert(
                        stage_name.to_string(),
                        stage_start.elapsed().as_millis() as u64,
                    );
                    Metrics::record_stage_duration(stage_name, stage_start.elapsed());
                    if let StageFlow::Finished(reply) = flow {
                        debug!(
                            stage = %stage_name,
                            request_id = %ctx.request.id,
                            "Pipeline finished early"
                        );
                        return Ok(reply);
                    }
                }
                Err(e) => {
                    Metrics::record_pipeline_error(e.kind_code());
                    return Err(e);
                }
            }
        }

        error!(request_id = %ctx.request.id, "Pipeline completed without producing a reply");
        Err(GatewayError::internal(
            "pipeline completed without producing a reply",
        ))
    }
}

/// Stream wrapper tying the worker's busy reference and outcome
/// accounting to the stream's lifetime. On drop, a cleanly-finished
/// stream records success; an interrupted one records a failure.
pub(crate) struct TrackedStream {
    inner: CanonicalEventStream,
    registry: Arc<WorkerRegistry>,
    worker: Arc<Worker>,
    _guard: Option<WorkerLoadGuard>,
    completed: bool,
    errored: bool,
}

impl TrackedStream {
    pub(crate) fn new(
        inner: CanonicalEventStream,
        registry: Arc<WorkerRegistry>,
        worker: Arc<Worker>,
        guard: Option<WorkerLoadGuard>,
    ) -> Self {
        Self {
            inner,
            registry,
            worker,
            _guard: guard,
            completed: false,
            errored: false,
        }
    }
}

impl Stream for TrackedStream {
    type Item = GatewayResult<ChatStreamEvent>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(event))) => {
                if matches!(event, ChatStreamEvent::Finish { .. }) {
                    self.completed = true;
                }
                Poll::Ready(Some(Ok(event)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.errored = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        if self.completed && !self.errored {
            self.registry.mark_success(&self.worker);
        } else {
            self.registry
                .mark_failure(&self.worker, FailureReason::Network);
        }
    }
}
