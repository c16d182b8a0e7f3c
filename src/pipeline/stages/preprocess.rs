//! Preprocess stage: apply the selected rules in place.

use tracing::{debug, warn};

use crate::{
    error::GatewayError,
    pipeline::{GatewayComponents, PipelineStage, RequestContext, StageFlow, StageResult},
};

pub(crate) struct PreprocessStage;

#[async_trait::async_trait]
impl PipelineStage for PreprocessStage {
    async fn execute(
        &self,
        ctx: &mut RequestContext,
        components: &GatewayComponents,
    ) -> StageResult {
        let worker = ctx
            .state
            .served_worker
            .clone()
            .ok_or_else(|| GatewayError::internal("preprocess stage ran without a worker"))?;

        let rules = components.preprocessor.select_rules(
            worker.wire_family(),
            worker.spec.variant.as_deref(),
            &ctx.request,
            worker.spec.default_max_tokens,
            ctx.hints.strict_validation,
        );

        let outcome = components.preprocessor.apply(&rules, &mut ctx.request)?;

        for warning in &outcome.warnings {
            warn!(request_id = %ctx.request.id, warning = %warning, "Preprocessing warning");
        }
        if !outcome.applied.is_empty() {
            debug!(
                request_id = %ctx.request.id,
                rules = ?outcome.applied,
                "Preprocessing rules applied"
            );
        }

        ctx.state.preprocess_warnings = outcome.warnings;
        Ok(StageFlow::Continue)
    }

    fn name(&self) -> &'static str {
        "preprocess"
    }
}
