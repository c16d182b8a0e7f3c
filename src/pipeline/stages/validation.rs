//! Validation stage: canonical-request structural requirements.

use std::collections::HashSet;

use gateway_protocol::canonical::{Role, MAX_ANNOTATIONS};
use tracing::debug;
use validator::Validate;

use crate::{
    error::GatewayError,
    pipeline::{GatewayComponents, PipelineStage, RequestContext, StageFlow, StageResult},
};

pub(crate) struct ValidationStage;

#[async_trait::async_trait]
impl PipelineStage for ValidationStage {
    async fn execute(
        &self,
        ctx: &mut RequestContext,
        _components: &GatewayComponents,
    ) -> StageResult {
        let request = &ctx.request;

        request
            .validate()
            .map_err(|e| GatewayError::bad_request(e.to_string()))?;

        if request.metadata.annotations.len() > MAX_ANNOTATIONS {
            return Err(GatewayError::bad_request(format!(
                "metadata annotations exceed the maximum of {}",
                MAX_ANNOTATIONS
            )));
        }

        if let Some(tools) = &request.tools {
            let mut names = HashSet::new();
            for tool in tools {
                if tool.name.is_empty() {
                    return Err(GatewayError::bad_request("tool name cannot be empty"));
                }
                if !names.insert(tool.name.as_str()) {
                    return Err(GatewayError::bad_request(format!(
                        "duplicate tool name '{}'",
                        tool.name
                    )));
                }
            }
        }

        for message in &request.messages {
            if message.role == Role::Tool && message.tool_call_id.is_none() {
                return Err(GatewayError::bad_request(
                    "tool message missing tool_call_id",
                ));
            }
        }

        debug!(
            request_id = %request.id,
            messages = %request.messages.len(),
            streaming = %request.stream,
            "Request validated"
        );
        Ok(StageFlow::Continue)
    }

    fn name(&self) -> &'static str {
        "validation"
    }
}
