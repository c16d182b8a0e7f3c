//! Pipeline stages, executed in order:
//!
//! 1. **validation** - canonical-request structural checks
//! 2. **routing** - worker selection, busy reference acquired
//! 3. **preprocess** - rule application (model map, roles, defaults)
//! 4. **transform_in** - canonical to wire shape
//! 5. **call** - upstream dispatch, retries, same-category fallback
//! 6. **transform_out** - wire shape back to canonical
//! 7. **postprocess** - metadata stamping, streaming simulation

mod call;
mod postprocess;
mod preprocess;
mod routing;
mod transform_in;
mod transform_out;
mod validation;

pub(crate) use call::CallStage;
pub(crate) use postprocess::PostprocessStage;
pub(crate) use preprocess::PreprocessStage;
pub(crate) use routing::RoutingStage;
pub(crate) use transform_in::TransformInStage;
pub(crate) use transform_out::TransformOutStage;
pub(crate) use validation::ValidationStage;

use gateway_protocol::provider::ProviderCapabilities;

use crate::{
    core::worker::Worker, pipeline::context::RequestContext, streaming::StreamingMode,
    transform::{TransformOptions, WireRequest},
};

/// Per-worker transform options.
pub(crate) fn transform_options(worker: &Worker) -> TransformOptions {
    TransformOptions {
        capabilities: worker.spec.capabilities,
        default_max_tokens: worker.spec.default_max_tokens,
    }
}

/// Decide the wire-level stream flag for a request bound to a worker.
///
/// Simulated mode always calls upstream non-streaming; native mode
/// falls back to non-streaming when the worker cannot stream (the
/// response is then re-emitted as synthetic chunks). Force-non-streaming
/// keeps the upstream stream open and lets the adapter assemble it.
pub(crate) fn adjust_stream_flag(
    wire: &mut WireRequest,
    ctx: &RequestContext,
    mode: StreamingMode,
    capabilities: &ProviderCapabilities,
) {
    if !ctx.request.stream {
        wire.set_stream(false);
        return;
    }
    match mode {
        StreamingMode::Simulated => wire.set_stream(false),
        StreamingMode::Native => {
            if !capabilities.native_streaming {
                wire.set_stream(false);
            }
        }
        StreamingMode::ForceNonStreaming => {}
    }
}
