//! Multi-provider LLM gateway.
//!
//! One canonical request shape comes in; the router picks a worker (a
//! provider + credential pair), the transformers convert to that
//! worker's wire family, the adapter calls upstream, and the response
//! comes back in canonical form with uniform semantics across
//! providers.

pub mod adapters;
pub mod config;
pub mod core;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod policies;
pub mod preprocess;
pub mod routing;
pub mod server;
pub mod streaming;
pub mod transform;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use pipeline::{GatewayComponents, Pipeline, PipelineReply};
