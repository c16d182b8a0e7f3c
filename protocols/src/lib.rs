//! Protocol definitions for the provider gateway.
//!
//! One canonical chat shape circulates inside the gateway; the wire
//! modules define the upstream formats the transformers convert to and
//! from.

pub mod anthropic;
pub mod canonical;
pub mod openai;
pub mod provider;
