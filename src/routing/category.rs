//! Request category classification.
//!
//! The category decides which candidate list serves a request. An
//! explicit hint wins; otherwise the request is classified from its
//! shape: tools, estimated context size, model-name markers.

use gateway_protocol::canonical::ChatRequest;
use strum::{Display, EnumString, IntoStaticStr};

use crate::config::RoutingConfig;

/// Virtual-model categories.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr,
)]
pub enum Category {
    #[strum(serialize = "default")]
    Default,
    #[strum(serialize = "background")]
    Background,
    #[strum(serialize = "reasoning")]
    Reasoning,
    #[strum(serialize = "longContext")]
    LongContext,
    #[strum(serialize = "webSearch")]
    WebSearch,
    #[strum(serialize = "toolCall")]
    ToolCall,
}

impl Category {
    pub fn from_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Rough token estimate: total content bytes over four. Good enough for
/// threshold comparisons; exact counting is an upstream concern.
pub fn estimate_tokens(request: &ChatRequest) -> u32 {
    let mut bytes = 0usize;
    for message in &request.messages {
        bytes += message.content.as_text().len();
    }
    if let Some(tools) = &request.tools {
        for tool in tools {
            bytes += tool.name.len();
            bytes += tool.description.as_deref().map_or(0, str::len);
            bytes += tool.parameters.to_string().len();
        }
    }
    (bytes / 4) as u32
}

/// Classify a request. Order: virtual name, tool presence, context
/// length, reasoning markers, web-search tools, background markers,
/// default. Requests whose only tools are web-search tools classify as
/// webSearch rather than toolCall.
pub fn classify(request: &ChatRequest, config: &RoutingConfig) -> Category {
    if let Some(category) = Category::from_name(&request.model) {
        return category;
    }

    let tools = request.tools.as_deref().unwrap_or(&[]);
    let is_web_tool = |name: &str| {
        config
            .web_search_markers
            .iter()
            .any(|marker| name.contains(marker.as_str()))
    };
    let has_web_tools = tools.iter().any(|t| is_web_tool(&t.name));
    let has_plain_tools = tools.iter().any(|t| !is_web_tool(&t.name));

    if has_plain_tools {
        return Category::ToolCall;
    }

    if estimate_tokens(request) > config.long_context_threshold {
        return Category::LongContext;
    }

    let model = request.model.to_lowercase();
    if config
        .reasoning_markers
        .iter()
        .any(|marker| model.contains(marker.as_str()))
    {
        return Category::Reasoning;
    }

    if has_web_tools {
        return Category::WebSearch;
    }

    if config
        .background_markers
        .iter()
        .any(|marker| model.contains(marker.as_str()))
    {
        return Category::Background;
    }

    Category::Default
}
