//! Preprocessing rules applied between routing and transform-in.
//!
//! A rule has a name, gating condition, action, priority and enabled
//! flag. The selector picks the rules applicable to (wire family,
//! provider variant, request shape), sorts them priority-descending and
//! applies each in place.

use std::collections::HashMap;

use gateway_protocol::{
    canonical::{ChatRequest, Role, ToolChoice, ToolChoiceMode},
    provider::WireFamily,
};
use serde_json::Value;
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};

/// Gating condition for a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Always,
    HasTools,
    IsStreaming,
    MissingMaxTokens,
    HasMessages,
    /// Applies only to workers with this provider variant tag.
    Variant(String),
}

impl Condition {
    fn matches(&self, request: &ChatRequest, variant: Option<&str>) -> bool {
        match self {
            Condition::Always => true,
            Condition::HasTools => request.has_tools(),
            Condition::IsStreaming => request.stream,
            Condition::MissingMaxTokens => request.max_tokens.is_none(),
            Condition::HasMessages => !request.messages.is_empty(),
            Condition::Variant(tag) => variant == Some(tag.as_str()),
        }
    }
}

/// What a rule does to the request.
#[derive(Debug, Clone)]
pub enum Action {
    /// Rewrite the model name through a mapping table.
    MapModelName(HashMap<String, String>),
    /// Remove parameters an upstream variant ignores or rejects.
    StripUnsupportedParameters(Vec<String>),
    /// Supply max_tokens when absent.
    AddMaxTokensDefault(u32),
    /// Down-convert roles the target wire does not know, or reject when
    /// strict.
    ValidateRoles { strict: bool },
    /// Unwrap function-style tool schemas into plain JSON schemas.
    ConvertToolSchema,
    /// Default tool_choice to auto when tools are present.
    SetDefaultToolChoice,
    /// Drop tools entirely when tool_choice is "none" (the Anthropic
    /// adapter's reading of "none"; the OpenAI adapter forwards it).
    StripToolsOnChoiceNone,
}

/// One preprocessing rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: &'static str,
    pub condition: Condition,
    pub action: Action,
    pub priority: i32,
    pub enabled: bool,
}

/// What preprocessing did, recorded into response metadata.
#[derive(Debug, Default)]
pub struct PreprocessOutcome {
    pub applied: Vec<&'static str>,
    pub warnings: Vec<String>,
}

/// Builds rule sets per wire family and applies them.
#[derive(Debug)]
pub struct PreprocessorSelector {
    strict_roles: bool,
    model_map: HashMap<String, String>,
}

impl PreprocessorSelector {
    pub fn new(strict_roles: bool, model_map: HashMap<String, String>) -> Self {
        Self {
            strict_roles,
            model_map,
        }
    }

    /// Rules applicable to this (family, variant, request), sorted by
    /// priority descending.
    pub fn select_rules(
        &self,
        family: WireFamily,
        variant: Option<&str>,
        request: &ChatRequest,
        default_max_tokens: Option<u32>,
        strict_override: Option<bool>,
    ) -> Vec<Rule> {
        let strict = strict_override.unwrap_or(self.strict_roles);
        let mut rules: Vec<Rule> = Vec::new();

        if !self.model_map.is_empty() {
            rules.push(Rule {
                name: "map_model_name",
                condition: Condition::Always,
                action: Action::MapModelName(self.model_map.clone()),
                priority: 100,
                enabled: true,
            });
        }

        match family {
            WireFamily::Anthropic => {
                rules.push(Rule {
                    name: "validate_roles",
                    condition: Condition::HasMessages,
                    action: Action::ValidateRoles { strict },
                    priority: 90,
                    enabled: true,
                });
                rules.push(Rule {
                    name: "strip_tools_on_choice_none",
                    condition: Condition::HasTools,
                    action: Action::StripToolsOnChoiceNone,
                    priority: 80,
                    enabled: true,
                });
                rules.push(Rule {
                    name: "convert_tool_schema",
                    condition: Condition::HasTools,
                    action: Action::ConvertToolSchema,
                    priority: 70,
                    enabled: true,
                });
                if let Some(default) = default_max_tokens {
                    rules.push(Rule {
                        name: "add_max_tokens_default",
                        condition: Condition::MissingMaxTokens,
                        action: Action::AddMaxTokensDefault(default),
                        priority: 60,
                        enabled: true,
                    });
                }
            }
            WireFamily::OpenAi => {
                rules.push(Rule {
                    name: "set_default_tool_choice",
                    condition: Condition::HasTools,
                    action: Action::SetDefaultToolChoice,
                    priority: 70,
                    enabled: true,
                });
                // Self-hosted OpenAI-compatible variants ignore or reject
                // the tool surface.
                rules.push(Rule {
                    name: "strip_unsupported_parameters",
                    condition: Condition::Variant("self-hosted".to_string()),
                    action: Action::StripUnsupportedParameters(vec![
                        "tools".to_string(),
                        "tool_choice".to_string(),
                    ]),
                    priority: 60,
                    enabled: true,
                });
            }
            WireFamily::Gemini | WireFamily::Codewhisperer => {}
        }

        let mut applicable: Vec<Rule> = rules
            .into_iter()
            .filter(|rule| rule.enabled && rule.condition.matches(request, variant))
            .collect();
        applicable.sort_by(|a, b| b.priority.cmp(&a.priority));
        applicable
    }

    /// Apply rules in order, mutating the request in place.
    pub fn apply(
        &self,
        rules: &[Rule],
        request: &mut ChatRequest,
    ) -> GatewayResult<PreprocessOutcome> {
        let mut outcome = PreprocessOutcome::default();

        for rule in rules {
            let changed = apply_action(&rule.action, request, &mut outcome)?;
            if changed {
                debug!(rule = %rule.name, "Preprocessing rule applied");
                outcome.applied.push(rule.name);
            }
        }
        Ok(outcome)
    }
}

fn apply_action(
    action: &Action,
    request: &mut ChatRequest,
    outcome: &mut PreprocessOutcome,
) -> GatewayResult<bool> {
    match action {
        Action::MapModelName(map) => {
            if let Some(mapped) = map.get(&request.model) {
                request.model = mapped.clone();
                return Ok(true);
            }
            Ok(false)
        }
        Action::StripUnsupportedParameters(params) => {
            let mut changed = false;
            for param in params {
                match param.as_str() {
                    "tools" if request.tools.is_some() => {
                        request.tools = None;
                        changed = true;
                    }
                    "tool_choice" if request.tool_choice.is_some() => {
                        request.tool_choice = None;
                        changed = true;
                    }
                    _ => {}
                }
            }
            Ok(changed)
        }
        Action::AddMaxTokensDefault(default) => {
            if request.max_tokens.is_none() {
                request.max_tokens = Some(*default);
                return Ok(true);
            }
            Ok(false)
        }
        Action::ValidateRoles { strict } => {
            let mut changed = false;
            for message in &mut request.messages {
                if message.role == Role::Developer {
                    if *strict {
                        return Err(GatewayError::bad_request(
                            "role 'developer' is not supported by the target provider",
                        ));
                    }
                    message.role = Role::User;
                    outcome
                        .warnings
                        .push("converted 'developer' role to 'user'".to_string());
                    changed = true;
                }
            }
            Ok(changed)
        }
        Action::ConvertToolSchema => {
            let mut changed = false;
            if let Some(tools) = &mut request.tools {
                for tool in tools {
                    if let Some(unwrapped) = unwrap_function_schema(&tool.parameters) {
                        tool.parameters = unwrapped;
                        changed = true;
                    }
                }
            }
            Ok(changed)
        }
        Action::SetDefaultToolChoice => {
            if request.has_tools() && request.tool_choice.is_none() {
                request.tool_choice = Some(ToolChoice::Mode(ToolChoiceMode::Auto));
                return Ok(true);
            }
            Ok(false)
        }
        Action::StripToolsOnChoiceNone => {
            if matches!(
                request.tool_choice,
                Some(ToolChoice::Mode(ToolChoiceMode::None))
            ) && request.tools.is_some()
            {
                request.tools = None;
                request.tool_choice = None;
                return Ok(true);
            }
            Ok(false)
        }
    }
}

/// Unwrap `{type: "function", function: {parameters: …}}` wrappers that
/// leak in from function-style tool definitions.
fn unwrap_function_schema(parameters: &Value) -> Option<Value> {
    let obj = parameters.as_object()?;
    if obj.get("type").and_then(Value::as_str) != Some("function") {
        return None;
    }
    obj.get("function")
        .and_then(|f| f.get("parameters"))
        .cloned()
}

#[cfg(test)]
mod tests {
    use gateway_protocol::canonical::{Message, RequestMetadata, Tool};
    use serde_json::json;

    use super::*;

    fn request() -> ChatRequest {
        ChatRequest {
            id: "t1".to_string(),
            model: "claude-3-5-haiku".to_string(),
            messages: vec![Message::text(Role::User, "Hello")],
            tools: None,
            tool_choice: None,
            temperature: None,
            top_p: None,
            stop: None,
            max_tokens: None,
            stream: false,
            metadata: RequestMetadata::default(),
        }
    }

    fn selector() -> PreprocessorSelector {
        PreprocessorSelector::new(false, HashMap::new())
    }

    #[test]
    fn rules_sorted_by_priority_descending() {
        let mut req = request();
        req.tools = Some(vec![Tool {
            name: "lookup".to_string(),
            description: None,
            parameters: json!({"type": "object"}),
        }]);
        let rules = selector().select_rules(WireFamily::Anthropic, None, &req, Some(1024), None);
        let priorities: Vec<i32> = rules.iter().map(|r| r.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(priorities, sorted);
        assert!(rules.iter().any(|r| r.name == "add_max_tokens_default"));
    }

    #[test]
    fn developer_role_converted_with_warning() {
        let mut req = request();
        req.messages = vec![Message::text(Role::Developer, "instructions")];

        let sel = selector();
        let rules = sel.select_rules(WireFamily::Anthropic, None, &req, None, None);
        let outcome = sel.apply(&rules, &mut req).unwrap();

        assert_eq!(req.messages[0].role, Role::User);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.applied.contains(&"validate_roles"));
    }

    #[test]
    fn developer_role_rejected_in_strict_mode() {
        let mut req = request();
        req.messages = vec![Message::text(Role::Developer, "instructions")];

        let sel = PreprocessorSelector::new(true, HashMap::new());
        let rules = sel.select_rules(WireFamily::Anthropic, None, &req, None, None);
        let err = sel.apply(&rules, &mut req).unwrap_err();
        assert_eq!(err.kind_code(), "BadRequest");
    }

    #[test]
    fn strict_override_beats_config() {
        let mut req = request();
        req.messages = vec![Message::text(Role::Developer, "instructions")];

        let sel = selector();
        let rules = sel.select_rules(WireFamily::Anthropic, None, &req, None, Some(true));
        assert!(sel.apply(&rules, &mut req).is_err());
    }

    #[test]
    fn max_tokens_default_applied_only_when_missing() {
        let mut req = request();
        let sel = selector();
        let rules = sel.select_rules(WireFamily::Anthropic, None, &req, Some(1024), None);
        sel.apply(&rules, &mut req).unwrap();
        assert_eq!(req.max_tokens, Some(1024));

        let mut req = request();
        req.max_tokens = Some(5);
        let rules = sel.select_rules(WireFamily::Anthropic, None, &req, Some(1024), None);
        sel.apply(&rules, &mut req).unwrap();
        assert_eq!(req.max_tokens, Some(5));
    }

    #[test]
    fn strip_tools_on_choice_none_for_anthropic() {
        let mut req = request();
        req.tools = Some(vec![Tool {
            name: "lookup".to_string(),
            description: None,
            parameters: json!({"type": "object"}),
        }]);
        req.tool_choice = Some(ToolChoice::Mode(ToolChoiceMode::None));

        let sel = selector();
        let rules = sel.select_rules(WireFamily::Anthropic, None, &req, None, None);
        let outcome = sel.apply(&rules, &mut req).unwrap();
        assert!(req.tools.is_none());
        assert!(req.tool_choice.is_none());
        assert!(outcome.applied.contains(&"strip_tools_on_choice_none"));
    }

    #[test]
    fn openai_keeps_tools_on_choice_none() {
        let mut req = request();
        req.tools = Some(vec![Tool {
            name: "lookup".to_string(),
            description: None,
            parameters: json!({"type": "object"}),
        }]);
        req.tool_choice = Some(ToolChoice::Mode(ToolChoiceMode::None));

        let sel = selector();
        let rules = sel.select_rules(WireFamily::OpenAi, None, &req, None, None);
        sel.apply(&rules, &mut req).unwrap();
        assert!(req.tools.is_some());
        assert_eq!(
            req.tool_choice,
            Some(ToolChoice::Mode(ToolChoiceMode::None))
        );
    }

    #[test]
    fn self_hosted_variant_strips_tool_surface() {
        let mut req = request();
        req.tools = Some(vec![Tool {
            name: "lookup".to_string(),
            description: None,
            parameters: json!({"type": "object"}),
        }]);
        req.tool_choice = Some(ToolChoice::Mode(ToolChoiceMode::Auto));

        let sel = selector();
        let rules = sel.select_rules(
            WireFamily::OpenAi,
            Some("self-hosted"),
            &req,
            None,
            None,
        );
        sel.apply(&rules, &mut req).unwrap();
        assert!(req.tools.is_none());
        assert!(req.tool_choice.is_none());
    }

    #[test]
    fn model_map_rewrites_model_name() {
        let mut map = HashMap::new();
        map.insert(
            "claude-3-5-haiku".to_string(),
            "qwen2.5-7b".to_string(),
        );
        let sel = PreprocessorSelector::new(false, map);

        let mut req = request();
        let rules = sel.select_rules(WireFamily::OpenAi, None, &req, None, None);
        let outcome = sel.apply(&rules, &mut req).unwrap();
        assert_eq!(req.model, "qwen2.5-7b");
        assert!(outcome.applied.contains(&"map_model_name"));
    }

    #[test]
    fn default_tool_choice_set_for_openai() {
        let mut req = request();
        req.tools = Some(vec![Tool {
            name: "lookup".to_string(),
            description: None,
            parameters: json!({"type": "object"}),
        }]);

        let sel = selector();
        let rules = sel.select_rules(WireFamily::OpenAi, None, &req, None, None);
        sel.apply(&rules, &mut req).unwrap();
        assert_eq!(
            req.tool_choice,
            Some(ToolChoice::Mode(ToolChoiceMode::Auto))
        );
    }

    #[test]
    fn function_wrapped_schemas_are_unwrapped() {
        let mut req = request();
        req.tools = Some(vec![Tool {
            name: "lookup".to_string(),
            description: None,
            parameters: json!({
                "type": "function",
                "function": {
                    "name": "lookup",
                    "parameters": {"type": "object", "properties": {"q": {"type": "string"}}}
                }
            }),
        }]);

        let sel = selector();
        let rules = sel.select_rules(WireFamily::Anthropic, None, &req, None, None);
        sel.apply(&rules, &mut req).unwrap();
        assert_eq!(
            req.tools.as_ref().unwrap()[0].parameters,
            json!({"type": "object", "properties": {"q": {"type": "string"}}})
        );
    }
}
