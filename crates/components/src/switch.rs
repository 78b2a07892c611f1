//! Switch component — routes to different branches based on configurable
//! rules. First matching rule wins; optional `__other__` fallback.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ComponentError;
use crate::operators::{resolve_field, rule_matches, Rule};
use crate::state::{StateDelta, WorkflowState};
use crate::traits::{Component, ComponentContext, ComponentSpec};

pub struct Switch {
    rules: Vec<Rule>,
    enable_fallback: bool,
    condition_field: String,
    condition_expression: Option<String>,
}

impl Switch {
    pub fn from_spec(spec: &ComponentSpec) -> Result<Self, ComponentError> {
        let extra = &spec.config.extra;
        let rules = match extra.get("rules") {
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
                ComponentError::fatal(
                    crate::error::ErrorCode::Validation,
                    format!("invalid switch rules: {e}"),
                )
            })?,
            None => Vec::new(),
        };
        Ok(Self {
            rules,
            enable_fallback: extra
                .get("enable_fallback")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            condition_field: extra
                .get("condition_field")
                .and_then(Value::as_str)
                .unwrap_or("route")
                .to_string(),
            condition_expression: extra
                .get("condition_expression")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

#[async_trait]
impl Component for Switch {
    async fn run(
        &self,
        state: &WorkflowState,
        _ctx: &ComponentContext,
    ) -> Result<StateDelta, ComponentError> {
        let root = state.to_value();

        // Rule-based mode
        if !self.rules.is_empty() {
            let mut route = String::new();
            for rule in &self.rules {
                if rule_matches(rule, &root) {
                    route = rule.id.clone();
                    break;
                }
            }
            if route.is_empty() && self.enable_fallback {
                route = "__other__".to_string();
            }
            return Ok(StateDelta::with_route(route));
        }

        // Legacy mode: condition_field / condition_expression
        let route = match &self.condition_expression {
            Some(expr) => evaluate_expression(expr, &root),
            None => value_to_route(resolve_field(&self.condition_field, &root)),
        };
        Ok(StateDelta::with_route(route))
    }
}

/// Evaluate a simple condition expression against state.
///
/// Supports field references (`state.node_outputs.cat.category`) and
/// equality checks (`state.route == 'chat'`, yielding the right-hand value
/// on match, empty otherwise).
pub(crate) fn evaluate_expression(expression: &str, root: &Value) -> String {
    let Some((left, right)) = expression.split_once("==") else {
        return value_to_route(resolve_field(expression.trim(), root));
    };
    let left_val = value_to_route(resolve_field(left.trim(), root));
    let right_val = right.trim().trim_matches(|c| c == '\'' || c == '"');
    if left_val == right_val {
        right_val.to_string()
    } else {
        String::new()
    }
}

pub(crate) fn value_to_route(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ComponentConfig;
    use serde_json::json;

    fn spec(extra: Value) -> ComponentSpec {
        ComponentSpec {
            node_id: "switch".into(),
            component_type: "switch".into(),
            config: ComponentConfig {
                component_type: "switch".into(),
                system_prompt: String::new(),
                extra,
            },
            ..Default::default()
        }
    }

    fn state_with_route(route: &str) -> WorkflowState {
        let mut state = WorkflowState::initial("e", json!({}));
        state.route = route.into();
        state
    }

    #[tokio::test]
    async fn first_matching_rule_wins() {
        let switch = Switch::from_spec(&spec(json!({
            "rules": [
                {"id": "chat", "field": "route", "operator": "equals", "value": "chat"},
                {"id": "anything", "field": "route", "operator": "is_not_empty", "value": null}
            ]
        })))
        .unwrap();

        let delta = switch
            .run(&state_with_route("chat"), &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        assert_eq!(delta.route.as_deref(), Some("chat"));
    }

    #[tokio::test]
    async fn fallback_routes_to_other() {
        let switch = Switch::from_spec(&spec(json!({
            "rules": [{"id": "chat", "field": "route", "operator": "equals", "value": "chat"}],
            "enable_fallback": true
        })))
        .unwrap();

        let delta = switch
            .run(&state_with_route("search"), &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        assert_eq!(delta.route.as_deref(), Some("__other__"));
    }

    #[tokio::test]
    async fn no_fallback_yields_empty_route() {
        let switch = Switch::from_spec(&spec(json!({
            "rules": [{"id": "chat", "field": "route", "operator": "equals", "value": "chat"}]
        })))
        .unwrap();

        let delta = switch
            .run(&state_with_route("search"), &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        assert_eq!(delta.route.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn legacy_expression_equality() {
        let switch = Switch::from_spec(&spec(json!({
            "condition_expression": "state.route == 'chat'"
        })))
        .unwrap();

        let delta = switch
            .run(&state_with_route("chat"), &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        assert_eq!(delta.route.as_deref(), Some("chat"));

        let delta = switch
            .run(&state_with_route("nope"), &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        assert_eq!(delta.route.as_deref(), Some(""));
    }
}
