//! Router component — routes on a state field or a simple condition
//! expression. The rule-based sibling is [`crate::switch::Switch`].

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ComponentError;
use crate::operators::resolve_field;
use crate::state::{StateDelta, WorkflowState};
use crate::switch::{evaluate_expression, value_to_route};
use crate::traits::{Component, ComponentContext, ComponentSpec};

pub struct Router {
    condition_field: String,
    condition_expression: Option<String>,
}

impl Router {
    pub fn from_spec(spec: &ComponentSpec) -> Self {
        let extra = &spec.config.extra;
        Self {
            condition_field: extra
                .get("condition_field")
                .and_then(Value::as_str)
                .unwrap_or("route")
                .to_string(),
            condition_expression: extra
                .get("condition_expression")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

#[async_trait]
impl Component for Router {
    async fn run(
        &self,
        state: &WorkflowState,
        _ctx: &ComponentContext,
    ) -> Result<StateDelta, ComponentError> {
        let root = state.to_value();
        let route = match &self.condition_expression {
            Some(expr) => evaluate_expression(expr, &root),
            None => value_to_route(resolve_field(&self.condition_field, &root)),
        };
        Ok(StateDelta::with_route(route))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ComponentConfig;
    use serde_json::json;

    #[tokio::test]
    async fn routes_on_dotted_field() {
        let spec = ComponentSpec {
            node_id: "r".into(),
            component_type: "router".into(),
            config: ComponentConfig {
                component_type: "router".into(),
                system_prompt: String::new(),
                extra: json!({"condition_field": "node_outputs.cat.category"}),
            },
            ..Default::default()
        };
        let router = Router::from_spec(&spec);

        let mut state = WorkflowState::initial("e", json!({}));
        state
            .node_outputs
            .insert("cat".into(), json!({"category": "search"}));

        let delta = router
            .run(&state, &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        assert_eq!(delta.route.as_deref(), Some("search"));
    }
}
