//! Standalone tool components — calculator, datetime, web_search as
//! executable DAG nodes (as opposed to their tool-bundle form bound into
//! an agent).

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::builtin_tools::{evaluate_arithmetic, web_search};
use crate::error::ComponentError;
use crate::state::{StateDelta, WorkflowState};
use crate::traits::{Component, ComponentContext, ComponentSpec};

/// Pull a string setting from config, falling back to the trigger payload.
fn setting<'a>(spec_extra: &'a Value, state: &'a WorkflowState, key: &str) -> Option<&'a str> {
    spec_extra
        .get(key)
        .and_then(Value::as_str)
        .or_else(|| state.trigger.get(key).and_then(Value::as_str))
}

// ---------------------------------------------------------------------------
// calculator
// ---------------------------------------------------------------------------

pub struct Calculator {
    node_id: String,
    extra: Value,
}

impl Calculator {
    pub fn from_spec(spec: &ComponentSpec) -> Self {
        Self {
            node_id: spec.node_id.clone(),
            extra: spec.config.extra.clone(),
        }
    }
}

#[async_trait]
impl Component for Calculator {
    async fn run(
        &self,
        state: &WorkflowState,
        _ctx: &ComponentContext,
    ) -> Result<StateDelta, ComponentError> {
        let expression = setting(&self.extra, state, "expression").unwrap_or("");
        let result = evaluate_arithmetic(expression)?;
        Ok(StateDelta::with_node_output(
            &self.node_id,
            json!({"expression": expression, "result": result}),
        ))
    }
}

// ---------------------------------------------------------------------------
// datetime
// ---------------------------------------------------------------------------

pub struct DatetimeNow {
    node_id: String,
}

impl DatetimeNow {
    pub fn from_spec(spec: &ComponentSpec) -> Self {
        Self {
            node_id: spec.node_id.clone(),
        }
    }
}

#[async_trait]
impl Component for DatetimeNow {
    async fn run(
        &self,
        _state: &WorkflowState,
        _ctx: &ComponentContext,
    ) -> Result<StateDelta, ComponentError> {
        let now = Utc::now();
        Ok(StateDelta::with_node_output(
            &self.node_id,
            json!({"iso": now.to_rfc3339(), "unix": now.timestamp()}),
        ))
    }
}

// ---------------------------------------------------------------------------
// web_search
// ---------------------------------------------------------------------------

pub struct WebSearch {
    node_id: String,
    extra: Value,
}

impl WebSearch {
    pub fn from_spec(spec: &ComponentSpec) -> Self {
        Self {
            node_id: spec.node_id.clone(),
            extra: spec.config.extra.clone(),
        }
    }
}

#[async_trait]
impl Component for WebSearch {
    async fn run(
        &self,
        state: &WorkflowState,
        ctx: &ComponentContext,
    ) -> Result<StateDelta, ComponentError> {
        let query = setting(&self.extra, state, "query")
            .or_else(|| state.trigger.get("text").and_then(Value::as_str))
            .unwrap_or("");
        let results = web_search(&ctx.http, query).await?;
        Ok(StateDelta::with_node_output(&self.node_id, results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ComponentConfig;

    #[tokio::test]
    async fn calculator_node_reads_expression_from_trigger() {
        let calc = Calculator::from_spec(&ComponentSpec {
            node_id: "calc".into(),
            component_type: "calculator".into(),
            config: ComponentConfig::default(),
            ..Default::default()
        });
        let state = WorkflowState::initial("e", json!({"expression": "2+2"}));
        let delta = calc
            .run(&state, &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        assert_eq!(delta.node_outputs["calc"]["result"], json!(4.0));
    }

    #[tokio::test]
    async fn datetime_node_emits_iso_timestamp() {
        let dt = DatetimeNow::from_spec(&ComponentSpec {
            node_id: "now".into(),
            component_type: "datetime".into(),
            config: ComponentConfig::default(),
            ..Default::default()
        });
        let delta = dt
            .run(
                &WorkflowState::initial("e", json!({})),
                &ComponentContext::for_tests_no_llm(),
            )
            .await
            .unwrap();
        assert!(delta.node_outputs["now"]["iso"].as_str().unwrap().contains('T'));
    }
}
