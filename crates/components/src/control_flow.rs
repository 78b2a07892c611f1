//! Control flow components — loop and wait.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::ComponentError;
use crate::state::{LoopSignal, StateDelta, WorkflowState};
use crate::traits::{Component, ComponentContext, ComponentSpec};

// ---------------------------------------------------------------------------
// loop
// ---------------------------------------------------------------------------

/// Reads a source list from `state.node_outputs[source_node][field]` and
/// signals the orchestrator to launch the loop body once per item.
pub struct Loop {
    node_id: String,
    source_node: Option<String>,
    field: String,
}

impl Loop {
    pub fn from_spec(spec: &ComponentSpec) -> Self {
        let extra = &spec.config.extra;
        Self {
            node_id: spec.node_id.clone(),
            source_node: extra
                .get("source_node")
                .and_then(Value::as_str)
                .map(str::to_string),
            field: extra
                .get("field")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
        }
    }
}

#[async_trait]
impl Component for Loop {
    async fn run(
        &self,
        state: &WorkflowState,
        _ctx: &ComponentContext,
    ) -> Result<StateDelta, ComponentError> {
        let mut data: Option<Value> = None;
        if let Some(source) = &self.source_node {
            let source_output = state.node_outputs.get(source);
            data = match source_output {
                Some(output) if !self.field.is_empty() => {
                    output.get(&self.field).cloned().or(Some(Value::Null))
                }
                Some(output) => Some(output.clone()),
                None => None,
            };
        }

        let items = match data {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(single) => vec![single],
        };

        let mut delta = StateDelta {
            loop_signal: Some(LoopSignal {
                items: items.clone(),
            }),
            loop_state: Some(json!({"items": items, "results": []})),
            ..Default::default()
        };
        delta
            .node_outputs
            .insert(self.node_id.clone(), json!({"items": items}));
        Ok(delta)
    }
}

// ---------------------------------------------------------------------------
// wait
// ---------------------------------------------------------------------------

/// Delays downstream execution by a configured duration.
pub struct Wait {
    delay_seconds: f64,
    duration: f64,
    unit: String,
}

impl Wait {
    pub fn from_spec(spec: &ComponentSpec) -> Self {
        let extra = &spec.config.extra;
        let duration = extra
            .get("duration")
            .and_then(Value::as_f64)
            .or_else(|| {
                extra
                    .get("duration")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok())
            })
            .unwrap_or(0.0);
        let unit = extra
            .get("unit")
            .and_then(Value::as_str)
            .unwrap_or("seconds")
            .to_string();
        let multiplier = match unit.as_str() {
            "minutes" => 60.0,
            "hours" => 3600.0,
            _ => 1.0,
        };
        Self {
            delay_seconds: duration * multiplier,
            duration,
            unit,
        }
    }
}

#[async_trait]
impl Component for Wait {
    async fn run(
        &self,
        _state: &WorkflowState,
        _ctx: &ComponentContext,
    ) -> Result<StateDelta, ComponentError> {
        Ok(StateDelta {
            delay_seconds: Some(self.delay_seconds),
            output: Some(json!(format!("Waited {} {}", self.duration, self.unit))),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ComponentConfig;

    fn spec(component_type: &str, extra: Value) -> ComponentSpec {
        ComponentSpec {
            node_id: "n".into(),
            component_type: component_type.into(),
            config: ComponentConfig {
                component_type: component_type.into(),
                system_prompt: String::new(),
                extra,
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn loop_extracts_source_list() {
        let looper = Loop::from_spec(&spec(
            "loop",
            json!({"source_node": "fetch", "field": "items"}),
        ));
        let mut state = WorkflowState::initial("e", json!({}));
        state
            .node_outputs
            .insert("fetch".into(), json!({"items": [1, 2, 3]}));

        let delta = looper
            .run(&state, &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        let signal = delta.loop_signal.unwrap();
        assert_eq!(signal.items, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn loop_wraps_scalar_in_single_item_list() {
        let looper = Loop::from_spec(&spec("loop", json!({"source_node": "fetch"})));
        let mut state = WorkflowState::initial("e", json!({}));
        state.node_outputs.insert("fetch".into(), json!("only"));

        let delta = looper
            .run(&state, &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        assert_eq!(delta.loop_signal.unwrap().items, vec![json!("only")]);
    }

    #[tokio::test]
    async fn loop_with_missing_source_yields_empty() {
        let looper = Loop::from_spec(&spec("loop", json!({"source_node": "ghost"})));
        let state = WorkflowState::initial("e", json!({}));
        let delta = looper
            .run(&state, &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        assert!(delta.loop_signal.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn wait_converts_units_to_seconds() {
        let wait = Wait::from_spec(&spec("wait", json!({"duration": 2, "unit": "minutes"})));
        let delta = wait
            .run(
                &WorkflowState::initial("e", json!({})),
                &ComponentContext::for_tests_no_llm(),
            )
            .await
            .unwrap();
        assert_eq!(delta.delay_seconds, Some(120.0));
    }
}
