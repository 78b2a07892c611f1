//! Sub-workflow component — spawns a child execution and suspends the
//! parent until the child terminates.
//!
//! On resume the orchestrator has placed the child's final output in
//! `state.resume_input`; that becomes this node's output.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{ComponentError, ErrorCode};
use crate::state::{InterruptPayload, SpawnTask, StateDelta, WorkflowState};
use crate::traits::{Component, ComponentContext, ComponentSpec};

pub struct Subworkflow {
    node_id: String,
    workflow_slug: Option<String>,
    input_template: Option<String>,
}

impl Subworkflow {
    pub fn from_spec(spec: &ComponentSpec) -> Self {
        Self {
            node_id: spec.node_id.clone(),
            workflow_slug: spec.subworkflow_slug.clone().or_else(|| {
                spec.config
                    .extra
                    .get("workflow_slug")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            }),
            input_template: spec
                .config
                .extra
                .get("input")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

#[async_trait]
impl Component for Subworkflow {
    async fn run(
        &self,
        state: &WorkflowState,
        _ctx: &ComponentContext,
    ) -> Result<StateDelta, ComponentError> {
        // Second invocation: the orchestrator resumed us with the child's
        // final output.
        if let Some(child_output) = &state.resume_input {
            return Ok(StateDelta {
                output: Some(child_output.clone()),
                ..StateDelta::with_node_output(
                    &self.node_id,
                    json!({"output": child_output}),
                )
            });
        }

        let Some(slug) = &self.workflow_slug else {
            return Err(ComponentError::fatal(
                ErrorCode::Validation,
                "workflow node has no subworkflow configured",
            ));
        };

        // Resolved input (expressions already substituted by the engine);
        // defaults to the current node input text from the trigger.
        let input_text = self
            .input_template
            .clone()
            .or_else(|| {
                state
                    .trigger
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_default();

        Ok(StateDelta {
            interrupt: Some(InterruptPayload::Subworkflow {
                task: SpawnTask {
                    workflow_slug: slug.clone(),
                    input_text,
                },
            }),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ComponentConfig;

    fn component(slug: Option<&str>) -> Subworkflow {
        Subworkflow::from_spec(&ComponentSpec {
            node_id: "sub".into(),
            component_type: "workflow".into(),
            config: ComponentConfig {
                component_type: "workflow".into(),
                system_prompt: String::new(),
                extra: json!({"input": "analyze this"}),
            },
            subworkflow_slug: slug.map(str::to_string),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn first_run_raises_subworkflow_interrupt() {
        let state = WorkflowState::initial("e", json!({}));
        let delta = component(Some("child-flow"))
            .run(&state, &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        match delta.interrupt.unwrap() {
            InterruptPayload::Subworkflow { task } => {
                assert_eq!(task.workflow_slug, "child-flow");
                assert_eq!(task.input_text, "analyze this");
            }
            other => panic!("unexpected interrupt: {other:?}"),
        }
    }

    #[tokio::test]
    async fn resume_passes_child_output_through() {
        let mut state = WorkflowState::initial("e", json!({}));
        state.resume_input = Some(json!({"answer": 42}));
        let delta = component(Some("child-flow"))
            .run(&state, &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        assert!(delta.interrupt.is_none());
        assert_eq!(delta.output, Some(json!({"answer": 42})));
        assert_eq!(delta.node_outputs["sub"]["output"], json!({"answer": 42}));
    }

    #[tokio::test]
    async fn missing_slug_is_fatal() {
        let state = WorkflowState::initial("e", json!({}));
        let err = component(None)
            .run(&state, &ComponentContext::for_tests_no_llm())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
