//! Human confirmation component — reads the resume input provided after the
//! orchestrator interrupted the execution.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::ComponentError;
use crate::state::{StateDelta, WorkflowState};
use crate::traits::{Component, ComponentContext, ComponentSpec};

pub const DEFAULT_PROMPT: &str = "Please confirm to proceed.";

pub struct HumanConfirmation {
    node_id: String,
    prompt: String,
}

impl HumanConfirmation {
    pub fn from_spec(spec: &ComponentSpec) -> Self {
        Self {
            node_id: spec.node_id.clone(),
            prompt: spec
                .config
                .extra
                .get("prompt")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_PROMPT)
                .to_string(),
        }
    }

    /// The prompt shown on the confirmation ticket.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

#[async_trait]
impl Component for HumanConfirmation {
    async fn run(
        &self,
        state: &WorkflowState,
        _ctx: &ComponentContext,
    ) -> Result<StateDelta, ComponentError> {
        // Without a resume input the orchestrator should have interrupted
        // before this node; reaching here anyway counts as unconfirmed.
        let Some(user_response) = &state.resume_input else {
            let mut delta = StateDelta::with_route("cancelled");
            delta.node_outputs.insert(
                self.node_id.clone(),
                json!({
                    "confirmed": false,
                    "user_response": null,
                    "prompt": self.prompt,
                }),
            );
            return Ok(delta);
        };

        let response_text = match user_response {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let confirmed = matches!(
            response_text.trim().to_lowercase().as_str(),
            "yes" | "confirm" | "true" | "y" | "1"
        );

        let mut delta =
            StateDelta::with_route(if confirmed { "confirmed" } else { "cancelled" });
        delta.node_outputs.insert(
            self.node_id.clone(),
            json!({
                "confirmed": confirmed,
                "user_response": response_text,
            }),
        );
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ComponentConfig;

    fn component() -> HumanConfirmation {
        HumanConfirmation::from_spec(&ComponentSpec {
            node_id: "confirm".into(),
            component_type: "human_confirmation".into(),
            config: ComponentConfig {
                component_type: "human_confirmation".into(),
                system_prompt: String::new(),
                extra: json!({"prompt": "Deploy to production?"}),
            },
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn affirmative_responses_confirm() {
        for answer in ["yes", "Confirm", "TRUE", "y", "1"] {
            let mut state = WorkflowState::initial("e", json!({}));
            state.resume_input = Some(json!(answer));
            let delta = component()
                .run(&state, &ComponentContext::for_tests_no_llm())
                .await
                .unwrap();
            assert_eq!(delta.route.as_deref(), Some("confirmed"), "answer={answer}");
            assert_eq!(delta.node_outputs["confirm"]["confirmed"], json!(true));
        }
    }

    #[tokio::test]
    async fn anything_else_cancels() {
        let mut state = WorkflowState::initial("e", json!({}));
        state.resume_input = Some(json!("no way"));
        let delta = component()
            .run(&state, &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        assert_eq!(delta.route.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn missing_resume_input_is_unconfirmed() {
        let state = WorkflowState::initial("e", json!({}));
        let delta = component()
            .run(&state, &ComponentContext::for_tests_no_llm())
            .await
            .unwrap();
        assert_eq!(delta.route.as_deref(), Some("cancelled"));
        assert_eq!(
            delta.node_outputs["confirm"]["prompt"],
            json!("Deploy to production?")
        );
    }
}
