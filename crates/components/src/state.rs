//! Workflow execution state: the fixed-key state map, merge semantics, and
//! the message representation shared by every LLM-backed component.
//!
//! State persistence round-trips through serde: every transition must
//! satisfy `deserialize(serialize(s)) == s`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::usage::TokenUsage;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Conversation roles. `Tool` messages carry a tool-call result back to the
/// model and reference the originating call via `tool_call_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    Human,
    Ai,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One conversation message in dict form (role, content, tool_calls,
/// usage_metadata) — the shape that goes to the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<TokenUsage>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::plain(Role::Human, content)
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::plain(Role::Ai, content)
    }

    /// A tool-result message answering the given call id.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            usage_metadata: None,
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            usage_metadata: None,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowState
// ---------------------------------------------------------------------------

/// The accumulated state of one execution. Fixed key set; unknown keys do
/// not survive a round-trip and must not be invented by components.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Per-node named outputs, addressable by downstream nodes.
    #[serde(default)]
    pub node_outputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub trigger: Value,
    #[serde(default)]
    pub user_context: Value,
    #[serde(default)]
    pub current_node: String,
    #[serde(default)]
    pub execution_id: String,
    /// Conditional-branch selector consumed by the next switch/router.
    #[serde(default)]
    pub route: String,
    #[serde(default)]
    pub branch_results: BTreeMap<String, Value>,
    #[serde(default)]
    pub plan: Vec<Value>,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub loop_state: Value,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub should_retry: bool,
    /// Present on the first invocation after a resume; consumed by the
    /// resumed node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_input: Option<Value>,
}

impl WorkflowState {
    /// Initial state for a fresh execution.
    pub fn initial(execution_id: impl Into<String>, trigger: Value) -> Self {
        Self {
            execution_id: execution_id.into(),
            trigger,
            ..Default::default()
        }
    }

    /// View of the state as a JSON value, used by dotted-path field
    /// resolution in rule operators and expression contexts.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// StateDelta — what a component returns
// ---------------------------------------------------------------------------

/// Signal from a `loop` node: launch the body once per item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSignal {
    pub items: Vec<Value>,
}

/// One child task submitted through `spawn_and_await` or a sub-workflow node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnTask {
    pub workflow_slug: String,
    pub input_text: String,
}

/// Payload surfaced when a component needs the orchestrator to suspend the
/// execution instead of proceeding to successors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InterruptPayload {
    /// Agent invoked the spawn_and_await tool mid-loop.
    SpawnAndAwait {
        tool_call_id: String,
        tasks: Vec<SpawnTask>,
    },
    /// A `workflow` node wants a single child run; the parent resumes with
    /// the child's final output as this node's output.
    Subworkflow { task: SpawnTask },
}

/// The delta a component hands back to the orchestrator. Reserved keys and
/// their merge semantics follow the state-merge rules: `messages` append,
/// `node_outputs` shallow-merge, the rest overwrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_outputs: BTreeMap<String, Value>,
    #[serde(rename = "_route", default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(
        rename = "_token_usage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub token_usage: Option<TokenUsage>,
    #[serde(
        rename = "_delay_seconds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub delay_seconds: Option<f64>,
    #[serde(rename = "_loop", default, skip_serializing_if = "Option::is_none")]
    pub loop_signal: Option<LoopSignal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_retry: Option<bool>,
    /// Not merged into state; consumed by the orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<InterruptPayload>,
    /// Overwrites `branch_results` entries (keyed by branch name).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub branch_results: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_state: Option<Value>,
}

impl StateDelta {
    /// Delta carrying a single node output.
    pub fn with_node_output(node_id: &str, output: Value) -> Self {
        let mut delta = Self::default();
        delta.node_outputs.insert(node_id.to_string(), output);
        delta
    }

    /// Delta that only selects a route.
    pub fn with_route(route: impl Into<String>) -> Self {
        Self {
            route: Some(route.into()),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge a component's delta into the accumulated state.
///
/// Merge semantics:
/// - `messages` → append
/// - `node_outputs` → shallow dict merge, later entries win per node_id
/// - everything else present in the delta → overwrite
pub fn merge_state(state: &mut WorkflowState, delta: &StateDelta) {
    state.messages.extend(delta.messages.iter().cloned());
    for (node_id, output) in &delta.node_outputs {
        state.node_outputs.insert(node_id.clone(), output.clone());
    }
    if let Some(route) = &delta.route {
        state.route = route.clone();
    }
    if let Some(output) = &delta.output {
        state.output = output.clone();
    }
    if let Some(error) = &delta.error {
        state.error = error.clone();
    }
    if let Some(should_retry) = delta.should_retry {
        state.should_retry = should_retry;
    }
    if let Some(loop_state) = &delta.loop_state {
        state.loop_state = loop_state.clone();
    }
    for (branch, value) in &delta.branch_results {
        state.branch_results.insert(branch.clone(), value.clone());
    }
    // A consumed resume input never survives past the node that read it.
    state.resume_input = None;
}

/// Serialise state for the durable store.
pub fn serialize_state(state: &WorkflowState) -> Value {
    serde_json::to_value(state).unwrap_or(Value::Null)
}

/// Deserialise state from the durable store. Unknown fields are rejected-by
/// -omission; missing fields default.
pub fn deserialize_state(value: &Value) -> Result<WorkflowState, serde_json::Error> {
    serde_json::from_value(value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_state() -> WorkflowState {
        let mut state = WorkflowState::initial("exec-1", json!({"text": "hi"}));
        state.messages.push(Message::system("be helpful"));
        state.messages.push(Message::human("hi"));
        let mut ai = Message::ai("calling tool");
        ai.tool_calls.push(ToolCall {
            id: "call_1".into(),
            name: "calculator".into(),
            arguments: json!({"expression": "2+2"}),
        });
        ai.usage_metadata = Some(TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
            ..Default::default()
        });
        state.messages.push(ai);
        state.messages.push(Message::tool_result("call_1", "4"));
        state.node_outputs.insert("a".into(), json!({"output": 5}));
        state.route = "chat".into();
        state
    }

    #[test]
    fn serialization_round_trips() {
        let state = sample_state();
        let value = serialize_state(&state);
        let back = deserialize_state(&value).expect("deserializes");
        assert_eq!(back, state);
    }

    #[test]
    fn merge_appends_messages_and_merges_node_outputs() {
        let mut state = sample_state();
        let before_len = state.messages.len();

        let mut delta = StateDelta::default();
        delta.messages.push(Message::ai("done"));
        delta.node_outputs.insert("a".into(), json!({"output": 6}));
        delta.node_outputs.insert("b".into(), json!({"output": 7}));
        delta.route = Some("search".into());

        merge_state(&mut state, &delta);

        assert_eq!(state.messages.len(), before_len + 1);
        assert_eq!(state.node_outputs["a"], json!({"output": 6}));
        assert_eq!(state.node_outputs["b"], json!({"output": 7}));
        assert_eq!(state.route, "search");
    }

    #[test]
    fn merge_consumes_resume_input() {
        let mut state = sample_state();
        state.resume_input = Some(json!("yes"));
        merge_state(&mut state, &StateDelta::default());
        assert!(state.resume_input.is_none());
    }

    #[test]
    fn absent_delta_fields_do_not_overwrite() {
        let mut state = sample_state();
        merge_state(&mut state, &StateDelta::default());
        assert_eq!(state.route, "chat");
        assert_eq!(state.output, Value::Null);
    }

    #[test]
    fn delta_serialises_with_reserved_key_names() {
        let delta = StateDelta {
            route: Some("chat".into()),
            delay_seconds: Some(2.0),
            ..Default::default()
        };
        let value = serde_json::to_value(&delta).unwrap();
        assert_eq!(value["_route"], "chat");
        assert_eq!(value["_delay_seconds"], 2.0);
    }
}
