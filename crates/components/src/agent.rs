//! Agent component — the LLM tool-calling loop.
//!
//! The agent assembles its system prompt, the trimmed conversation history,
//! and the tools discovered via `tool`-labelled edges, then iterates:
//! call the model, execute any requested tools, feed results back, until
//! the model answers without tool calls or the iteration cap is hit.
//!
//! Tool calls run sequentially within one turn. `spawn_and_await` is the
//! exception: instead of executing, the agent checkpoints the conversation
//! with the pending call and surfaces a spawn interrupt; the orchestrator
//! resumes it later with the ordered child results as the tool's return
//! value.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::builtin_tools::execute_builtin_tool;
use crate::context::trim_messages_for_model;
use crate::error::{ComponentError, ErrorCode};
use crate::llm::{ChatRequest, ModelConfig};
use crate::output_parser::parse_output;
use crate::state::{
    InterruptPayload, Message, Role, SpawnTask, StateDelta, ToolCall, WorkflowState,
};
use crate::tool_node::{ToolBinding, ToolKind};
use crate::traits::{Component, ComponentContext, ComponentSpec, ToolActivity};
use crate::usage::TokenUsage;

const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Snapshot of the tool loop persisted between interruptions, keyed by
/// `thread_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AgentCheckpoint {
    messages: Vec<Message>,
    /// Set while a spawn_and_await call is waiting on child executions.
    pending_tool_call: Option<ToolCall>,
}

pub struct Agent {
    node_id: String,
    model: ModelConfig,
    system_prompt: String,
    tools: Vec<ToolBinding>,
    output_parser: Option<(String, Option<String>)>,
    max_iterations: usize,
}

impl Agent {
    pub fn from_spec(spec: &ComponentSpec) -> Result<Self, ComponentError> {
        let model = spec.model.clone().ok_or_else(|| {
            ComponentError::fatal(
                ErrorCode::Validation,
                format!("agent node '{}' has no model attached", spec.node_id),
            )
        })?;
        let output_parser = spec.output_parser.as_ref().map(|parser| {
            (
                parser
                    .extra
                    .get("format")
                    .and_then(Value::as_str)
                    .unwrap_or("json")
                    .to_string(),
                parser
                    .extra
                    .get("pattern")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            )
        });
        Ok(Self {
            node_id: spec.node_id.clone(),
            model,
            system_prompt: spec.config.system_prompt.clone(),
            tools: spec.tools.clone(),
            output_parser,
            max_iterations: spec
                .config
                .extra
                .get("max_iterations")
                .and_then(Value::as_u64)
                .map(|n| n as usize)
                .unwrap_or(DEFAULT_MAX_ITERATIONS),
        })
    }

    fn binding_for(&self, tool_name: &str) -> Option<&ToolBinding> {
        self.tools.iter().find(|b| b.def.name == tool_name)
    }

    async fn load_checkpoint(&self, ctx: &ComponentContext) -> Option<AgentCheckpoint> {
        let data = ctx.checkpoints.load(&ctx.thread_id).await.ok()??;
        serde_json::from_slice(&data).ok()
    }

    async fn save_checkpoint(
        &self,
        ctx: &ComponentContext,
        checkpoint: &AgentCheckpoint,
    ) -> Result<(), ComponentError> {
        let data = serde_json::to_vec(checkpoint).map_err(|e| {
            ComponentError::fatal(ErrorCode::Unrecoverable, format!("checkpoint encode: {e}"))
        })?;
        ctx.checkpoints
            .save(&ctx.thread_id, &data)
            .await
            .map_err(|e| ComponentError::retryable(ErrorCode::ExecutionError, e.to_string()))
    }

    /// Initial conversation: system prompt, prior history, and a human turn
    /// synthesised from the trigger when the history lacks one.
    fn seed_conversation(&self, state: &WorkflowState) -> Vec<Message> {
        let mut convo = Vec::new();
        if !self.system_prompt.is_empty() {
            convo.push(Message::system(&self.system_prompt));
        }
        convo.extend(
            state
                .messages
                .iter()
                .filter(|m| m.role != Role::System)
                .cloned(),
        );
        if !convo.iter().any(|m| m.role == Role::Human) {
            let text = state
                .trigger
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or("");
            convo.push(Message::human(text));
        }
        convo
    }

    /// Validate spawn_and_await arguments into tasks.
    fn parse_spawn_tasks(arguments: &Value) -> Result<Vec<SpawnTask>, String> {
        let Some(raw_tasks) = arguments.get("tasks").and_then(Value::as_array) else {
            return Err("tasks list cannot be empty".to_string());
        };
        if raw_tasks.is_empty() {
            return Err("tasks list cannot be empty".to_string());
        }
        let mut tasks = Vec::with_capacity(raw_tasks.len());
        for (idx, raw) in raw_tasks.iter().enumerate() {
            let Some(obj) = raw.as_object() else {
                return Err(format!("Task {idx} must be an object"));
            };
            let Some(slug) = obj.get("workflow_slug").and_then(Value::as_str) else {
                return Err(format!("Task {idx} missing required field 'workflow_slug'"));
            };
            tasks.push(SpawnTask {
                workflow_slug: slug.to_string(),
                input_text: obj
                    .get("input_text")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
            });
        }
        Ok(tasks)
    }
}

#[async_trait]
impl Component for Agent {
    async fn run(
        &self,
        state: &WorkflowState,
        ctx: &ComponentContext,
    ) -> Result<StateDelta, ComponentError> {
        let mut usage = TokenUsage::default();
        let checkpoint = self.load_checkpoint(ctx).await;

        // Resume path: a spawn interrupt left a pending tool call; the
        // orchestrator re-ran us with the child results as resume input.
        let (mut convo, baseline) = match (checkpoint, &state.resume_input) {
            (Some(cp), Some(resume)) if cp.pending_tool_call.is_some() => {
                let pending = cp.pending_tool_call.unwrap();
                let mut convo = cp.messages;
                let result_text = if let Some(err) = resume.get("_error").and_then(Value::as_str) {
                    format!("Spawn failed: {err}")
                } else if let Value::String(s) = resume {
                    s.clone()
                } else {
                    resume.to_string()
                };
                convo.push(Message::tool_result(pending.id, result_text));
                let baseline = convo.len();
                (convo, baseline)
            }
            _ => {
                let convo = self.seed_conversation(state);
                let baseline = convo.len();
                (convo, baseline)
            }
        };

        let tool_defs: Vec<_> = self.tools.iter().map(|b| b.def.clone()).collect();
        let mut final_content = String::new();

        for iteration in 1..=self.max_iterations {
            let trimmed = trim_messages_for_model(
                &convo,
                &self.model.model_name,
                self.model.max_tokens.map(|t| t as usize),
                None,
            );
            debug!(
                node_id = %self.node_id,
                iteration,
                messages = trimmed.len(),
                "agent LLM call"
            );

            let response = ctx
                .llm
                .chat(ChatRequest {
                    model: self.model.clone(),
                    messages: trimmed,
                    tools: tool_defs.clone(),
                })
                .await
                .map_err(|e| ComponentError::provider(e.to_string()))?;

            let provider_usage = response.usage.unwrap_or_default();
            let call_usage = TokenUsage::for_call(
                &self.model.model_name,
                provider_usage.input_tokens,
                provider_usage.output_tokens,
            );
            usage.fold(call_usage);

            let mut ai_message = response.message.clone();
            ai_message.usage_metadata = Some(call_usage);
            let tool_calls = ai_message.tool_calls.clone();
            convo.push(ai_message);

            if tool_calls.is_empty() {
                final_content = response.message.content;
                break;
            }

            for call in tool_calls {
                let Some(binding) = self.binding_for(&call.name) else {
                    convo.push(Message::tool_result(
                        call.id.clone(),
                        format!("Error: unknown tool '{}'", call.name),
                    ));
                    continue;
                };

                if binding.kind == ToolKind::SpawnAndAwait {
                    match Self::parse_spawn_tasks(&call.arguments) {
                        Ok(tasks) => {
                            self.save_checkpoint(
                                ctx,
                                &AgentCheckpoint {
                                    messages: convo.clone(),
                                    pending_tool_call: Some(call.clone()),
                                },
                            )
                            .await?;
                            let mut delta = StateDelta {
                                messages: convo[baseline..].to_vec(),
                                token_usage: Some(usage),
                                interrupt: Some(InterruptPayload::SpawnAndAwait {
                                    tool_call_id: call.id.clone(),
                                    tasks,
                                }),
                                ..Default::default()
                            };
                            delta.node_outputs.insert(
                                self.node_id.clone(),
                                json!({"status": "awaiting_children"}),
                            );
                            return Ok(delta);
                        }
                        Err(reason) => {
                            convo.push(Message::tool_result(
                                call.id.clone(),
                                format!("Error: {reason}"),
                            ));
                            continue;
                        }
                    }
                }

                ctx.activity.tool_activity(ToolActivity::Started {
                    parent_node_id: self.node_id.clone(),
                    tool_name: call.name.clone(),
                });
                let started = Instant::now();
                usage.tool_invocations += 1;

                let result = match binding.kind {
                    ToolKind::Builtin => {
                        execute_builtin_tool(&call.name, &call.arguments, ctx).await
                    }
                    ToolKind::Host => {
                        ctx.host_tools
                            .call(&call.name, call.arguments.clone())
                            .await
                    }
                    ToolKind::SpawnAndAwait => unreachable!("handled above"),
                };

                match result {
                    Ok(value) => {
                        ctx.activity.tool_activity(ToolActivity::Succeeded {
                            parent_node_id: self.node_id.clone(),
                            tool_name: call.name.clone(),
                            duration_ms: started.elapsed().as_millis() as u64,
                        });
                        let text = match value {
                            Value::String(s) => s,
                            other => other.to_string(),
                        };
                        convo.push(Message::tool_result(call.id.clone(), text));
                    }
                    Err(err) => {
                        warn!(
                            node_id = %self.node_id,
                            tool = %call.name,
                            "tool failed: {}",
                            err.message()
                        );
                        ctx.activity.tool_activity(ToolActivity::Failed {
                            parent_node_id: self.node_id.clone(),
                            tool_name: call.name.clone(),
                            error: err.message().to_string(),
                        });
                        convo.push(Message::tool_result(
                            call.id.clone(),
                            format!("Error: {}", err.message()),
                        ));
                    }
                }
            }
        }

        if final_content.is_empty() {
            // Iteration cap hit mid-tool-loop; surface the last AI text.
            final_content = convo
                .iter()
                .rev()
                .find(|m| m.role == Role::Ai && !m.content.is_empty())
                .map(|m| m.content.clone())
                .unwrap_or_default();
        }

        // The loop concluded; persist the conversation with no pending call.
        self.save_checkpoint(
            ctx,
            &AgentCheckpoint {
                messages: convo.clone(),
                pending_tool_call: None,
            },
        )
        .await?;

        let output = match &self.output_parser {
            Some((format, pattern)) => parse_output(&final_content, format, pattern.as_deref()),
            None => Value::String(final_content.clone()),
        };

        let mut delta = StateDelta {
            messages: convo[baseline..].to_vec(),
            token_usage: Some(usage),
            output: Some(output.clone()),
            ..Default::default()
        };
        delta
            .node_outputs
            .insert(self.node_id.clone(), json!({"output": output}));
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, MockLlm, ProviderUsage};
    use crate::tool_node::toolset_for;
    use crate::traits::ComponentConfig;
    use std::sync::Arc;

    fn agent_spec(tools: Vec<ToolBinding>) -> ComponentSpec {
        ComponentSpec {
            node_id: "agent".into(),
            component_type: "agent".into(),
            config: ComponentConfig {
                component_type: "agent".into(),
                system_prompt: "You are a helpful assistant.".into(),
                extra: json!({}),
            },
            model: Some(ModelConfig::named("gpt-4o-mini")),
            tools,
            ..Default::default()
        }
    }

    fn ai_with_tool_call(name: &str, id: &str, arguments: Value) -> ChatResponse {
        let mut message = Message::ai("");
        message.tool_calls.push(ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        });
        ChatResponse {
            message,
            usage: Some(ProviderUsage {
                input_tokens: 20,
                output_tokens: 10,
            }),
        }
    }

    fn ai_text(text: &str) -> ChatResponse {
        ChatResponse {
            message: Message::ai(text),
            usage: Some(ProviderUsage {
                input_tokens: 30,
                output_tokens: 15,
            }),
        }
    }

    #[tokio::test]
    async fn plain_answer_without_tools() {
        let llm = Arc::new(MockLlm::new(vec![ai_text("hello there")]));
        let ctx = ComponentContext::for_tests(llm.clone());
        let agent = Agent::from_spec(&agent_spec(Vec::new())).unwrap();

        let state = WorkflowState::initial("e", json!({"text": "hi"}));
        let delta = agent.run(&state, &ctx).await.unwrap();

        assert_eq!(delta.output, Some(json!("hello there")));
        assert_eq!(delta.node_outputs["agent"]["output"], json!("hello there"));
        let usage = delta.token_usage.unwrap();
        assert_eq!(usage.llm_calls, 1);
        assert_eq!(usage.input_tokens, 30);
        // The synthesised human turn came from the trigger text.
        let calls = llm.calls.lock().unwrap();
        assert!(calls[0].messages.iter().any(|m| m.role == Role::Human && m.content == "hi"));
    }

    #[tokio::test]
    async fn tool_loop_executes_and_feeds_back() {
        let llm = Arc::new(MockLlm::new(vec![
            ai_with_tool_call("calculator", "c1", json!({"expression": "6*7"})),
            ai_text("The answer is 42."),
        ]));
        let ctx = ComponentContext::for_tests(llm.clone());
        let tools = toolset_for("calculator", &json!({}), "calc").unwrap();
        let agent = Agent::from_spec(&agent_spec(tools)).unwrap();

        let state = WorkflowState::initial("e", json!({"text": "what is 6*7?"}));
        let delta = agent.run(&state, &ctx).await.unwrap();

        assert_eq!(delta.output, Some(json!("The answer is 42.")));
        let usage = delta.token_usage.unwrap();
        assert_eq!(usage.llm_calls, 2);
        assert_eq!(usage.tool_invocations, 1);

        // Second LLM call saw the tool result.
        let calls = llm.calls.lock().unwrap();
        let second = &calls[1].messages;
        assert!(second
            .iter()
            .any(|m| m.role == Role::Tool && m.content.contains("42")));
    }

    #[tokio::test]
    async fn spawn_and_await_raises_interrupt_and_checkpoints() {
        let llm = Arc::new(MockLlm::new(vec![ai_with_tool_call(
            "spawn_and_await",
            "sp1",
            json!({"tasks": [
                {"workflow_slug": "self", "input_text": "a"},
                {"workflow_slug": "self", "input_text": "b"}
            ]}),
        )]));
        let ctx = ComponentContext::for_tests(llm);
        let tools = toolset_for("spawn_and_await", &json!({}), "spawn").unwrap();
        let agent = Agent::from_spec(&agent_spec(tools)).unwrap();

        let state = WorkflowState::initial("e", json!({"text": "fan out"}));
        let delta = agent.run(&state, &ctx).await.unwrap();

        match delta.interrupt.as_ref().unwrap() {
            InterruptPayload::SpawnAndAwait {
                tool_call_id,
                tasks,
            } => {
                assert_eq!(tool_call_id, "sp1");
                assert_eq!(tasks.len(), 2);
                assert_eq!(tasks[0].input_text, "a");
                assert_eq!(tasks[1].input_text, "b");
            }
            other => panic!("unexpected interrupt: {other:?}"),
        }

        // Checkpoint holds the pending call for the resume path.
        let data = ctx.checkpoints.load(&ctx.thread_id).await.unwrap().unwrap();
        let cp: AgentCheckpoint = serde_json::from_slice(&data).unwrap();
        assert_eq!(cp.pending_tool_call.unwrap().id, "sp1");
    }

    #[tokio::test]
    async fn resume_after_spawn_feeds_results_to_model() {
        let llm = Arc::new(MockLlm::new(vec![
            ai_with_tool_call(
                "spawn_and_await",
                "sp1",
                json!({"tasks": [{"workflow_slug": "self", "input_text": "a"}]}),
            ),
            ai_text("children done"),
        ]));
        let ctx = ComponentContext::for_tests(llm.clone());
        let tools = toolset_for("spawn_and_await", &json!({}), "spawn").unwrap();
        let agent = Agent::from_spec(&agent_spec(tools)).unwrap();

        // First run: interrupt.
        let state = WorkflowState::initial("e", json!({"text": "go"}));
        let delta = agent.run(&state, &ctx).await.unwrap();
        assert!(delta.interrupt.is_some());

        // Resume with ordered child results.
        let mut resumed = state.clone();
        resumed.resume_input = Some(json!([{"output": "r1"}]));
        let delta = agent.run(&resumed, &ctx).await.unwrap();

        assert!(delta.interrupt.is_none());
        assert_eq!(delta.output, Some(json!("children done")));
        // The resumed call saw a tool message answering sp1.
        let calls = llm.calls.lock().unwrap();
        let resume_convo = &calls[1].messages;
        assert!(resume_convo
            .iter()
            .any(|m| m.role == Role::Tool
                && m.tool_call_id.as_deref() == Some("sp1")
                && m.content.contains("r1")));
    }

    #[tokio::test]
    async fn invalid_spawn_args_become_tool_error_for_the_model() {
        let llm = Arc::new(MockLlm::new(vec![
            ai_with_tool_call("spawn_and_await", "sp1", json!({"tasks": []})),
            ai_text("understood, not spawning"),
        ]));
        let ctx = ComponentContext::for_tests(llm.clone());
        let tools = toolset_for("spawn_and_await", &json!({}), "spawn").unwrap();
        let agent = Agent::from_spec(&agent_spec(tools)).unwrap();

        let state = WorkflowState::initial("e", json!({"text": "go"}));
        let delta = agent.run(&state, &ctx).await.unwrap();

        assert!(delta.interrupt.is_none());
        let calls = llm.calls.lock().unwrap();
        assert!(calls[1]
            .messages
            .iter()
            .any(|m| m.role == Role::Tool && m.content.contains("tasks list cannot be empty")));
    }

    #[tokio::test]
    async fn missing_model_is_a_validation_error() {
        let mut spec = agent_spec(Vec::new());
        spec.model = None;
        assert!(Agent::from_spec(&spec).is_err());
    }
}
