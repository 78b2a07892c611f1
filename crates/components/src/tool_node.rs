//! Tool bundles — sub-component node types that return one or more tools
//! for a parent agent.
//!
//! These are never executable DAG nodes; they are discovered via edges
//! labelled `tool` and bound into the agent that owns the edge.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ComponentError;

/// A tool surface advertised to the model: name, description, JSON-schema
/// parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// How a bound tool is executed when the model calls it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Executed in-process by the agent (calculator, datetime, http, …).
    Builtin,
    /// Dispatched to the host platform through [`HostTools`]
    /// (scheduler_tools, epic_tools, platform_api, memory ops, …).
    Host,
    /// Raises a spawn interrupt instead of executing; the orchestrator
    /// launches child executions and resumes the agent with their results.
    SpawnAndAwait,
}

/// One tool bound to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolBinding {
    pub def: ToolDef,
    pub kind: ToolKind,
    /// node_id of the sub-component node that contributed this tool.
    pub source_node_id: String,
}

/// Host-platform tool dispatch. Platform-coupled bundles (epics, tasks,
/// schedules, memory, user identity) are executed by the embedding
/// application, not the core.
#[async_trait]
pub trait HostTools: Send + Sync {
    async fn call(&self, tool_name: &str, arguments: Value) -> Result<Value, ComponentError>;
}

/// Default host: every call fails fatally. Installed when the embedding
/// application provides no platform tools.
pub struct NoHostTools;

#[async_trait]
impl HostTools for NoHostTools {
    async fn call(&self, tool_name: &str, _arguments: Value) -> Result<Value, ComponentError> {
        Err(ComponentError::fatal(
            crate::error::ErrorCode::Unrecoverable,
            format!("no host tool handler registered for '{tool_name}'"),
        ))
    }
}

fn string_arg(name: &str, description: &str) -> Value {
    json!({
        "type": "object",
        "properties": { name: { "type": "string", "description": description } },
        "required": [name]
    })
}

/// The tools a sub-component node of `component_type` contributes, or
/// `None` when the type is not a tool bundle.
///
/// Host bundles get one generic entry per operation the platform exposes;
/// their names are stable so host handlers can dispatch on them.
pub fn toolset_for(component_type: &str, extra_config: &Value, source_node_id: &str) -> Option<Vec<ToolBinding>> {
    let bind = |def: ToolDef, kind: ToolKind| ToolBinding {
        def,
        kind,
        source_node_id: source_node_id.to_string(),
    };

    let bindings = match component_type {
        "calculator" => vec![bind(
            ToolDef {
                name: "calculator".into(),
                description: "Evaluate a math expression. Supports +, -, *, /, //, %, ** and \
                              parentheses."
                    .into(),
                parameters: string_arg("expression", "Math expression to evaluate"),
            },
            ToolKind::Builtin,
        )],
        "datetime" => vec![bind(
            ToolDef {
                name: "datetime_now".into(),
                description: "Current date and time in UTC (ISO 8601).".into(),
                parameters: json!({"type": "object", "properties": {}}),
            },
            ToolKind::Builtin,
        )],
        "web_search" => vec![bind(
            ToolDef {
                name: "web_search".into(),
                description: "Search the web and return result snippets.".into(),
                parameters: string_arg("query", "Search query"),
            },
            ToolKind::Builtin,
        )],
        "http_request" => vec![bind(
            ToolDef {
                name: "http_request".into(),
                description: "Perform an HTTP request and return status and body.".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "url": {"type": "string"},
                        "method": {"type": "string", "enum": ["GET", "POST", "PUT", "DELETE", "PATCH"]},
                        "headers": {"type": "object"},
                        "body": {}
                    },
                    "required": ["url"]
                }),
            },
            ToolKind::Builtin,
        )],
        "run_command" => vec![bind(
            ToolDef {
                name: "run_command".into(),
                description: "Run a shell command and return stdout, stderr, exit code.".into(),
                parameters: string_arg("command", "Shell command to run"),
            },
            ToolKind::Builtin,
        )],
        "code_execute" => vec![bind(
            ToolDef {
                name: "execute_code".into(),
                description: "Execute python or bash code in a sandbox.".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "code": {"type": "string"},
                        "language": {"type": "string", "enum": ["python", "bash"]}
                    },
                    "required": ["code"]
                }),
            },
            ToolKind::Builtin,
        )],
        "spawn_and_await" => vec![bind(
            ToolDef {
                name: "spawn_and_await".into(),
                description: "Spawn one or more child workflows in parallel and wait for all \
                              results. Use workflow_slug=\"self\" to spawn another instance of \
                              the current workflow. Returns a JSON array of results, one per \
                              task, in the same order as the input."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "tasks": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "workflow_slug": {"type": "string"},
                                    "input_text": {"type": "string"}
                                },
                                "required": ["workflow_slug"]
                            }
                        }
                    },
                    "required": ["tasks"]
                }),
            },
            ToolKind::SpawnAndAwait,
        )],

        // Host-dispatched platform bundles. Operation lists can be narrowed
        // per node via extra_config.tools.
        "memory_read" => host_bundle(&["memory_search", "memory_get"], source_node_id),
        "memory_write" => host_bundle(&["memory_store", "memory_delete"], source_node_id),
        "identify_user" => host_bundle(&["identify_user"], source_node_id),
        "whoami" => host_bundle(&["whoami"], source_node_id),
        "create_agent_user" => host_bundle(&["create_agent_user"], source_node_id),
        "platform_api" => host_bundle(&["platform_api"], source_node_id),
        "get_totp_code" => host_bundle(&["get_totp_code"], source_node_id),
        "system_health" => host_bundle(&["system_health"], source_node_id),
        "scheduler_tools" => host_bundle(
            &[
                "schedule_create",
                "schedule_list",
                "schedule_pause",
                "schedule_resume",
                "schedule_stop",
            ],
            source_node_id,
        ),
        "epic_tools" => host_bundle(
            &["epic_create", "epic_list", "epic_update", "epic_delete"],
            source_node_id,
        ),
        "task_tools" => host_bundle(
            &["task_create", "task_list", "task_update", "task_delete"],
            source_node_id,
        ),
        "workflow_create" => host_bundle(&["workflow_create"], source_node_id),
        "workflow_discover" => host_bundle(&["workflow_discover"], source_node_id),
        _ => return None,
    };

    // Optional narrowing: extra_config.tools = ["name", …]
    let bindings = match extra_config.get("tools").and_then(Value::as_array) {
        Some(allowed) => {
            let names: Vec<&str> = allowed.iter().filter_map(Value::as_str).collect();
            bindings
                .into_iter()
                .filter(|b| names.contains(&b.def.name.as_str()))
                .collect()
        }
        None => bindings,
    };

    Some(bindings)
}

fn host_bundle(names: &[&str], source_node_id: &str) -> Vec<ToolBinding> {
    names
        .iter()
        .map(|name| ToolBinding {
            def: ToolDef {
                name: (*name).to_string(),
                description: format!("Platform operation '{name}'."),
                parameters: json!({"type": "object", "additionalProperties": true}),
            },
            kind: ToolKind::Host,
            source_node_id: source_node_id.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_tool_types_yield_none() {
        assert!(toolset_for("agent", &json!({}), "n1").is_none());
        assert!(toolset_for("switch", &json!({}), "n1").is_none());
    }

    #[test]
    fn spawn_and_await_is_interrupt_kind() {
        let tools = toolset_for("spawn_and_await", &json!({}), "sp1").unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].kind, ToolKind::SpawnAndAwait);
        assert_eq!(tools[0].source_node_id, "sp1");
    }

    #[test]
    fn bundles_can_be_narrowed_via_extra_config() {
        let tools = toolset_for(
            "scheduler_tools",
            &json!({"tools": ["schedule_create", "schedule_list"]}),
            "sched",
        )
        .unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.def.name.as_str()).collect();
        assert_eq!(names, vec!["schedule_create", "schedule_list"]);
    }
}
