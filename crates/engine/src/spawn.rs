//! Spawn/child protocol — parent interrupt, parallel child launch, ordered
//! aggregation, parent resume.
//!
//! A child failure never cancels siblings: the parent receives every
//! result, with `{"_error": …}` markers for failed entries, so the agent's
//! model can surface the failure instead of silently losing it.

use components::state::{InterruptPayload, SpawnTask, WorkflowState};
use components::state::serialize_state;
use db::models::{ExecutionStatus, WorkflowExecutionRow, WorkflowRow};
use db::repository::{executions as exec_repo, workflows as workflows_repo};
use queue::Job;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::orchestrator::Orchestrator;
use crate::EngineError;

/// What an interrupted execution is waiting on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitState {
    /// Parked behind a human confirmation ticket.
    Human { node_id: String },
    /// Parked after a node ran (`interrupt_after`); resume continues to
    /// its successors without re-running it.
    After { node_id: String },
    /// An agent's spawn_and_await call; children listed in submission
    /// order — result assembly must preserve it.
    Spawn {
        node_id: String,
        tool_call_id: String,
        child_ids: Vec<Uuid>,
    },
    /// A `workflow` node's single child run.
    Subworkflow {
        node_id: String,
        child_ids: Vec<Uuid>,
    },
}

impl WaitState {
    pub fn node_id(&self) -> &str {
        match self {
            Self::Human { node_id }
            | Self::After { node_id }
            | Self::Spawn { node_id, .. }
            | Self::Subworkflow { node_id, .. } => node_id,
        }
    }

    pub fn child_ids(&self) -> &[Uuid] {
        match self {
            Self::Human { .. } | Self::After { .. } => &[],
            Self::Spawn { child_ids, .. } | Self::Subworkflow { child_ids, .. } => child_ids,
        }
    }
}

/// Is the given loop currently iterating in this state?
pub fn loop_is_active(state: &WorkflowState, loop_id: &str) -> bool {
    state.loop_state.get("active").and_then(Value::as_bool) == Some(true)
        && state.loop_state.get("loop_id").and_then(Value::as_str) == Some(loop_id)
}

/// Create the child executions for a spawn/sub-workflow interrupt, record
/// the wait state, and park the parent.
pub async fn launch_children(
    orch: &Orchestrator,
    execution: &WorkflowExecutionRow,
    workflow: &WorkflowRow,
    node_id: &str,
    interrupt: InterruptPayload,
) -> Result<(), EngineError> {
    let (tasks, tool_call_id) = match interrupt {
        InterruptPayload::SpawnAndAwait {
            tool_call_id,
            tasks,
        } => (tasks, Some(tool_call_id)),
        InterruptPayload::Subworkflow { task } => (vec![task], None),
    };

    let mut child_ids: Vec<Uuid> = Vec::with_capacity(tasks.len());
    for task in &tasks {
        let child_id = create_child_execution(orch, execution, workflow, node_id, task).await?;
        child_ids.push(child_id);
    }

    let wait_state = match tool_call_id {
        Some(tool_call_id) => WaitState::Spawn {
            node_id: node_id.to_string(),
            tool_call_id,
            child_ids: child_ids.clone(),
        },
        None => WaitState::Subworkflow {
            node_id: node_id.to_string(),
            child_ids: child_ids.clone(),
        },
    };

    exec_repo::save_wait_state(
        orch.pool(),
        execution.execution_id,
        Some(&serde_json::to_value(&wait_state).expect("wait state serialises")),
    )
    .await?;
    exec_repo::update_execution_status(
        orch.pool(),
        execution.execution_id,
        ExecutionStatus::Interrupted,
    )
    .await?;

    for child_id in &child_ids {
        orch.queue()
            .enqueue(Job::ExecuteWorkflowJob {
                execution_id: *child_id,
            })
            .await?;
    }
    info!(
        parent = %execution.execution_id,
        children = child_ids.len(),
        "spawned child executions"
    );
    Ok(())
}

async fn create_child_execution(
    orch: &Orchestrator,
    parent: &WorkflowExecutionRow,
    parent_workflow: &WorkflowRow,
    parent_node_id: &str,
    task: &SpawnTask,
) -> Result<Uuid, EngineError> {
    // `self` reuses the parent's workflow.
    let child_workflow = if task.workflow_slug == "self" {
        parent_workflow.clone()
    } else {
        workflows_repo::get_workflow_by_slug(orch.pool(), &task.workflow_slug)
            .await
            .map_err(|_| {
                EngineError::Validation(format!(
                    "spawn target workflow '{}' not found",
                    task.workflow_slug
                ))
            })?
    };

    let child_id = Uuid::new_v4();
    // Children get their own conversation thread derived from the parent's.
    let thread_id = format!("{}:{}", parent.thread_id, child_id.simple());
    let trigger_payload = json!({
        "text": task.input_text,
        "source_workflow": parent_workflow.slug,
        "parent_execution_id": parent.execution_id,
    });

    exec_repo::create_execution(
        orch.pool(),
        &exec_repo::NewExecution {
            execution_id: child_id,
            workflow_id: child_workflow.id,
            trigger_node_id: None,
            parent_execution_id: Some(parent.execution_id),
            parent_node_id: parent_node_id.to_string(),
            user_profile_id: parent.user_profile_id,
            thread_id,
            trigger_payload: Some(trigger_payload),
            max_retries: parent.max_retries,
        },
    )
    .await?;
    Ok(child_id)
}

/// Called whenever an execution reaches a terminal state: if it is a
/// child, check the siblings and resume the parent once all are terminal.
pub async fn notify_parent_if_child(
    orch: &Orchestrator,
    execution_id: Uuid,
) -> Result<(), EngineError> {
    let execution = exec_repo::get_execution(orch.pool(), execution_id).await?;
    let Some(parent_id) = execution.parent_execution_id else {
        return Ok(());
    };
    try_resume_parent(orch, parent_id).await
}

/// Resume `parent_id` if it is waiting on children and all of them are
/// terminal. Results are assembled in submission order.
pub async fn try_resume_parent(orch: &Orchestrator, parent_id: Uuid) -> Result<(), EngineError> {
    let parent = match exec_repo::get_execution(orch.pool(), parent_id).await {
        Ok(parent) => parent,
        Err(db::DbError::NotFound) => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    if parent.status() != ExecutionStatus::Interrupted {
        return Ok(());
    }
    let Some(wait_state) = parent
        .wait_state
        .as_ref()
        .and_then(|v| serde_json::from_value::<WaitState>(v.clone()).ok())
    else {
        return Ok(());
    };
    let child_ids = wait_state.child_ids();
    if child_ids.is_empty() {
        return Ok(());
    }

    let mut results: Vec<Value> = Vec::with_capacity(child_ids.len());
    for child_id in child_ids {
        let child = exec_repo::get_execution(orch.pool(), *child_id).await?;
        match child.status() {
            ExecutionStatus::Completed => {
                results.push(child.final_output.clone().unwrap_or(Value::Null));
            }
            ExecutionStatus::Failed => {
                results.push(json!({"_error": child.error_message}));
            }
            ExecutionStatus::Cancelled => {
                results.push(json!({"_error": "cancelled"}));
            }
            _ => return Ok(()), // still running; wait for its own notification
        }
    }

    let resume_input = match &wait_state {
        WaitState::Subworkflow { .. } => results.into_iter().next().unwrap_or(Value::Null),
        _ => Value::Array(results),
    };

    let mut state = orch.load_state(&parent)?;
    state.resume_input = Some(resume_input);
    exec_repo::save_state(orch.pool(), parent_id, &serialize_state(&state)).await?;
    exec_repo::save_wait_state(orch.pool(), parent_id, None).await?;
    exec_repo::update_execution_status(orch.pool(), parent_id, ExecutionStatus::Running).await?;

    orch.queue()
        .enqueue(Job::ExecuteNodeJob {
            execution_id: parent_id,
            node_id: wait_state.node_id().to_string(),
            retry_count: 0,
        })
        .await?;
    info!(parent = %parent_id, "parent resumed with child results");
    Ok(())
}

/// Periodic safety net: executions interrupted on children whose entire
/// brood already terminated (a missed notification) are resumed here.
pub async fn cleanup_stuck_child_waits(orch: &Orchestrator) -> Result<usize, EngineError> {
    let stale = exec_repo::list_waiting_on_children(orch.pool()).await?;
    let mut resumed = 0usize;
    for parent in stale {
        if let Err(err) = try_resume_parent(orch, parent.execution_id).await {
            warn!(parent = %parent.execution_id, "stuck-wait resume failed: {err}");
        } else {
            resumed += 1;
        }
    }
    Ok(resumed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_state_round_trips() {
        let ws = WaitState::Spawn {
            node_id: "agent".into(),
            tool_call_id: "sp1".into(),
            child_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
        };
        let value = serde_json::to_value(&ws).unwrap();
        assert_eq!(value["kind"], "spawn");
        let back: WaitState = serde_json::from_value(value).unwrap();
        assert_eq!(back.node_id(), "agent");
        assert_eq!(back.child_ids().len(), 2);
    }

    #[test]
    fn loop_activity_check() {
        let mut state = WorkflowState::default();
        assert!(!loop_is_active(&state, "lp"));
        state.loop_state = json!({"active": true, "loop_id": "lp"});
        assert!(loop_is_active(&state, "lp"));
        assert!(!loop_is_active(&state, "other"));
        state.loop_state = json!({"active": false, "loop_id": "lp"});
        assert!(!loop_is_active(&state, "lp"));
    }
}
