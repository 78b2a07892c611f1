//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models — they carry no domain behaviour.
//! Domain types live in the `engine` and `components` crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A persisted workflow row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub owner_id: i64,
    pub is_active: bool,
    pub is_default: bool,
    pub tags: serde_json::Value,
    pub max_execution_seconds: i32,
    pub input_schema: Option<serde_json::Value>,
    pub output_schema: Option<serde_json::Value>,
    pub error_handler_workflow_id: Option<i64>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// workflow_nodes / workflow_edges
// ---------------------------------------------------------------------------

/// A persisted graph node row. `(workflow_id, node_id)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowNodeRow {
    pub id: i64,
    pub workflow_id: i64,
    pub node_id: String,
    pub component_type: String,
    pub component_config_id: i64,
    pub is_entry_point: bool,
    pub interrupt_before: bool,
    pub interrupt_after: bool,
    pub subworkflow_id: Option<i64>,
    pub code_block_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted graph edge row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowEdgeRow {
    pub id: i64,
    pub workflow_id: i64,
    pub source_node_id: String,
    pub target_node_id: String,
    pub edge_type: String,
    pub edge_label: String,
    pub condition_value: String,
    pub condition_mapping: Option<serde_json::Value>,
    pub priority: i32,
}

// ---------------------------------------------------------------------------
// component_configs
// ---------------------------------------------------------------------------

/// One wide row per component config. Polymorphic over `component_type` —
/// model-tuning columns are NULL for non-LLM components, trigger columns
/// are NULL for non-trigger components.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ComponentConfigRow {
    pub id: i64,
    pub component_type: String,
    pub system_prompt: String,
    pub extra_config: serde_json::Value,
    pub model_name: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i32>,
    pub top_p: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub timeout_seconds: Option<i32>,
    pub max_retries: Option<i32>,
    pub response_format: Option<String>,
    pub llm_credential_id: Option<i64>,
    pub llm_model_config_id: Option<i64>,
    pub credential_id: Option<i64>,
    pub is_active: Option<bool>,
    pub priority: Option<i32>,
    pub trigger_config: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// workflow_executions
// ---------------------------------------------------------------------------

/// Possible statuses for a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Interrupted,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Completed, failed, and cancelled executions accept no further work.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "interrupted" => Ok(Self::Interrupted),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// A persisted workflow execution row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowExecutionRow {
    pub execution_id: Uuid,
    pub workflow_id: i64,
    pub trigger_node_id: Option<i64>,
    pub parent_execution_id: Option<Uuid>,
    pub parent_node_id: String,
    pub user_profile_id: i64,
    pub thread_id: String,
    pub status: String,
    pub trigger_payload: Option<serde_json::Value>,
    pub final_output: Option<serde_json::Value>,
    /// Accumulated serialised `WorkflowState` for the run.
    pub state: Option<serde_json::Value>,
    /// Spawn/child wait bookkeeping while `interrupted`.
    pub wait_state: Option<serde_json::Value>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub error_message: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub total_tokens: i64,
    pub total_cost_usd: f64,
    pub llm_calls: i64,
    pub tool_invocations: i64,
}

impl WorkflowExecutionRow {
    /// Parse the stored status string.
    pub fn status(&self) -> ExecutionStatus {
        self.status.parse().unwrap_or(ExecutionStatus::Failed)
    }
}

// ---------------------------------------------------------------------------
// execution_logs
// ---------------------------------------------------------------------------

/// Per-node-attempt statuses. `Running` is the only non-terminal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Running,
    Success,
    Failed,
    Skipped,
    Interrupted,
}

impl LogStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl std::str::FromStr for LogStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            "interrupted" => Ok(Self::Interrupted),
            other => Err(format!("unknown log status: {other}")),
        }
    }
}

/// One row per node attempt.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionLogRow {
    pub id: i64,
    pub execution_id: Uuid,
    pub node_id: String,
    pub status: String,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub error: String,
    pub error_code: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub retry_count: i32,
    pub duration_ms: i64,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionLogRow {
    pub fn status(&self) -> LogStatus {
        self.status.parse().unwrap_or(LogStatus::Failed)
    }
}

// ---------------------------------------------------------------------------
// pending_tasks
// ---------------------------------------------------------------------------

/// A confirmation ticket for an execution paused on human input.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PendingTaskRow {
    pub task_id: String,
    pub execution_id: Uuid,
    pub user_profile_id: i64,
    pub external_chat_id: i64,
    pub node_id: String,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// scheduled_jobs
// ---------------------------------------------------------------------------

/// Lifecycle states of a recurring job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledJobStatus {
    Active,
    Paused,
    Stopped,
    Dead,
    Done,
}

impl std::fmt::Display for ScheduledJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
            Self::Dead => write!(f, "dead"),
            Self::Done => write!(f, "done"),
        }
    }
}

impl std::str::FromStr for ScheduledJobStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            "dead" => Ok(Self::Dead),
            "done" => Ok(Self::Done),
            other => Err(format!("unknown scheduled job status: {other}")),
        }
    }
}

/// A self-rescheduling recurring job row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScheduledJobRow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub workflow_id: i64,
    pub trigger_node_id: Option<String>,
    pub user_profile_id: i64,
    pub interval_seconds: i32,
    /// 0 = repeat forever.
    pub total_repeats: i32,
    pub max_retries: i32,
    pub timeout_seconds: i32,
    pub trigger_payload: Option<serde_json::Value>,
    pub status: String,
    pub current_repeat: i32,
    pub current_retry: i32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub run_count: i32,
    pub error_count: i32,
    pub last_error: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledJobRow {
    pub fn status(&self) -> ScheduledJobStatus {
        self.status.parse().unwrap_or(ScheduledJobStatus::Stopped)
    }
}

// ---------------------------------------------------------------------------
// job_queue
// ---------------------------------------------------------------------------

/// Possible statuses for a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    DeadLettered,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::DeadLettered => write!(f, "dead_lettered"),
        }
    }
}

/// A job row fetched from the queue table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub queue: String,
    pub status: String,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub max_attempts: i32,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// user_profiles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserProfileRow {
    pub id: i64,
    pub username: String,
    pub external_chat_id: Option<i64>,
    pub is_agent: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_status_round_trips_through_strings() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Interrupted,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            let parsed: ExecutionStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Interrupted.is_terminal());

        assert!(LogStatus::Success.is_terminal());
        assert!(!LogStatus::Running.is_terminal());
    }

    #[test]
    fn unknown_log_status_falls_back_to_failed() {
        let row = ExecutionLogRow {
            id: 1,
            execution_id: Uuid::new_v4(),
            node_id: "a".into(),
            status: "garbled".into(),
            input: None,
            output: None,
            error: String::new(),
            error_code: None,
            metadata: None,
            retry_count: 0,
            duration_ms: 0,
            timestamp: Utc::now(),
        };
        assert_eq!(row.status(), LogStatus::Failed);
    }
}
