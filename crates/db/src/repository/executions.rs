//! Workflow execution repository functions.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{ExecutionStatus, WorkflowExecutionRow},
    DbError,
};

/// Everything needed to create an execution row in `pending` status.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub execution_id: Uuid,
    pub workflow_id: i64,
    pub trigger_node_id: Option<i64>,
    pub parent_execution_id: Option<Uuid>,
    pub parent_node_id: String,
    pub user_profile_id: i64,
    pub thread_id: String,
    pub trigger_payload: Option<serde_json::Value>,
    pub max_retries: i32,
}

/// Insert a new execution record in `pending` status.
pub async fn create_execution(
    pool: &PgPool,
    new: &NewExecution,
) -> Result<WorkflowExecutionRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowExecutionRow>(
        r#"
        INSERT INTO workflow_executions
            (execution_id, workflow_id, trigger_node_id, parent_execution_id,
             parent_node_id, user_profile_id, thread_id, status,
             trigger_payload, max_retries)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9)
        RETURNING *
        "#,
    )
    .bind(new.execution_id)
    .bind(new.workflow_id)
    .bind(new.trigger_node_id)
    .bind(new.parent_execution_id)
    .bind(&new.parent_node_id)
    .bind(new.user_profile_id)
    .bind(&new.thread_id)
    .bind(&new.trigger_payload)
    .bind(new.max_retries)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Fetch a single execution by id.
pub async fn get_execution(
    pool: &PgPool,
    execution_id: Uuid,
) -> Result<WorkflowExecutionRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowExecutionRow>(
        "SELECT * FROM workflow_executions WHERE execution_id = $1",
    )
    .bind(execution_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;
    Ok(row)
}

/// Transition an execution's status. Sets `started_at` on the first move to
/// `running` and `completed_at` on any terminal status.
pub async fn update_execution_status(
    pool: &PgPool,
    execution_id: Uuid,
    status: ExecutionStatus,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        UPDATE workflow_executions
        SET status = $1,
            started_at = CASE WHEN $1 = 'running' AND started_at IS NULL THEN now() ELSE started_at END,
            completed_at = CASE WHEN $1 IN ('completed', 'failed', 'cancelled') THEN now() ELSE completed_at END
        WHERE execution_id = $2
        "#,
    )
    .bind(status.to_string())
    .bind(execution_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Mark an execution failed with an error message.
pub async fn fail_execution(
    pool: &PgPool,
    execution_id: Uuid,
    error_message: &str,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        UPDATE workflow_executions
        SET status = 'failed', error_message = $1, completed_at = now()
        WHERE execution_id = $2
        "#,
    )
    .bind(error_message)
    .bind(execution_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Persist the accumulated serialised workflow state.
pub async fn save_state(
    pool: &PgPool,
    execution_id: Uuid,
    state: &serde_json::Value,
) -> Result<(), DbError> {
    sqlx::query("UPDATE workflow_executions SET state = $1 WHERE execution_id = $2")
        .bind(state)
        .bind(execution_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Persist (or clear) the spawn-wait bookkeeping blob.
pub async fn save_wait_state(
    pool: &PgPool,
    execution_id: Uuid,
    wait_state: Option<&serde_json::Value>,
) -> Result<(), DbError> {
    sqlx::query("UPDATE workflow_executions SET wait_state = $1 WHERE execution_id = $2")
        .bind(wait_state)
        .bind(execution_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record the final output of a completed execution.
pub async fn set_final_output(
    pool: &PgPool,
    execution_id: Uuid,
    final_output: &serde_json::Value,
) -> Result<(), DbError> {
    sqlx::query("UPDATE workflow_executions SET final_output = $1 WHERE execution_id = $2")
        .bind(final_output)
        .bind(execution_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Fold per-call usage into the execution-level counters.
pub async fn add_usage(
    pool: &PgPool,
    execution_id: Uuid,
    input_tokens: i64,
    output_tokens: i64,
    cost_usd: f64,
    llm_calls: i64,
    tool_invocations: i64,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        UPDATE workflow_executions
        SET total_input_tokens = total_input_tokens + $1,
            total_output_tokens = total_output_tokens + $2,
            total_tokens = total_tokens + $1 + $2,
            total_cost_usd = total_cost_usd + $3,
            llm_calls = llm_calls + $4,
            tool_invocations = tool_invocations + $5
        WHERE execution_id = $6
        "#,
    )
    .bind(input_tokens)
    .bind(output_tokens)
    .bind(cost_usd)
    .bind(llm_calls)
    .bind(tool_invocations)
    .bind(execution_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Bump the execution-level retry counter (used by the zombie sweeper's
/// reschedule-once policy). Returns the new value.
pub async fn increment_retry_count(pool: &PgPool, execution_id: Uuid) -> Result<i32, DbError> {
    let (count,): (i32,) = sqlx::query_as(
        r#"
        UPDATE workflow_executions
        SET retry_count = retry_count + 1
        WHERE execution_id = $1
        RETURNING retry_count
        "#,
    )
    .bind(execution_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// All children of the given parent execution.
pub async fn list_children(
    pool: &PgPool,
    parent_execution_id: Uuid,
) -> Result<Vec<WorkflowExecutionRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowExecutionRow>(
        "SELECT * FROM workflow_executions WHERE parent_execution_id = $1 ORDER BY created_at",
    )
    .bind(parent_execution_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Interrupted executions parked on a human confirmation ticket.
pub async fn list_waiting_on_confirmation(
    pool: &PgPool,
) -> Result<Vec<WorkflowExecutionRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowExecutionRow>(
        r#"
        SELECT * FROM workflow_executions
        WHERE status = 'interrupted'
          AND wait_state IS NOT NULL
          AND wait_state->>'kind' = 'human'
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Interrupted executions holding a spawn/sub-workflow wait state.
/// The stuck-wait sweeper re-checks their children.
pub async fn list_waiting_on_children(
    pool: &PgPool,
) -> Result<Vec<WorkflowExecutionRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowExecutionRow>(
        r#"
        SELECT * FROM workflow_executions
        WHERE status = 'interrupted'
          AND wait_state IS NOT NULL
          AND wait_state->>'kind' IN ('spawn', 'subworkflow')
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Running executions older than their workflow's `max_execution_seconds`
/// budget.
pub async fn list_over_budget(pool: &PgPool) -> Result<Vec<WorkflowExecutionRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowExecutionRow>(
        r#"
        SELECT e.* FROM workflow_executions e
        JOIN workflows w ON w.id = e.workflow_id
        WHERE e.status = 'running'
          AND e.started_at IS NOT NULL
          AND e.started_at < now() - make_interval(secs => w.max_execution_seconds)
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Executions still `running` whose newest log entry is older than the
/// cutoff (or which have no logs and started before the cutoff).
pub async fn list_stale_running(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<Vec<WorkflowExecutionRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowExecutionRow>(
        r#"
        SELECT e.* FROM workflow_executions e
        WHERE e.status = 'running'
          AND COALESCE(
                (SELECT max(l.timestamp) FROM execution_logs l
                 WHERE l.execution_id = e.execution_id),
                e.started_at,
                e.created_at
              ) < $1
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
