//! Pending-task (human confirmation ticket) repository functions.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::PendingTaskRow, DbError};

/// Create a confirmation ticket for an interrupted execution.
#[allow(clippy::too_many_arguments)]
pub async fn create_pending_task(
    pool: &PgPool,
    task_id: &str,
    execution_id: Uuid,
    user_profile_id: i64,
    external_chat_id: i64,
    node_id: &str,
    prompt: &str,
    expires_at: DateTime<Utc>,
) -> Result<PendingTaskRow, DbError> {
    let row = sqlx::query_as::<_, PendingTaskRow>(
        r#"
        INSERT INTO pending_tasks
            (task_id, execution_id, user_profile_id, external_chat_id,
             node_id, prompt, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(task_id)
    .bind(execution_id)
    .bind(user_profile_id)
    .bind(external_chat_id)
    .bind(node_id)
    .bind(prompt)
    .bind(expires_at)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Fetch one ticket by its 8-hex id.
pub async fn get_pending_task(pool: &PgPool, task_id: &str) -> Result<PendingTaskRow, DbError> {
    let row = sqlx::query_as::<_, PendingTaskRow>("SELECT * FROM pending_tasks WHERE task_id = $1")
        .bind(task_id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)?;
    Ok(row)
}

/// Tickets attached to an execution (normally zero or one).
pub async fn list_for_execution(
    pool: &PgPool,
    execution_id: Uuid,
) -> Result<Vec<PendingTaskRow>, DbError> {
    let rows = sqlx::query_as::<_, PendingTaskRow>(
        "SELECT * FROM pending_tasks WHERE execution_id = $1 ORDER BY created_at",
    )
    .bind(execution_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Remove all tickets for an execution (called on resume or cancel).
pub async fn delete_for_execution(pool: &PgPool, execution_id: Uuid) -> Result<u64, DbError> {
    let result = sqlx::query("DELETE FROM pending_tasks WHERE execution_id = $1")
        .bind(execution_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Remove expired tickets; returns how many were dropped.
pub async fn delete_expired(pool: &PgPool) -> Result<u64, DbError> {
    let result = sqlx::query("DELETE FROM pending_tasks WHERE expires_at < now()")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
