//! Execution log repository functions.

use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{ExecutionLogRow, LogStatus},
    DbError,
};

/// Everything recorded for one node attempt.
#[derive(Debug, Clone)]
pub struct NewLog {
    pub execution_id: Uuid,
    pub node_id: String,
    pub status: LogStatus,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub error: String,
    pub error_code: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub retry_count: i32,
    pub duration_ms: i64,
}

/// Insert one node-attempt log row.
pub async fn insert_log(pool: &PgPool, new: &NewLog) -> Result<ExecutionLogRow, DbError> {
    let row = sqlx::query_as::<_, ExecutionLogRow>(
        r#"
        INSERT INTO execution_logs
            (execution_id, node_id, status, input, output, error, error_code,
             metadata, retry_count, duration_ms)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(new.execution_id)
    .bind(&new.node_id)
    .bind(new.status.to_string())
    .bind(&new.input)
    .bind(&new.output)
    .bind(&new.error)
    .bind(&new.error_code)
    .bind(&new.metadata)
    .bind(new.retry_count)
    .bind(new.duration_ms)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// All logs for one execution in timestamp order.
pub async fn list_logs(pool: &PgPool, execution_id: Uuid) -> Result<Vec<ExecutionLogRow>, DbError> {
    let rows = sqlx::query_as::<_, ExecutionLogRow>(
        "SELECT * FROM execution_logs WHERE execution_id = $1 ORDER BY timestamp, id",
    )
    .bind(execution_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// The newest log row per node_id for an execution. The last terminal log
/// per node defines its effective status.
pub async fn latest_logs_by_node(
    pool: &PgPool,
    execution_id: Uuid,
) -> Result<Vec<ExecutionLogRow>, DbError> {
    let rows = sqlx::query_as::<_, ExecutionLogRow>(
        r#"
        SELECT DISTINCT ON (node_id) *
        FROM execution_logs
        WHERE execution_id = $1
        ORDER BY node_id, timestamp DESC, id DESC
        "#,
    )
    .bind(execution_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// The most recent log row of an execution, if any.
pub async fn latest_log(
    pool: &PgPool,
    execution_id: Uuid,
) -> Result<Option<ExecutionLogRow>, DbError> {
    let row = sqlx::query_as::<_, ExecutionLogRow>(
        r#"
        SELECT * FROM execution_logs
        WHERE execution_id = $1
        ORDER BY timestamp DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(execution_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
