//! Agent checkpoint repository functions.
//!
//! The checkpoint store is write-through and opaque: the orchestrator reads
//! the blob, the agent applies the resume input, and the whole snapshot is
//! written back.

use sqlx::PgPool;

use crate::DbError;

/// Load the checkpoint blob for a thread, if any.
pub async fn load_checkpoint(pool: &PgPool, thread_id: &str) -> Result<Option<Vec<u8>>, DbError> {
    let row: Option<(Vec<u8>,)> =
        sqlx::query_as("SELECT data FROM agent_checkpoints WHERE thread_id = $1")
            .bind(thread_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(data,)| data))
}

/// Upsert the checkpoint blob for a thread.
pub async fn save_checkpoint(pool: &PgPool, thread_id: &str, data: &[u8]) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO agent_checkpoints (thread_id, data, updated_at)
        VALUES ($1, $2, now())
        ON CONFLICT (thread_id)
        DO UPDATE SET data = EXCLUDED.data, updated_at = now()
        "#,
    )
    .bind(thread_id)
    .bind(data)
    .execute(pool)
    .await?;
    Ok(())
}

/// Drop the checkpoint for a thread (administrative cleanup).
pub async fn delete_checkpoint(pool: &PgPool, thread_id: &str) -> Result<u64, DbError> {
    let result = sqlx::query("DELETE FROM agent_checkpoints WHERE thread_id = $1")
        .bind(thread_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
