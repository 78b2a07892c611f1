//! Job queue repository functions.
//!
//! The queue is backed by the `job_queue` Postgres table. Workers poll the
//! table and use `SELECT … FOR UPDATE SKIP LOCKED` for safe concurrent
//! processing. Delayed jobs carry a future `scheduled_at` and are invisible
//! until it passes.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::JobRow, DbError};

/// Enqueue a new job on a named queue.
///
/// `payload` is arbitrary JSON the worker hands back to the dispatcher.
/// `scheduled_at` in the future delays delivery to the second.
pub async fn enqueue_job(
    pool: &PgPool,
    queue: &str,
    payload: serde_json::Value,
    scheduled_at: DateTime<Utc>,
    max_attempts: i32,
) -> Result<JobRow, DbError> {
    let id = Uuid::new_v4();
    let row = sqlx::query_as::<_, JobRow>(
        r#"
        INSERT INTO job_queue (id, queue, status, payload, attempts, max_attempts, scheduled_at)
        VALUES ($1, $2, 'pending', $3, 0, $4, $5)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(queue)
    .bind(payload)
    .bind(max_attempts)
    .bind(scheduled_at)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Atomically fetch the oldest due pending job on a queue and mark it
/// `processing`.
///
/// Uses `SELECT … FOR UPDATE SKIP LOCKED` so multiple workers can poll
/// safely without stepping on each other.
///
/// Returns `None` if no due jobs exist.
pub async fn fetch_next_job(pool: &PgPool, queue: &str) -> Result<Option<JobRow>, DbError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT * FROM job_queue
        WHERE queue = $1 AND status = 'pending' AND scheduled_at <= now()
        ORDER BY scheduled_at ASC, created_at ASC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(queue)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(ref job) = row {
        sqlx::query(
            r#"
            UPDATE job_queue
            SET status = 'processing', attempts = attempts + 1, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
    } else {
        tx.rollback().await?;
    }

    Ok(row)
}

/// Mark a job as completed.
pub async fn complete_job(pool: &PgPool, job_id: Uuid) -> Result<(), DbError> {
    sqlx::query("UPDATE job_queue SET status = 'completed', updated_at = now() WHERE id = $1")
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Mark a job as failed: back to `pending` for another attempt, or
/// `dead_lettered` when attempts are exhausted.
pub async fn fail_job(pool: &PgPool, job_id: Uuid) -> Result<(), DbError> {
    sqlx::query(
        r#"
        UPDATE job_queue
        SET status = CASE WHEN attempts >= max_attempts THEN 'dead_lettered' ELSE 'pending' END,
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete completed jobs older than the cutoff; returns rows removed.
pub async fn prune_completed(pool: &PgPool, older_than: DateTime<Utc>) -> Result<u64, DbError> {
    let result =
        sqlx::query("DELETE FROM job_queue WHERE status = 'completed' AND updated_at < $1")
            .bind(older_than)
            .execute(pool)
            .await?;
    Ok(result.rows_affected())
}

/// Node jobs still pending or processing for one execution, excluding the
/// node currently being handled (its own row is still `processing` while
/// the orchestrator decides whether the DAG has drained).
pub async fn count_active_node_jobs(
    pool: &PgPool,
    execution_id: Uuid,
    exclude_node_id: &str,
) -> Result<i64, DbError> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT count(*) FROM job_queue
        WHERE status IN ('pending', 'processing')
          AND payload->>'function' = 'execute_node_job'
          AND payload->>'execution_id' = $1
          AND payload->>'node_id' <> $2
        "#,
    )
    .bind(execution_id.to_string())
    .bind(exclude_node_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

// ---------------------------------------------------------------------------
// Per-execution advisory lease
// ---------------------------------------------------------------------------

/// Try to take the session-scoped advisory lock for an execution.
///
/// The orchestrator is single-leader per execution_id: every node job takes
/// this lease for the length of its invocation. Advisory locks belong to a
/// connection, so the caller must hold one checked-out connection across
/// acquire, work, and release. Returns `false` when another worker holds
/// the lease — the caller requeues with a small delay.
pub async fn try_acquire_execution_lease(
    conn: &mut sqlx::PgConnection,
    execution_id: Uuid,
) -> Result<bool, DbError> {
    let (acquired,): (bool,) =
        sqlx::query_as("SELECT pg_try_advisory_lock(hashtext($1::text)::bigint)")
            .bind(execution_id.to_string())
            .fetch_one(&mut *conn)
            .await?;
    Ok(acquired)
}

/// Release the advisory lease taken by [`try_acquire_execution_lease`] on
/// the same connection.
pub async fn release_execution_lease(
    conn: &mut sqlx::PgConnection,
    execution_id: Uuid,
) -> Result<(), DbError> {
    sqlx::query("SELECT pg_advisory_unlock(hashtext($1::text)::bigint)")
        .bind(execution_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}
