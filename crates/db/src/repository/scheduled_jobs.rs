//! Scheduled-job repository functions.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{ScheduledJobRow, ScheduledJobStatus},
    DbError,
};

/// Fetch one scheduled job by id.
pub async fn get_scheduled_job(pool: &PgPool, id: Uuid) -> Result<ScheduledJobRow, DbError> {
    let row = sqlx::query_as::<_, ScheduledJobRow>("SELECT * FROM scheduled_jobs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)?;
    Ok(row)
}

/// Flip a job's status. Pause/resume/stop are all this one transition.
pub async fn set_status(
    pool: &PgPool,
    id: Uuid,
    status: ScheduledJobStatus,
) -> Result<(), DbError> {
    sqlx::query("UPDATE scheduled_jobs SET status = $1, updated_at = now() WHERE id = $2")
        .bind(status.to_string())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a successful fire: bump `run_count` and `current_repeat`, reset
/// the retry counter, and stamp the run times.
pub async fn record_success(
    pool: &PgPool,
    id: Uuid,
    status: ScheduledJobStatus,
    next_run_at: Option<DateTime<Utc>>,
) -> Result<ScheduledJobRow, DbError> {
    let row = sqlx::query_as::<_, ScheduledJobRow>(
        r#"
        UPDATE scheduled_jobs
        SET run_count = run_count + 1,
            current_repeat = current_repeat + 1,
            current_retry = 0,
            last_run_at = now(),
            next_run_at = $1,
            status = $2,
            updated_at = now()
        WHERE id = $3
        RETURNING *
        "#,
    )
    .bind(next_run_at)
    .bind(status.to_string())
    .bind(id)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Record a failed fire: bump `error_count` and `current_retry`, store the
/// error text, and either reschedule or mark the job dead.
pub async fn record_failure(
    pool: &PgPool,
    id: Uuid,
    status: ScheduledJobStatus,
    next_run_at: Option<DateTime<Utc>>,
    last_error: &str,
) -> Result<ScheduledJobRow, DbError> {
    let row = sqlx::query_as::<_, ScheduledJobRow>(
        r#"
        UPDATE scheduled_jobs
        SET error_count = error_count + 1,
            current_retry = current_retry + 1,
            last_error = $1,
            next_run_at = $2,
            status = $3,
            updated_at = now()
        WHERE id = $4
        RETURNING *
        "#,
    )
    .bind(last_error)
    .bind(next_run_at)
    .bind(status.to_string())
    .bind(id)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Active jobs whose `next_run_at` has passed but which have no queue job
/// in flight — the scheduler sweep re-enqueues these.
pub async fn list_overdue(
    pool: &PgPool,
    older_than: DateTime<Utc>,
) -> Result<Vec<ScheduledJobRow>, DbError> {
    let rows = sqlx::query_as::<_, ScheduledJobRow>(
        r#"
        SELECT * FROM scheduled_jobs
        WHERE status = 'active' AND next_run_at IS NOT NULL AND next_run_at < $1
        ORDER BY next_run_at
        "#,
    )
    .bind(older_than)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
