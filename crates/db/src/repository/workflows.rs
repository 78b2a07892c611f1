//! Workflow read operations.
//!
//! Editing workflows is an external collaborator's job; the core only
//! needs to load them for topology construction and trigger resolution.

use sqlx::PgPool;

use crate::{models::WorkflowRow, DbError};

/// Fetch a single workflow by its primary key.
pub async fn get_workflow(pool: &PgPool, id: i64) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>("SELECT * FROM workflows WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)?;
    Ok(row)
}

/// Fetch an active, non-deleted workflow by slug.
pub async fn get_workflow_by_slug(pool: &PgPool, slug: &str) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(
        "SELECT * FROM workflows WHERE slug = $1 AND deleted_at IS NULL",
    )
    .bind(slug)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;
    Ok(row)
}

/// The fallback workflow used when no trigger matches an event.
pub async fn get_default_workflow(pool: &PgPool) -> Result<Option<WorkflowRow>, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(
        r#"
        SELECT * FROM workflows
        WHERE is_active = TRUE AND is_default = TRUE AND deleted_at IS NULL
        ORDER BY id
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
