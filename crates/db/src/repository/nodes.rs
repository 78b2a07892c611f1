//! Node, edge, and component-config read operations.

use sqlx::PgPool;

use crate::{
    models::{ComponentConfigRow, WorkflowEdgeRow, WorkflowNodeRow},
    DbError,
};

/// All nodes of a workflow, ordered by database id (insertion order).
pub async fn list_nodes(pool: &PgPool, workflow_id: i64) -> Result<Vec<WorkflowNodeRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowNodeRow>(
        "SELECT * FROM workflow_nodes WHERE workflow_id = $1 ORDER BY id",
    )
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// All edges of a workflow, ordered by `(priority, id)`.
pub async fn list_edges(pool: &PgPool, workflow_id: i64) -> Result<Vec<WorkflowEdgeRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowEdgeRow>(
        "SELECT * FROM workflow_edges WHERE workflow_id = $1 ORDER BY priority, id",
    )
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Fetch one node by database id.
pub async fn get_node(pool: &PgPool, id: i64) -> Result<WorkflowNodeRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowNodeRow>("SELECT * FROM workflow_nodes WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)?;
    Ok(row)
}

/// Fetch one node by its graph-level id within a workflow.
pub async fn get_node_by_node_id(
    pool: &PgPool,
    workflow_id: i64,
    node_id: &str,
) -> Result<WorkflowNodeRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowNodeRow>(
        "SELECT * FROM workflow_nodes WHERE workflow_id = $1 AND node_id = $2",
    )
    .bind(workflow_id)
    .bind(node_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;
    Ok(row)
}

/// Fetch a component config by primary key.
pub async fn get_component_config(pool: &PgPool, id: i64) -> Result<ComponentConfigRow, DbError> {
    let row =
        sqlx::query_as::<_, ComponentConfigRow>("SELECT * FROM component_configs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or(DbError::NotFound)?;
    Ok(row)
}

/// All trigger nodes of a given component type on active, non-deleted
/// workflows, ordered by node id. The trigger resolver re-orders by
/// config priority afterwards.
pub async fn list_trigger_nodes(
    pool: &PgPool,
    component_type: &str,
) -> Result<Vec<WorkflowNodeRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowNodeRow>(
        r#"
        SELECT n.* FROM workflow_nodes n
        JOIN workflows w ON w.id = n.workflow_id
        WHERE n.component_type = $1
          AND w.is_active = TRUE
          AND w.deleted_at IS NULL
        ORDER BY n.id
        "#,
    )
    .bind(component_type)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// First trigger node of the given type on a specific workflow, if any.
pub async fn get_trigger_node_for_workflow(
    pool: &PgPool,
    workflow_id: i64,
    component_type: &str,
) -> Result<Option<WorkflowNodeRow>, DbError> {
    let row = sqlx::query_as::<_, WorkflowNodeRow>(
        r#"
        SELECT * FROM workflow_nodes
        WHERE workflow_id = $1 AND component_type = $2
        ORDER BY id
        LIMIT 1
        "#,
    )
    .bind(workflow_id)
    .bind(component_type)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
