use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use db::repository::{executions as exec_repo, logs as logs_repo};
use queue::Job;
use serde_json::Value;
use uuid::Uuid;

use crate::AppState;

#[derive(serde::Deserialize)]
pub struct ExecuteWorkflowDto {
    #[serde(default)]
    pub input: Value,
}

/// Fire a manual run of one workflow.
pub async fn execute(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(payload): Json<ExecuteWorkflowDto>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let execution_id = engine::triggers::dispatch_to_workflow(
        &state.pool,
        &state.queue,
        id,
        "trigger_manual",
        payload.input,
        0,
    )
    .await
    .map_err(|err| match err {
        engine::EngineError::Database(db::DbError::NotFound) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"execution_id": execution_id})),
    ))
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<db::models::WorkflowExecutionRow>, StatusCode> {
    match exec_repo::get_execution(&state.pool, id).await {
        Ok(execution) => Ok(Json(execution)),
        Err(db::DbError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

pub async fn logs(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Vec<db::models::ExecutionLogRow>>, StatusCode> {
    match logs_repo::list_logs(&state.pool, id).await {
        Ok(logs) => Ok(Json(logs)),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

#[derive(serde::Deserialize)]
pub struct ResumeDto {
    pub input: Value,
}

/// Resume an interrupted execution (human confirmation answer).
pub async fn resume(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<ResumeDto>,
) -> Result<StatusCode, StatusCode> {
    // Existence check so callers get a 404 rather than a silent accept.
    if matches!(
        exec_repo::get_execution(&state.pool, id).await,
        Err(db::DbError::NotFound)
    ) {
        return Err(StatusCode::NOT_FOUND);
    }

    state
        .queue
        .enqueue(Job::ResumeWorkflowJob {
            execution_id: id,
            user_input: payload.input,
        })
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(StatusCode::ACCEPTED)
}

/// Cancel an execution; cascades to children.
pub async fn cancel(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, StatusCode> {
    match state.orchestrator.cancel_execution(id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(engine::EngineError::Database(db::DbError::NotFound)) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
