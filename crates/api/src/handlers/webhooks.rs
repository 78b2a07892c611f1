use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;

use crate::AppState;

/// Webhook intake: the path segment routes through the trigger resolver.
pub async fn handle_webhook(
    Path(path): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let mut event_data = match payload {
        Value::Object(obj) => Value::Object(obj),
        other => serde_json::json!({"body": other}),
    };
    if let Some(obj) = event_data.as_object_mut() {
        obj.insert("path".to_string(), Value::String(path));
    }

    let dispatched =
        engine::triggers::dispatch_event(&state.pool, &state.queue, "webhook", event_data)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    match dispatched {
        Some(execution_id) => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"execution_id": execution_id})),
        )),
        None => Err(StatusCode::NOT_FOUND),
    }
}
