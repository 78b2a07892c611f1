use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use futures::stream::Stream;
use uuid::Uuid;

use crate::AppState;

/// Live progress for one execution as server-sent events. Subscribers that
/// fall behind skip ahead; this surface is observational, not durable.
pub async fn stream(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let channel = events::broadcaster::execution_channel(&id.to_string());
    let rx = state.broadcaster.subscribe(&channel);

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let sse = SseEvent::default()
                        .event(serde_json::to_value(event.event_type)
                            .ok()
                            .and_then(|v| v.as_str().map(str::to_string))
                            .unwrap_or_else(|| "message".to_string()))
                        .json_data(&event)
                        .unwrap_or_else(|_| SseEvent::default().data("{}"));
                    return Some((Ok(sse), rx));
                }
                // Lagged: drop missed events and keep streaming.
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
