//! `api` crate — the HTTP surfaces the core consumes and exposes.
//!
//! Exposes:
//!   POST   /webhook/:path
//!   POST   /api/v1/workflows/:id/execute
//!   GET    /api/v1/executions/:id
//!   GET    /api/v1/executions/:id/logs
//!   POST   /api/v1/executions/:id/resume
//!   DELETE /api/v1/executions/:id
//!   GET    /api/v1/executions/:id/events   (SSE)
//!
//! Workflow editing CRUD lives in the surrounding platform, not here.

pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use db::DbPool;
use engine::Orchestrator;
use events::Broadcaster;
use queue::JobQueue;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub queue: JobQueue,
    pub orchestrator: Arc<Orchestrator>,
    pub broadcaster: Arc<Broadcaster>,
}

pub async fn serve(bind: &str, state: AppState) -> Result<(), std::io::Error> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_router = Router::new()
        .route(
            "/workflows/:id/execute",
            post(handlers::executions::execute),
        )
        .route(
            "/executions/:id",
            get(handlers::executions::get).delete(handlers::executions::cancel),
        )
        .route("/executions/:id/logs", get(handlers::executions::logs))
        .route("/executions/:id/resume", post(handlers::executions::resume))
        .route("/executions/:id/events", get(handlers::events::stream));

    let app = Router::new()
        .nest("/api/v1", api_router)
        .route("/webhook/:path", post(handlers::webhooks::handle_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await
}
