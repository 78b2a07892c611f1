//! Engine-level error types.

use components::ComponentError;
use thiserror::Error;

/// Errors produced by the engine (topology construction, orchestration,
/// scheduling, trigger resolution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// The workflow definition cannot be compiled into a topology.
    #[error("invalid workflow: {0}")]
    Validation(String),

    // ------ Execution errors ------

    /// A component failed; carries retry classification and error code.
    #[error(transparent)]
    Component(#[from] ComponentError),

    /// The persisted execution state no longer deserialises.
    #[error("corrupt execution state: {0}")]
    State(String),

    // ------ Infrastructure ------

    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    #[error("queue error: {0}")]
    Queue(#[from] queue::QueueError),
}
