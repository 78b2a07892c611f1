//! Queue-level error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    #[error("payload encode/decode error: {0}")]
    Payload(#[from] serde_json::Error),
}
