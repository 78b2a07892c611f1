//! Opaque checkpoint store for agent tool-loop state.
//!
//! Keyed by `thread_id`; write-through. The Postgres implementation lives
//! in the `db` crate; the in-memory one here backs unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint store error: {0}")]
    Store(String),
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<Vec<u8>>, CheckpointError>;
    async fn save(&self, thread_id: &str, data: &[u8]) -> Result<(), CheckpointError>;
    async fn delete(&self, thread_id: &str) -> Result<(), CheckpointError>;
}

/// Test/in-process store.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<Vec<u8>>, CheckpointError> {
        Ok(self.entries.lock().unwrap().get(thread_id).cloned())
    }

    async fn save(&self, thread_id: &str, data: &[u8]) -> Result<(), CheckpointError> {
        self.entries
            .lock()
            .unwrap()
            .insert(thread_id.to_string(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<(), CheckpointError> {
        self.entries.lock().unwrap().remove(thread_id);
        Ok(())
    }
}

/// Canonical thread id: `user:chat:workflow` when a chat id is present,
/// else `user:workflow`. The agent and administrative cleanup must agree
/// on this derivation.
pub fn derive_thread_id(user_id: i64, chat_id: Option<i64>, workflow_id: i64) -> String {
    match chat_id {
        Some(chat) => format!("{user_id}:{chat}:{workflow_id}"),
        None => format!("{user_id}:{workflow_id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.load("t1").await.unwrap().is_none());
        store.save("t1", b"snapshot").await.unwrap();
        assert_eq!(store.load("t1").await.unwrap().unwrap(), b"snapshot");
        store.delete("t1").await.unwrap();
        assert!(store.load("t1").await.unwrap().is_none());
    }

    #[test]
    fn thread_id_derivation() {
        assert_eq!(derive_thread_id(7, Some(42), 3), "7:42:3");
        assert_eq!(derive_thread_id(7, None, 3), "7:3");
    }
}
