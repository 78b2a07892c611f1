//! Process-wide services constructed at startup and injected into the
//! orchestrator, plus the adapters binding the components crate to the
//! database and the event broadcaster.

use std::sync::Arc;

use async_trait::async_trait;
use components::checkpoint::{CheckpointError, CheckpointStore};
use components::llm::LlmClient;
use components::tool_node::{HostTools, NoHostTools};
use components::traits::{ActivitySink, ToolActivity};
use db::repository::checkpoints as checkpoints_repo;
use db::DbPool;
use events::broadcaster::execution_channel;
use events::{Broadcaster, Event, EventType};
use serde_json::json;
use tracing::warn;

// ---------------------------------------------------------------------------
// Postgres-backed checkpoint store
// ---------------------------------------------------------------------------

pub struct PgCheckpointStore {
    pool: DbPool,
}

impl PgCheckpointStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<Vec<u8>>, CheckpointError> {
        checkpoints_repo::load_checkpoint(&self.pool, thread_id)
            .await
            .map_err(|e| CheckpointError::Store(e.to_string()))
    }

    async fn save(&self, thread_id: &str, data: &[u8]) -> Result<(), CheckpointError> {
        checkpoints_repo::save_checkpoint(&self.pool, thread_id, data)
            .await
            .map_err(|e| CheckpointError::Store(e.to_string()))
    }

    async fn delete(&self, thread_id: &str) -> Result<(), CheckpointError> {
        checkpoints_repo::delete_checkpoint(&self.pool, thread_id)
            .await
            .map(|_| ())
            .map_err(|e| CheckpointError::Store(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tool activity → broadcaster adapter
// ---------------------------------------------------------------------------

/// Publishes agent tool activity as `node_status` events on the
/// execution's channel, tagged with the parent node.
pub struct BroadcastActivitySink {
    broadcaster: Arc<Broadcaster>,
    execution_id: String,
}

impl BroadcastActivitySink {
    pub fn new(broadcaster: Arc<Broadcaster>, execution_id: String) -> Self {
        Self {
            broadcaster,
            execution_id,
        }
    }
}

impl ActivitySink for BroadcastActivitySink {
    fn tool_activity(&self, activity: ToolActivity) {
        let data = match serde_json::to_value(&activity) {
            Ok(value) => value,
            Err(err) => {
                warn!("tool activity serialisation failed: {err}");
                return;
            }
        };
        self.broadcaster.publish(Event::new(
            EventType::NodeStatus,
            execution_channel(&self.execution_id),
            json!({"tool_activity": data}),
        ));
    }
}

// ---------------------------------------------------------------------------
// The service bundle
// ---------------------------------------------------------------------------

/// Everything the orchestrator needs beyond the database pool. Constructed
/// once at startup with explicit shutdown; injected, never global.
#[derive(Clone)]
pub struct EngineServices {
    pub llm: Arc<dyn LlmClient>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub host_tools: Arc<dyn HostTools>,
    pub http: reqwest::Client,
    pub broadcaster: Arc<Broadcaster>,
}

impl EngineServices {
    pub fn new(pool: DbPool, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            checkpoints: Arc::new(PgCheckpointStore::new(pool)),
            host_tools: Arc::new(NoHostTools),
            http: reqwest::Client::new(),
            broadcaster: Arc::new(Broadcaster::new()),
        }
    }

    pub fn with_host_tools(mut self, host_tools: Arc<dyn HostTools>) -> Self {
        self.host_tools = host_tools;
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<Broadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }
}
