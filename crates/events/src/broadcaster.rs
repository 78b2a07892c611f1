//! Topic-per-channel event broadcaster.
//!
//! Channels are strings like `workflow:<slug>`, `execution:<id>`,
//! `epic:<id>`. Delivery is fire-and-forget: publishing never blocks the
//! orchestrator and failures are swallowed with a log line. Subscribers
//! that fall behind lose old events (bounded ring buffer).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// Per-channel buffer capacity. Slow subscribers skip ahead past this many
/// events.
const CHANNEL_CAPACITY: usize = 256;

/// Event types published by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    NodeStatus,
    ExecutionStarted,
    ExecutionState,
    ExecutionCompleted,
    ExecutionFailed,
    WorkflowUpdated,
    NodeUpdated,
    EpicCreated,
    EpicUpdated,
    EpicDeleted,
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    TasksDeleted,
}

/// One published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub channel: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: EventType, channel: impl Into<String>, data: Value) -> Self {
        Self {
            event_type,
            channel: channel.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Process-wide pub/sub fabric. Constructed once at startup and injected
/// into consumers.
#[derive(Default)]
pub struct Broadcaster {
    channels: RwLock<HashMap<String, broadcast::Sender<Event>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event to its channel. Returns the number of live
    /// subscribers; zero is not an error.
    pub fn publish(&self, event: Event) -> usize {
        let sender = {
            let channels = self.channels.read();
            channels.get(&event.channel).cloned()
        };
        match sender {
            Some(sender) => sender.send(event).unwrap_or_else(|_| {
                // All receivers dropped between lookup and send.
                0
            }),
            None => {
                debug!(channel = %event.channel, "no subscribers; event dropped");
                0
            }
        }
    }

    /// Subscribe to a channel, creating it on first use.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Event> {
        let mut channels = self.channels.write();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop channels that have no remaining subscribers.
    pub fn prune(&self) {
        let mut channels = self.channels.write();
        channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }
}

/// Channel naming helpers shared by publishers and subscribers.
pub fn execution_channel(execution_id: &str) -> String {
    format!("execution:{execution_id}")
}

pub fn workflow_channel(slug: &str) -> String {
    format!("workflow:{slug}")
}

pub fn epic_channel(epic_id: i64) -> String {
    format!("epic:{epic_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let broadcaster = Broadcaster::new();
        let mut rx = broadcaster.subscribe("execution:abc");

        let delivered = broadcaster.publish(Event::new(
            EventType::NodeStatus,
            "execution:abc",
            json!({"node_id": "a", "status": "success"}),
        ));
        assert_eq!(delivered, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::NodeStatus);
        assert_eq!(event.data["node_id"], "a");
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_a_no_op() {
        let broadcaster = Broadcaster::new();
        let delivered = broadcaster.publish(Event::new(
            EventType::ExecutionStarted,
            "execution:ghost",
            json!({}),
        ));
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let broadcaster = Broadcaster::new();
        let mut rx_a = broadcaster.subscribe("execution:a");
        let _rx_b = broadcaster.subscribe("execution:b");

        broadcaster.publish(Event::new(EventType::NodeStatus, "execution:b", json!({})));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn prune_drops_dead_channels() {
        let broadcaster = Broadcaster::new();
        {
            let _rx = broadcaster.subscribe("workflow:temp");
        }
        assert_eq!(broadcaster.channel_count(), 1);
        broadcaster.prune();
        assert_eq!(broadcaster.channel_count(), 0);
    }

    #[test]
    fn event_serialises_with_type_field() {
        let event = Event::new(EventType::ExecutionCompleted, "execution:x", json!({"ok": true}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "execution_completed");
        assert_eq!(value["channel"], "execution:x");
    }
}
