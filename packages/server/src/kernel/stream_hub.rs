//! In-process pub/sub hub for live progress streaming.
//!
//! Topic-keyed broadcast channels connecting the queue (producer side)
//! to SSE endpoints (consumer side). Per-item updates go to
//! `queue:{item_id}`; every update is mirrored onto the aggregate
//! [`QUEUE_TOPIC`] so a dashboard can watch the whole queue on one
//! subscription.
//!
//! Publishing is fire-and-forget: no subscribers means the event is
//! dropped, and a slow subscriber sees `Lagged` rather than exerting
//! backpressure on the worker.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::common::ItemId;

/// Aggregate topic carrying updates for every item.
pub const QUEUE_TOPIC: &str = "queue";

/// Per-item topic name.
pub fn item_topic(id: ItemId) -> String {
    format!("queue:{id}")
}

/// Thread-safe, cloneable hub. Payloads are `serde_json::Value`;
/// producers serialize their own event types.
#[derive(Clone)]
pub struct StreamHub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<serde_json::Value>>>>,
    capacity: usize,
}

impl StreamHub {
    /// Default capacity of 256 buffered messages per topic.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Publish a JSON value to a topic. No-op if nobody is listening.
    pub async fn publish(&self, topic: &str, value: serde_json::Value) {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(topic) {
            // Ignore send errors (no active receivers)
            let _ = tx.send(value);
        }
    }

    /// Subscribe to a topic, creating the channel on first use.
    pub async fn subscribe(&self, topic: &str) -> broadcast::Receiver<serde_json::Value> {
        let mut channels = self.channels.write().await;
        let tx = channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        tx.subscribe()
    }

    /// Drop channels with zero subscribers (housekeeping).
    pub async fn cleanup(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, tx| tx.receiver_count() > 0);
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}
