//! Persists progress reports and fans them out to stream subscribers.
//!
//! Every accepted report extends the item's liveness lease as a side
//! effect of the store write, so a crawl that keeps reporting is never
//! reclaimed by the watchdog.

use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::kernel::pipeline::ProgressUpdate;
use crate::kernel::stream_hub::{item_topic, StreamHub, QUEUE_TOPIC};

use super::events::QueueEvent;
use super::item::QueueItem;
use super::store::QueueStore;

#[derive(Clone)]
pub struct ProgressReporter {
    store: Arc<dyn QueueStore>,
    hub: StreamHub,
}

impl ProgressReporter {
    pub fn new(store: Arc<dyn QueueStore>, hub: StreamHub) -> Self {
        Self { store, hub }
    }

    /// Persist one progress report. Returns false when the item is no
    /// longer running (cancelled or reclaimed mid-crawl); the caller
    /// should stop the pipeline in that case. Nothing is published for
    /// a rejected report.
    pub async fn record(&self, item: &QueueItem, update: &ProgressUpdate) -> Result<bool> {
        let accepted = self
            .store
            .record_progress(item.id, update.progress, &update.stats)
            .await?;
        if !accepted {
            return Ok(false);
        }

        self.publish(&QueueEvent::Progress {
            item_id: item.id,
            source_id: item.source_id.clone(),
            progress: update.progress,
            stats: update.stats,
        })
        .await;
        Ok(true)
    }

    /// Publish a lifecycle event to the item's topic and the aggregate
    /// queue topic. Fire-and-forget: subscribers may or may not exist.
    pub async fn publish(&self, event: &QueueEvent) {
        let payload = match serde_json::to_value(event) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, "failed to serialize queue event");
                return;
            }
        };
        self.hub
            .publish(&item_topic(event.item_id()), payload.clone())
            .await;
        self.hub.publish(QUEUE_TOPIC, payload).await;
    }
}
