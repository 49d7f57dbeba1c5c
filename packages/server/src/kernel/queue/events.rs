//! Queue lifecycle events.
//!
//! Facts about what happened to an item, not commands. They are
//! published to the stream hub for SSE subscribers; the `type` tag and
//! snake_case payloads are the wire format dashboards consume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::ItemId;

use super::error::CrawlErrorKind;
use super::item::{CrawlScope, CrawlStats, StatsDelta};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A new item entered the queue.
    Enqueued {
        item_id: ItemId,
        source_id: String,
        scope: CrawlScope,
    },

    /// A worker claimed the item and the crawl began.
    Started {
        item_id: ItemId,
        source_id: String,
        worker_id: String,
        retry_count: i32,
    },

    /// Incremental progress from the running crawl. `stats` carries
    /// counter deltas, not totals.
    Progress {
        item_id: ItemId,
        source_id: String,
        progress: Option<i32>,
        stats: StatsDelta,
    },

    /// The crawl finished; `statistics` are the final totals.
    Completed {
        item_id: ItemId,
        source_id: String,
        statistics: CrawlStats,
    },

    /// The crawl failed. `will_retry` distinguishes a scheduled retry
    /// from escalation to human review.
    Failed {
        item_id: ItemId,
        source_id: String,
        error: String,
        error_kind: CrawlErrorKind,
        retry_count: i32,
        will_retry: bool,
        next_retry_at: Option<DateTime<Utc>>,
    },

    /// The item was stopped by an operator.
    Cancelled { item_id: ItemId, source_id: String },

    /// A stalled running item was returned to pending by the watchdog.
    Reclaimed { item_id: ItemId },
}

impl QueueEvent {
    pub fn item_id(&self) -> ItemId {
        match self {
            QueueEvent::Enqueued { item_id, .. }
            | QueueEvent::Started { item_id, .. }
            | QueueEvent::Progress { item_id, .. }
            | QueueEvent::Completed { item_id, .. }
            | QueueEvent::Failed { item_id, .. }
            | QueueEvent::Cancelled { item_id, .. }
            | QueueEvent::Reclaimed { item_id } => *item_id,
        }
    }

    /// Wire name of the variant, used as the SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            QueueEvent::Enqueued { .. } => "enqueued",
            QueueEvent::Started { .. } => "started",
            QueueEvent::Progress { .. } => "progress",
            QueueEvent::Completed { .. } => "completed",
            QueueEvent::Failed { .. } => "failed",
            QueueEvent::Cancelled { .. } => "cancelled",
            QueueEvent::Reclaimed { .. } => "reclaimed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_progress_serializes_with_type_tag() {
        let event = QueueEvent::Progress {
            item_id: ItemId::new(),
            source_id: "src-1".to_string(),
            progress: Some(40),
            stats: StatsDelta::pages(3),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"progress\""));
        assert!(json.contains("\"pages_crawled\":3"));
    }

    #[test]
    fn event_failed_serializes_retry_decision() {
        let event = QueueEvent::Failed {
            item_id: ItemId::new(),
            source_id: "src-1".to_string(),
            error: "connection refused".to_string(),
            error_kind: CrawlErrorKind::Network,
            retry_count: 1,
            will_retry: true,
            next_retry_at: Some(Utc::now()),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"failed\""));
        assert!(json.contains("will_retry"));
        assert!(json.contains("connection refused"));
    }

    #[test]
    fn event_completed_serializes_final_totals() {
        let event = QueueEvent::Completed {
            item_id: ItemId::new(),
            source_id: "src-1".to_string(),
            statistics: CrawlStats {
                pages_crawled: 12,
                chunks_created: 80,
                code_examples_count: 5,
                embeddings_generated: 80,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"completed\""));
        assert!(json.contains("\"pages_crawled\":12"));
    }

    #[test]
    fn events_roundtrip_serialize() {
        let events = vec![
            QueueEvent::Enqueued {
                item_id: ItemId::new(),
                source_id: "src-1".to_string(),
                scope: CrawlScope::Global,
            },
            QueueEvent::Started {
                item_id: ItemId::new(),
                source_id: "src-1".to_string(),
                worker_id: "worker-1".to_string(),
                retry_count: 0,
            },
            QueueEvent::Failed {
                item_id: ItemId::new(),
                source_id: "src-1".to_string(),
                error: "err".to_string(),
                error_kind: CrawlErrorKind::Timeout,
                retry_count: 3,
                will_retry: false,
                next_retry_at: None,
            },
            QueueEvent::Cancelled {
                item_id: ItemId::new(),
                source_id: "src-1".to_string(),
            },
            QueueEvent::Reclaimed {
                item_id: ItemId::new(),
            },
        ];

        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let _: QueueEvent = serde_json::from_str(&json).unwrap();
        }
    }

    #[test]
    fn kind_matches_serialized_tag() {
        let event = QueueEvent::Reclaimed {
            item_id: ItemId::new(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.kind());
    }
}
