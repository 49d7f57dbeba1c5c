//! Queue item model: one crawl or recrawl of a documentation source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::common::{BatchId, ItemId};

use super::error::CrawlErrorKind;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "queue_item_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ItemStatus {
    /// Terminal states never re-enter the queue on their own.
    /// Failed is deliberately not terminal: retry can requeue it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "crawl_scope", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CrawlScope {
    #[default]
    Global,
    Project,
    User,
}

// ============================================================================
// Statistics
// ============================================================================

/// Per-item crawl counters. Monotonically non-decreasing while running,
/// frozen at whatever the pipeline last reported once the item leaves
/// the running state.
#[derive(FromRow, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CrawlStats {
    pub pages_crawled: i32,
    pub chunks_created: i32,
    pub code_examples_count: i32,
    pub embeddings_generated: i32,
}

/// Incremental counter updates reported by the pipeline. Values are
/// deltas, not totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StatsDelta {
    #[serde(default)]
    pub pages_crawled: i32,
    #[serde(default)]
    pub chunks_created: i32,
    #[serde(default)]
    pub code_examples_count: i32,
    #[serde(default)]
    pub embeddings_generated: i32,
}

impl StatsDelta {
    pub fn is_empty(&self) -> bool {
        *self == StatsDelta::default()
    }

    pub fn pages(n: i32) -> Self {
        StatsDelta {
            pages_crawled: n,
            ..Default::default()
        }
    }
}

impl CrawlStats {
    /// Applies a delta, saturating rather than wrapping on overflow.
    pub fn apply(&mut self, delta: &StatsDelta) {
        self.pages_crawled = self.pages_crawled.saturating_add(delta.pages_crawled.max(0));
        self.chunks_created = self
            .chunks_created
            .saturating_add(delta.chunks_created.max(0));
        self.code_examples_count = self
            .code_examples_count
            .saturating_add(delta.code_examples_count.max(0));
        self.embeddings_generated = self
            .embeddings_generated
            .saturating_add(delta.embeddings_generated.max(0));
    }
}

// ============================================================================
// QueueItem Model
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct QueueItem {
    #[builder(default = ItemId::new())]
    pub id: ItemId,

    // Core identity
    #[builder(default, setter(strip_option))]
    pub batch_id: Option<BatchId>,
    pub source_id: String,
    pub source_url: String,
    #[builder(default)]
    pub source_title: String,
    #[builder(default)]
    pub scope: CrawlScope,

    // Scheduling
    #[builder(default = 0)]
    pub priority: i32,
    #[builder(default)]
    pub status: ItemStatus,

    // Retry budget
    #[builder(default = 0)]
    pub retry_count: i32,
    #[builder(default = 3)]
    pub max_retries: i32,
    #[builder(default = false)]
    pub requires_human_review: bool,

    // Lease management
    #[builder(default, setter(strip_option))]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub worker_id: Option<String>,

    // Error tracking
    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,
    #[builder(default, setter(strip_option))]
    pub error_kind: Option<CrawlErrorKind>,
    #[builder(default, setter(strip_option))]
    pub error_details: Option<serde_json::Value>,

    // Progress
    #[builder(default = 0)]
    pub progress: i32,
    #[builder(default)]
    #[sqlx(flatten)]
    #[serde(default)]
    pub statistics: CrawlStats,

    // Timestamps
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub last_retry_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub last_crawled_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Builds a fresh pending row from an enqueue request.
    pub fn for_request(req: &NewQueueItem) -> Self {
        let source_title = if req.source_title.trim().is_empty() {
            req.source_url.clone()
        } else {
            req.source_title.clone()
        };
        Self {
            id: ItemId::new(),
            batch_id: req.batch_id,
            source_id: req.source_id.clone(),
            source_url: req.source_url.clone(),
            source_title,
            scope: req.scope,
            priority: req.priority,
            status: ItemStatus::Pending,
            retry_count: 0,
            max_retries: req.max_retries,
            requires_human_review: false,
            lease_expires_at: None,
            worker_id: None,
            error_message: None,
            error_kind: None,
            error_details: None,
            progress: 0,
            statistics: CrawlStats::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_retry_at: None,
            next_retry_at: None,
            last_crawled_at: None,
        }
    }

    /// Whether a poller may claim this item right now.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        if self.status != ItemStatus::Pending {
            return false;
        }

        match self.next_retry_at {
            None => true,
            Some(at) => at <= now,
        }
    }

    /// Whether automatic retries remain in the budget.
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

// ============================================================================
// Enqueue request
// ============================================================================

/// Input for enqueueing a crawl. `source_title` defaults to the URL when
/// the caller leaves it empty.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewQueueItem {
    pub source_id: String,
    pub source_url: String,
    #[builder(default)]
    #[serde(default)]
    pub source_title: String,
    #[builder(default)]
    #[serde(default)]
    pub scope: CrawlScope,
    #[builder(default = 0)]
    #[serde(default)]
    pub priority: i32,
    #[builder(default = 3)]
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub batch_id: Option<BatchId>,
}

fn default_max_retries() -> i32 {
    3
}

impl NewQueueItem {
    /// Validates the request. Every item gets at least one automatic
    /// attempt, so `max_retries` has a floor of 1.
    pub fn validate(&self) -> Result<(), String> {
        if self.source_id.trim().is_empty() {
            return Err("source_id must not be empty".to_string());
        }
        if self.source_url.trim().is_empty() {
            return Err("source_url must not be empty".to_string());
        }
        if self.max_retries < 1 {
            return Err("max_retries must be at least 1".to_string());
        }
        Ok(())
    }
}
