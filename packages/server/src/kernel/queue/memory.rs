//! In-memory queue store.
//!
//! Mirrors `PostgresQueueStore` semantics over a mutex-guarded map so
//! worker and facade logic can be exercised without a database. The
//! single write lock plays the role of `FOR UPDATE SKIP LOCKED`:
//! claims serialize, so concurrent claimers never overlap.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::common::{ItemId, Page, ValidatedPageArgs};

use super::error::CrawlError;
use super::item::{CrawlStats, ItemStatus, NewQueueItem, QueueItem, StatsDelta};
use super::state::{FailureOutcome, RequeueKind};
use super::store::{
    ActiveCrawl, EnqueueResult, ItemFilter, QueueStats, QueueStore, DEFAULT_LIVENESS_TIMEOUT_SECS,
};

pub struct MemoryQueueStore {
    items: RwLock<HashMap<ItemId, QueueItem>>,
    liveness_timeout_secs: i64,
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            liveness_timeout_secs: DEFAULT_LIVENESS_TIMEOUT_SECS,
        }
    }

    pub fn with_liveness_timeout(secs: i64) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            liveness_timeout_secs: secs,
        }
    }

    /// Insert a row as-is, bypassing enqueue validation and duplicate
    /// checks. Lets tests seed arbitrary lifecycle states.
    pub fn seed(&self, item: QueueItem) {
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(item.id, item);
    }

    /// Snapshot of every stored row.
    pub fn all_items(&self) -> Vec<QueueItem> {
        self.items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn eligible_sort_key(item: &QueueItem) -> DateTime<Utc> {
        item.next_retry_at.unwrap_or(item.created_at)
    }

    fn reset_run_state(item: &mut QueueItem) {
        item.progress = 0;
        item.statistics = CrawlStats::default();
        item.next_retry_at = None;
        item.lease_expires_at = None;
        item.worker_id = None;
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, req: NewQueueItem) -> Result<EnqueueResult> {
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());

        let duplicate = items
            .values()
            .find(|i| {
                i.source_url == req.source_url
                    && i.scope == req.scope
                    && matches!(i.status, ItemStatus::Pending | ItemStatus::Running)
            })
            .cloned();
        if let Some(existing) = duplicate {
            return Ok(EnqueueResult::Duplicate(existing));
        }

        let item = QueueItem::for_request(&req);
        items.insert(item.id, item.clone());

        Ok(EnqueueResult::Created(item))
    }

    async fn claim_batch(&self, worker_id: &str, limit: i64) -> Result<Vec<QueueItem>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());

        let mut eligible: Vec<ItemId> = items
            .values()
            .filter(|i| i.is_eligible(now))
            .map(|i| i.id)
            .collect();
        eligible.sort_by(|a, b| {
            let ia = &items[a];
            let ib = &items[b];
            ib.priority
                .cmp(&ia.priority)
                .then(Self::eligible_sort_key(ia).cmp(&Self::eligible_sort_key(ib)))
        });

        let mut claimed = Vec::new();
        for id in eligible.into_iter().take(limit as usize) {
            if let Some(item) = items.get_mut(&id) {
                item.status = ItemStatus::Running;
                item.started_at = Some(now);
                item.lease_expires_at = Some(now + Duration::seconds(self.liveness_timeout_secs));
                item.worker_id = Some(worker_id.to_string());
                item.updated_at = now;
                claimed.push(item.clone());
            }
        }

        Ok(claimed)
    }

    async fn record_progress(
        &self,
        id: ItemId,
        progress: Option<i32>,
        stats: &StatsDelta,
    ) -> Result<bool> {
        let now = Utc::now();
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());

        let Some(item) = items.get_mut(&id) else {
            return Ok(false);
        };
        if item.status != ItemStatus::Running {
            return Ok(false);
        }

        if let Some(p) = progress {
            item.progress = item.progress.max(p).min(100);
        }
        item.statistics.apply(stats);
        item.lease_expires_at = Some(now + Duration::seconds(self.liveness_timeout_secs));
        item.updated_at = now;

        Ok(true)
    }

    async fn mark_completed(&self, id: ItemId) -> Result<bool> {
        let now = Utc::now();
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());

        let Some(item) = items.get_mut(&id) else {
            return Ok(false);
        };
        if item.status != ItemStatus::Running {
            return Ok(false);
        }

        item.status = ItemStatus::Completed;
        item.progress = 100;
        item.completed_at = Some(now);
        item.last_crawled_at = Some(now);
        item.error_message = None;
        item.error_kind = None;
        item.error_details = None;
        item.next_retry_at = None;
        item.lease_expires_at = None;
        item.worker_id = None;
        item.updated_at = now;

        Ok(true)
    }

    async fn mark_failed(
        &self,
        id: ItemId,
        error: &CrawlError,
        outcome: &FailureOutcome,
    ) -> Result<bool> {
        let now = Utc::now();
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());

        let Some(item) = items.get_mut(&id) else {
            return Ok(false);
        };
        if item.status != ItemStatus::Running {
            return Ok(false);
        }

        item.error_message = Some(error.message.clone());
        item.error_kind = Some(error.kind);
        item.error_details = error.details.clone();

        match outcome {
            FailureOutcome::Retry {
                retry_count,
                next_retry_at,
            } => {
                item.status = ItemStatus::Pending;
                item.retry_count = *retry_count;
                item.last_retry_at = Some(now);
                Self::reset_run_state(item);
                item.next_retry_at = Some(*next_retry_at);
            }
            FailureOutcome::Escalate { retry_count } => {
                item.status = ItemStatus::Failed;
                item.retry_count = *retry_count;
                item.requires_human_review = true;
                item.next_retry_at = None;
                item.lease_expires_at = None;
                item.worker_id = None;
            }
        }
        item.updated_at = now;

        Ok(true)
    }

    async fn mark_cancelled(&self, id: ItemId) -> Result<bool> {
        let now = Utc::now();
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());

        let Some(item) = items.get_mut(&id) else {
            return Ok(false);
        };
        if !matches!(
            item.status,
            ItemStatus::Pending | ItemStatus::Running | ItemStatus::Failed
        ) {
            return Ok(false);
        }

        item.status = ItemStatus::Cancelled;
        item.requires_human_review = false;
        item.next_retry_at = None;
        item.lease_expires_at = None;
        item.worker_id = None;
        item.updated_at = now;

        Ok(true)
    }

    async fn requeue(&self, id: ItemId, kind: RequeueKind) -> Result<bool> {
        let now = Utc::now();
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());

        let Some(item) = items.get_mut(&id) else {
            return Ok(false);
        };
        if !matches!(item.status, ItemStatus::Failed | ItemStatus::Cancelled) {
            return Ok(false);
        }

        item.status = ItemStatus::Pending;
        if matches!(kind, RequeueKind::ManualReset) {
            item.retry_count = 0;
        }
        item.requires_human_review = false;
        item.error_message = None;
        item.error_kind = None;
        item.error_details = None;
        item.last_retry_at = Some(now);
        item.started_at = None;
        item.completed_at = None;
        Self::reset_run_state(item);
        item.updated_at = now;

        Ok(true)
    }

    async fn reclaim_stalled(&self) -> Result<Vec<ItemId>> {
        let now = Utc::now();
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());

        let mut reclaimed = Vec::new();
        for item in items.values_mut() {
            let expired = item.status == ItemStatus::Running
                && item.lease_expires_at.is_some_and(|at| at < now);
            if expired {
                item.status = ItemStatus::Pending;
                Self::reset_run_state(item);
                item.updated_at = now;
                reclaimed.push(item.id);
            }
        }

        Ok(reclaimed)
    }

    async fn get(&self, id: ItemId) -> Result<Option<QueueItem>> {
        Ok(self
            .items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned())
    }

    async fn list(&self, filter: &ItemFilter, page: ValidatedPageArgs) -> Result<Page<QueueItem>> {
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());

        let mut matched: Vec<QueueItem> = items
            .values()
            .filter(|i| filter.status.is_none_or(|s| i.status == s))
            .filter(|i| filter.scope.is_none_or(|s| i.scope == s))
            .filter(|i| {
                filter
                    .source_id
                    .as_ref()
                    .is_none_or(|s| &i.source_id == s)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matched.len() as i64;
        let window: Vec<QueueItem> = matched
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect();

        Ok(Page::new(window, total, page))
    }

    async fn delete(&self, id: ItemId) -> Result<bool> {
        Ok(self
            .items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());

        let mut stats = QueueStats::default();
        let mut running: Vec<&QueueItem> = Vec::new();
        for item in items.values() {
            match item.status {
                ItemStatus::Pending => stats.pending += 1,
                ItemStatus::Running => stats.running += 1,
                ItemStatus::Completed => stats.completed += 1,
                ItemStatus::Failed => stats.failed += 1,
                ItemStatus::Cancelled => stats.cancelled += 1,
            }
            if item.requires_human_review {
                stats.requires_review += 1;
            }
            if item.status == ItemStatus::Running {
                running.push(item);
            }
        }

        running.sort_by_key(|i| i.started_at);
        stats.actively_crawling = running
            .into_iter()
            .map(|i| ActiveCrawl {
                id: i.id,
                source_id: i.source_id.clone(),
                progress: i.progress,
            })
            .collect();

        Ok(stats)
    }
}
