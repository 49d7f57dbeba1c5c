//! Command/query facade over the queue.
//!
//! `QueueService` is what the HTTP layer talks to. Every command is a
//! single guarded store write, so commands are safe to run concurrently
//! with the worker: a `stop` cannot race `claim_batch` into an
//! inconsistent state, it either lands before the claim (item never
//! starts) or after it (the status guard bounces the pipeline's next
//! progress write).

use std::sync::Arc;

use tracing::info;

use crate::common::{ItemId, Page, PageArgs};

use super::backoff::RetryPolicy;
use super::error::QueueError;
use super::events::QueueEvent;
use super::item::{ItemStatus, NewQueueItem, QueueItem};
use super::progress::ProgressReporter;
use super::state::{decide_manual_retry, RequeueKind};
use super::store::{EnqueueResult, ItemFilter, QueueStats, QueueStore};
use super::worker::RunningCrawls;

pub struct QueueService {
    store: Arc<dyn QueueStore>,
    reporter: ProgressReporter,
    running: RunningCrawls,
    policy: RetryPolicy,
}

impl QueueService {
    pub fn new(
        store: Arc<dyn QueueStore>,
        reporter: ProgressReporter,
        running: RunningCrawls,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            reporter,
            running,
            policy,
        }
    }

    /// Aggregate queue counts plus the progress of currently running
    /// crawls, in one round trip.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(self.store.stats().await?)
    }

    /// Page through queue items, optionally filtered by status, scope,
    /// or source.
    pub async fn list_items(
        &self,
        filter: ItemFilter,
        page: PageArgs,
    ) -> Result<Page<QueueItem>, QueueError> {
        Ok(self.store.list(&filter, page.validate()).await?)
    }

    pub async fn get_item(&self, id: ItemId) -> Result<QueueItem, QueueError> {
        self.store.get(id).await?.ok_or(QueueError::NotFound(id))
    }

    /// Validate and enqueue a crawl request. An active item for the
    /// same source URL and scope is returned instead of a new row.
    pub async fn enqueue(&self, request: NewQueueItem) -> Result<EnqueueResult, QueueError> {
        request.validate().map_err(QueueError::InvalidRequest)?;

        let result = self.store.enqueue(request).await?;
        if let EnqueueResult::Created(item) = &result {
            info!(item_id = %item.id, source_id = %item.source_id, "crawl enqueued");
            self.reporter
                .publish(&QueueEvent::Enqueued {
                    item_id: item.id,
                    source_id: item.source_id.clone(),
                    scope: item.scope,
                })
                .await;
        }
        Ok(result)
    }

    /// Force a failed or cancelled item back to pending for another
    /// run. Clears the human-review flag and error state; the retry
    /// budget resets or carries over per policy.
    pub async fn retry(&self, id: ItemId) -> Result<QueueItem, QueueError> {
        let item = self.get_item(id).await?;
        if !matches!(item.status, ItemStatus::Failed | ItemStatus::Cancelled) {
            return Err(QueueError::InvalidTransition {
                from: item.status,
                action: "retry",
            });
        }

        let kind = decide_manual_retry(&self.policy);
        if !self.store.requeue(id, kind).await? {
            // Lost a race with the worker or another command.
            let current = self.get_item(id).await?;
            return Err(QueueError::InvalidTransition {
                from: current.status,
                action: "retry",
            });
        }

        info!(
            item_id = %id,
            reset_budget = matches!(kind, RequeueKind::ManualReset),
            "crawl requeued manually"
        );
        self.get_item(id).await
    }

    /// Cancel an item. Pending items never start; running items get
    /// their token fired after the status flip, so a late progress
    /// report bounces off the status guard. Stopping an already
    /// cancelled item is a no-op.
    pub async fn stop(&self, id: ItemId) -> Result<QueueItem, QueueError> {
        let item = self.get_item(id).await?;
        match item.status {
            ItemStatus::Cancelled => return Ok(item),
            ItemStatus::Completed => {
                return Err(QueueError::InvalidTransition {
                    from: item.status,
                    action: "stop",
                })
            }
            _ => {}
        }

        if !self.store.mark_cancelled(id).await? {
            // Raced: either another stop landed (fine) or the item
            // completed underneath us.
            let current = self.get_item(id).await?;
            if current.status == ItemStatus::Cancelled {
                return Ok(current);
            }
            return Err(QueueError::InvalidTransition {
                from: current.status,
                action: "stop",
            });
        }

        // Status is flipped; now stop the local pipeline if the item
        // was running on this instance.
        self.running.cancel(id).await;

        info!(item_id = %id, source_id = %item.source_id, "crawl stopped");
        self.reporter
            .publish(&QueueEvent::Cancelled {
                item_id: id,
                source_id: item.source_id.clone(),
            })
            .await;
        self.get_item(id).await
    }

    /// Hard delete. Any in-flight run is signalled first; its late
    /// writes bounce because the row is gone.
    pub async fn delete(&self, id: ItemId) -> Result<(), QueueError> {
        self.running.cancel(id).await;

        if !self.store.delete(id).await? {
            return Err(QueueError::NotFound(id));
        }
        info!(item_id = %id, "queue item deleted");
        Ok(())
    }
}
