//! Background worker that drives claimed items through the crawl
//! pipeline.
//!
//! The `QueueWorker` is a long-running service that, on every tick:
//! - returns stalled items (expired liveness lease) to pending
//! - claims a batch of eligible pending items
//! - spawns one task per claimed item to consume its pipeline stream
//!
//! # Architecture
//!
//! ```text
//! QueueWorker
//!     │
//!     ├─► reclaim_stalled (watchdog pass)
//!     ├─► claim_batch (FOR UPDATE SKIP LOCKED under the hood)
//!     └─► per item: CrawlPipeline::invoke
//!             ├─► Ok(update)  → ProgressReporter::record (extends lease)
//!             ├─► Err(error)  → decide_failure → retry or escalate
//!             └─► stream end  → mark_completed
//! ```
//!
//! Item tasks are not joined at the end of a tick: a long crawl keeps
//! running while the worker continues to reclaim and claim. The batch
//! size caps how many crawls are in flight at once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::common::ItemId;
use crate::kernel::pipeline::CrawlPipeline;

use super::backoff::RetryPolicy;
use super::error::CrawlError;
use super::events::QueueEvent;
use super::item::{CrawlStats, QueueItem};
use super::progress::ProgressReporter;
use super::state::{decide_failure, FailureOutcome};
use super::store::QueueStore;

/// Configuration for the queue worker.
#[derive(Debug, Clone)]
pub struct QueueWorkerConfig {
    /// Maximum number of crawls in flight at once; also the claim limit
    pub batch_size: i64,
    /// How long to wait between polls
    pub poll_interval: Duration,
    /// Worker ID for this instance
    pub worker_id: String,
}

impl Default for QueueWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            poll_interval: Duration::from_secs(30),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

impl QueueWorkerConfig {
    /// Create a new config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

/// Cancellation tokens for crawls currently in flight on this instance.
///
/// Shared between the worker (registers and removes entries) and the
/// command facade (fires a token when an operator stops an item). An
/// item running on another instance has no entry here; stopping it
/// still works because the status flip makes its next progress write
/// bounce.
#[derive(Clone, Default)]
pub struct RunningCrawls {
    inner: Arc<RwLock<HashMap<ItemId, CancellationToken>>>,
}

impl RunningCrawls {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, id: ItemId, token: CancellationToken) {
        self.inner.write().await.insert(id, token);
    }

    pub async fn remove(&self, id: ItemId) {
        self.inner.write().await.remove(&id);
    }

    /// Fire the token for one item. Returns false when the item is not
    /// running on this instance.
    pub async fn cancel(&self, id: ItemId) -> bool {
        match self.inner.read().await.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn cancel_all(&self) {
        for token in self.inner.read().await.values() {
            token.cancel();
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// How one pipeline run ended, before the terminal store write.
enum RunOutcome {
    /// Stream ended cleanly.
    Succeeded,
    /// Stream yielded its terminal error.
    Failed(CrawlError),
    /// A progress write bounced: the item was cancelled or reclaimed
    /// underneath us, so the run has no terminal write to make.
    Abandoned,
    /// The cancellation token fired (operator stop or shutdown).
    Interrupted,
}

/// Background service that processes queue items.
///
/// The worker polls for items, consumes each item's pipeline stream,
/// and records the terminal state. Retry scheduling is decided here
/// and persisted through the store.
#[derive(Clone)]
pub struct QueueWorker {
    store: Arc<dyn QueueStore>,
    pipeline: Arc<dyn CrawlPipeline>,
    reporter: ProgressReporter,
    running: RunningCrawls,
    policy: RetryPolicy,
    config: QueueWorkerConfig,
}

impl QueueWorker {
    /// Create a new worker with default configuration.
    pub fn new(
        store: Arc<dyn QueueStore>,
        pipeline: Arc<dyn CrawlPipeline>,
        reporter: ProgressReporter,
        running: RunningCrawls,
    ) -> Self {
        Self {
            store,
            pipeline,
            reporter,
            running,
            policy: RetryPolicy::default(),
            config: QueueWorkerConfig::default(),
        }
    }

    /// Create with custom retry policy and configuration.
    pub fn with_config(
        store: Arc<dyn QueueStore>,
        pipeline: Arc<dyn CrawlPipeline>,
        reporter: ProgressReporter,
        running: RunningCrawls,
        policy: RetryPolicy,
        config: QueueWorkerConfig,
    ) -> Self {
        Self {
            store,
            pipeline,
            reporter,
            running,
            policy,
            config,
        }
    }

    /// Run the worker until the shutdown token fires.
    ///
    /// On shutdown, in-flight crawls are cancelled and given a grace
    /// period to wind down. Items still running after that keep their
    /// lease and are reclaimed by the next watchdog pass.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "queue worker starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            self.reclaim_stalled().await;

            let claimed = self.claim_and_dispatch(&shutdown).await;

            // A full batch means there is likely a backlog: poll again
            // right away instead of sleeping.
            if claimed > 0 && claimed == self.config.batch_size {
                continue;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        self.drain().await;
        info!(worker_id = %self.config.worker_id, "queue worker stopped");
        Ok(())
    }

    /// Watchdog pass: return items with an expired lease to pending.
    async fn reclaim_stalled(&self) {
        match self.store.reclaim_stalled().await {
            Ok(ids) => {
                for item_id in ids {
                    warn!(item_id = %item_id, "reclaimed stalled crawl");
                    self.reporter
                        .publish(&QueueEvent::Reclaimed { item_id })
                        .await;
                }
            }
            Err(error) => {
                error!(error = %error, "failed to reclaim stalled items");
            }
        }
    }

    /// Claim up to the free capacity and spawn a task per item.
    /// Returns the number of items claimed.
    async fn claim_and_dispatch(&self, shutdown: &CancellationToken) -> i64 {
        let in_flight = self.running.len().await as i64;
        let capacity = self.config.batch_size.saturating_sub(in_flight);
        if capacity <= 0 {
            return 0;
        }

        let items = match self
            .store
            .claim_batch(&self.config.worker_id, capacity)
            .await
        {
            Ok(items) => items,
            Err(error) => {
                error!(error = %error, "failed to claim queue items");
                tokio::time::sleep(Duration::from_secs(1)).await;
                return 0;
            }
        };

        if items.is_empty() {
            return 0;
        }
        debug!(count = items.len(), "claimed queue items");

        let claimed = items.len() as i64;
        for item in items {
            let cancel = shutdown.child_token();
            self.running.register(item.id, cancel.clone()).await;

            let worker = self.clone();
            tokio::spawn(async move {
                worker.process_item(item, cancel).await;
            });
        }
        claimed
    }

    /// Drive one claimed item to its terminal state.
    async fn process_item(self, item: QueueItem, cancel: CancellationToken) {
        let item_id = item.id;
        let source_id = item.source_id.clone();

        info!(
            item_id = %item_id,
            source_id = %source_id,
            retry_count = item.retry_count,
            "crawl started"
        );
        self.reporter
            .publish(&QueueEvent::Started {
                item_id,
                source_id: source_id.clone(),
                worker_id: self.config.worker_id.clone(),
                retry_count: item.retry_count,
            })
            .await;

        match self.consume_pipeline(&item, cancel).await {
            RunOutcome::Succeeded => self.finish_success(&item).await,
            RunOutcome::Failed(error) => self.finish_failure(&item, error).await,
            RunOutcome::Abandoned => {
                debug!(item_id = %item_id, "item left the running state mid-crawl; dropping pipeline");
            }
            RunOutcome::Interrupted => {
                info!(item_id = %item_id, "crawl interrupted; no terminal write");
            }
        }

        self.running.remove(item_id).await;
    }

    /// Consume the pipeline stream until it ends, errors, or the token
    /// fires. Every accepted report extends the liveness lease.
    async fn consume_pipeline(&self, item: &QueueItem, cancel: CancellationToken) -> RunOutcome {
        let mut stream = self.pipeline.invoke(item, cancel.clone());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return RunOutcome::Interrupted,
                next = stream.next() => match next {
                    Some(Ok(update)) => match self.reporter.record(item, &update).await {
                        Ok(true) => {}
                        Ok(false) => return RunOutcome::Abandoned,
                        Err(error) => {
                            // Transient store trouble; the next report
                            // may land. The lease keeps the item alive.
                            warn!(item_id = %item.id, error = %error, "failed to record crawl progress");
                        }
                    },
                    Some(Err(error)) => return RunOutcome::Failed(error),
                    None => {
                        // A pipeline winding down after cancellation ends
                        // its stream early; that is not a completed crawl.
                        if cancel.is_cancelled() {
                            return RunOutcome::Interrupted;
                        }
                        return RunOutcome::Succeeded;
                    }
                },
            }
        }
    }

    async fn finish_success(&self, item: &QueueItem) {
        match self.store.mark_completed(item.id).await {
            Ok(true) => {
                info!(item_id = %item.id, source_id = %item.source_id, "crawl completed");
                self.reporter
                    .publish(&QueueEvent::Completed {
                        item_id: item.id,
                        source_id: item.source_id.clone(),
                        statistics: self.final_statistics(item).await,
                    })
                    .await;
            }
            Ok(false) => {
                debug!(item_id = %item.id, "completion ignored; item no longer running");
            }
            Err(error) => {
                error!(item_id = %item.id, error = %error, "failed to mark item completed");
            }
        }
    }

    async fn finish_failure(&self, item: &QueueItem, error: CrawlError) {
        let outcome = decide_failure(
            item.retry_count,
            item.max_retries,
            &error,
            &self.policy,
            Utc::now(),
        );

        let (retry_count, will_retry, next_retry_at) = match &outcome {
            FailureOutcome::Retry {
                retry_count,
                next_retry_at,
            } => (*retry_count, true, Some(*next_retry_at)),
            FailureOutcome::Escalate { retry_count } => (*retry_count, false, None),
        };

        match self.store.mark_failed(item.id, &error, &outcome).await {
            Ok(true) => {
                if will_retry {
                    warn!(
                        item_id = %item.id,
                        source_id = %item.source_id,
                        error = %error,
                        retry_count,
                        "crawl failed; retry scheduled"
                    );
                } else {
                    warn!(
                        item_id = %item.id,
                        source_id = %item.source_id,
                        error = %error,
                        retry_count,
                        "crawl failed; escalated for human review"
                    );
                }
                self.reporter
                    .publish(&QueueEvent::Failed {
                        item_id: item.id,
                        source_id: item.source_id.clone(),
                        error: error.message.clone(),
                        error_kind: error.kind,
                        retry_count,
                        will_retry,
                        next_retry_at,
                    })
                    .await;
            }
            Ok(false) => {
                debug!(item_id = %item.id, "failure ignored; item no longer running");
            }
            Err(store_error) => {
                error!(item_id = %item.id, error = %store_error, "failed to mark item failed");
            }
        }
    }

    /// Final counter totals for the completed event. Falls back to the
    /// claim-time snapshot when the re-read fails.
    async fn final_statistics(&self, item: &QueueItem) -> CrawlStats {
        match self.store.get(item.id).await {
            Ok(Some(stored)) => stored.statistics,
            Ok(None) => item.statistics,
            Err(error) => {
                warn!(item_id = %item.id, error = %error, "failed to load final statistics");
                item.statistics
            }
        }
    }

    /// Cancel in-flight crawls and wait briefly for them to unwind.
    async fn drain(&self) {
        let in_flight = self.running.len().await;
        if in_flight == 0 {
            return;
        }

        info!(count = in_flight, "cancelling in-flight crawls");
        self.running.cancel_all().await;

        let deadline = Duration::from_secs(30);
        let start = std::time::Instant::now();
        while !self.running.is_empty().await && start.elapsed() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
