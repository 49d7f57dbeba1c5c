//! Worker lifecycle tests over the in-memory store.
//!
//! Drives real `QueueWorker` instances against `MemoryQueueStore` and a
//! scripted pipeline: crawl success with streamed progress, retry and
//! escalation, operator stop, exclusive claiming across workers, and
//! watchdog reclaim after a wedged run.

mod common;

use std::sync::Arc;
use std::time::Duration;

use crate::common::{crawl_request, enqueue_item};
use queue_core::common::ItemId;
use queue_core::kernel::queue::testing::{ScriptStep, ScriptedPipeline};
use queue_core::kernel::queue::{
    CrawlError, CrawlErrorKind, ItemStatus, MemoryQueueStore, ProgressReporter, QueueItem,
    QueueService, QueueStore, QueueWorker, QueueWorkerConfig, RetryPolicy, RunningCrawls,
    StatsDelta,
};
use queue_core::kernel::stream_hub::QUEUE_TOPIC;
use queue_core::kernel::{ProgressUpdate, StreamHub};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Test rig
// =============================================================================

struct Rig {
    store: Arc<MemoryQueueStore>,
    pipeline: Arc<ScriptedPipeline>,
    hub: StreamHub,
    running: RunningCrawls,
    service: QueueService,
    worker: Option<QueueWorker>,
}

/// Wire a worker, service, and hub around a shared in-memory store.
fn rig(policy: RetryPolicy, liveness_secs: i64) -> Rig {
    let store = Arc::new(MemoryQueueStore::with_liveness_timeout(liveness_secs));
    let pipeline = Arc::new(ScriptedPipeline::new());
    let hub = StreamHub::new();
    let reporter = ProgressReporter::new(store.clone(), hub.clone());
    let running = RunningCrawls::new();

    let config = QueueWorkerConfig {
        batch_size: 5,
        poll_interval: Duration::from_millis(25),
        worker_id: "w-test".to_string(),
    };
    let worker = QueueWorker::with_config(
        store.clone(),
        pipeline.clone(),
        reporter.clone(),
        running.clone(),
        policy.clone(),
        config,
    );
    let service = QueueService::new(store.clone(), reporter, running.clone(), policy);

    Rig {
        store,
        pipeline,
        hub,
        running,
        service,
        worker: Some(worker),
    }
}

impl Rig {
    fn spawn_worker(&mut self) -> CancellationToken {
        let shutdown = CancellationToken::new();
        let worker = self.worker.take().expect("worker already spawned");
        tokio::spawn(worker.run(shutdown.clone()));
        shutdown
    }
}

/// Immediate, jitter-free retries so escalation happens within a few
/// poll ticks.
fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay_secs: 0,
        max_delay_secs: 60,
        jitter_fraction: 0.0,
        manual_retry_resets_count: true,
    }
}

async fn wait_for_status(store: &MemoryQueueStore, id: ItemId, status: ItemStatus) -> QueueItem {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(item) = store.get(id).await.expect("Failed to get item") {
                if item.status == status {
                    return item;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {:?}", status))
}

/// Drain event kinds from a hub subscription until `last` arrives.
async fn event_kinds_until(
    rx: &mut broadcast::Receiver<serde_json::Value>,
    last: &str,
) -> Vec<String> {
    let mut kinds = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let kind = event["type"].as_str().unwrap_or("message").to_string();
                    let done = kind == last;
                    kinds.push(kind);
                    if done {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {} event", last));
    kinds
}

// =============================================================================
// Success path
// =============================================================================

/// A scripted crawl reports staged progress, completes with frozen
/// statistics, and emits the full event sequence on the hub.
#[tokio::test]
async fn successful_crawl_streams_progress_and_completes() {
    let mut rig = rig(RetryPolicy::default(), 600);
    rig.pipeline.push_run(vec![
        ScriptStep::Report(ProgressUpdate::new(30, StatsDelta::pages(12))),
        ScriptStep::Report(ProgressUpdate {
            progress: Some(80),
            stats: StatsDelta {
                chunks_created: 40,
                code_examples_count: 5,
                embeddings_generated: 40,
                ..Default::default()
            },
        }),
    ]);

    let mut events = rig.hub.subscribe(QUEUE_TOPIC).await;
    let item = rig
        .service
        .enqueue(crawl_request("rust-docs"))
        .await
        .expect("Failed to enqueue")
        .into_item();
    let shutdown = rig.spawn_worker();

    let done = wait_for_status(&rig.store, item.id, ItemStatus::Completed).await;
    assert_eq!(done.progress, 100);
    assert_eq!(done.statistics.pages_crawled, 12);
    assert_eq!(done.statistics.chunks_created, 40);
    assert_eq!(done.statistics.code_examples_count, 5);
    assert_eq!(done.statistics.embeddings_generated, 40);
    assert!(done.completed_at.is_some());
    assert!(done.worker_id.is_none());
    assert!(rig.pipeline.was_invoked_with(item.id));

    let kinds = event_kinds_until(&mut events, "completed").await;
    assert_eq!(
        kinds,
        vec!["enqueued", "started", "progress", "progress", "completed"]
    );

    shutdown.cancel();
}

// =============================================================================
// Retry and escalation
// =============================================================================

/// Repeated transient failures consume the retry budget, then park the
/// item for human review.
#[tokio::test]
async fn transient_failures_escalate_to_review_after_budget() {
    let mut rig = rig(fast_policy(), 600);
    for _ in 0..3 {
        rig.pipeline
            .push_failure(CrawlError::network("connection refused"));
    }

    let item = rig
        .service
        .enqueue(crawl_request("rust-docs"))
        .await
        .expect("Failed to enqueue")
        .into_item();
    let shutdown = rig.spawn_worker();

    let failed = wait_for_status(&rig.store, item.id, ItemStatus::Failed).await;
    assert_eq!(failed.retry_count, 3);
    assert!(failed.requires_human_review);
    assert_eq!(failed.error_message.as_deref(), Some("connection refused"));
    assert_eq!(failed.error_kind, Some(CrawlErrorKind::Network));
    assert!(failed.next_retry_at.is_none());
    assert_eq!(rig.pipeline.invocation_count(), 3);

    shutdown.cancel();
}

/// After escalation, an operator retry restarts the budget and the next
/// run goes back through the pipeline.
#[tokio::test]
async fn manual_retry_after_escalation_crawls_again() {
    let mut rig = rig(fast_policy(), 600);
    for _ in 0..3 {
        rig.pipeline
            .push_failure(CrawlError::timeout("crawl deadline exceeded"));
    }

    let item = rig
        .service
        .enqueue(crawl_request("rust-docs"))
        .await
        .expect("Failed to enqueue")
        .into_item();
    let shutdown = rig.spawn_worker();
    wait_for_status(&rig.store, item.id, ItemStatus::Failed).await;

    let retried = rig.service.retry(item.id).await.expect("Failed to retry");
    assert_eq!(retried.status, ItemStatus::Pending);
    assert_eq!(retried.retry_count, 0, "manual retry restarts the budget");
    assert!(!retried.requires_human_review);

    // No script queued: the fourth run succeeds immediately.
    let done = wait_for_status(&rig.store, item.id, ItemStatus::Completed).await;
    assert_eq!(done.retry_count, 0);
    assert_eq!(rig.pipeline.invocation_count(), 4);

    shutdown.cancel();
}

// =============================================================================
// Operator stop
// =============================================================================

/// Stopping a running item flips it to cancelled and unblocks the
/// in-flight run, which winds down without a terminal write.
#[tokio::test]
async fn stop_cancels_a_running_crawl() {
    let mut rig = rig(RetryPolicy::default(), 600);
    rig.pipeline.push_run(vec![ScriptStep::Hang]);

    let mut events = rig.hub.subscribe(QUEUE_TOPIC).await;
    let item = rig
        .service
        .enqueue(crawl_request("rust-docs"))
        .await
        .expect("Failed to enqueue")
        .into_item();
    let shutdown = rig.spawn_worker();
    wait_for_status(&rig.store, item.id, ItemStatus::Running).await;

    let stopped = rig.service.stop(item.id).await.expect("Failed to stop");
    assert_eq!(stopped.status, ItemStatus::Cancelled);

    tokio::time::timeout(Duration::from_secs(5), async {
        while !rig.running.is_empty().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("cancelled crawl did not wind down");

    let row = rig
        .store
        .get(item.id)
        .await
        .expect("Failed to get item")
        .expect("item vanished");
    assert_eq!(row.status, ItemStatus::Cancelled);
    assert!(row.completed_at.is_none());
    assert_eq!(rig.pipeline.invocation_count(), 1);

    let kinds = event_kinds_until(&mut events, "cancelled").await;
    assert!(kinds.contains(&"started".to_string()));

    shutdown.cancel();
}

// =============================================================================
// Exclusive claiming
// =============================================================================

/// Two workers polling the same store dispatch every item exactly once.
#[tokio::test]
async fn concurrent_workers_process_each_item_exactly_once() {
    let store = Arc::new(MemoryQueueStore::new());
    let pipeline = Arc::new(ScriptedPipeline::new());
    let hub = StreamHub::new();
    let reporter = ProgressReporter::new(store.clone(), hub.clone());

    let mut items = Vec::new();
    for i in 0..8 {
        items.push(enqueue_item(store.as_ref(), &format!("source-{}", i)).await);
    }

    let shutdown = CancellationToken::new();
    for worker_id in ["w-a", "w-b"] {
        let config = QueueWorkerConfig {
            batch_size: 2,
            poll_interval: Duration::from_millis(10),
            worker_id: worker_id.to_string(),
        };
        let worker = QueueWorker::with_config(
            store.clone(),
            pipeline.clone(),
            reporter.clone(),
            RunningCrawls::new(),
            RetryPolicy::default(),
            config,
        );
        tokio::spawn(worker.run(shutdown.clone()));
    }

    for item in &items {
        wait_for_status(&store, item.id, ItemStatus::Completed).await;
    }

    assert_eq!(
        pipeline.invocation_count(),
        8,
        "every item crawled exactly once"
    );
    for item in &items {
        let runs = pipeline
            .invocations()
            .iter()
            .filter(|run| run.id == item.id)
            .count();
        assert_eq!(runs, 1, "item {} dispatched more than once", item.id);
    }

    shutdown.cancel();
}

// =============================================================================
// Watchdog reclaim
// =============================================================================

/// A wedged run loses its lease, the watchdog returns the item to
/// pending without charging the retry budget, and a later pass finishes
/// the crawl.
#[tokio::test]
async fn stalled_crawl_is_reclaimed_and_finished_by_a_later_pass() {
    let mut rig = rig(RetryPolicy::default(), 1);
    rig.pipeline.push_run(vec![ScriptStep::Hang]);

    let mut events = rig.hub.subscribe(QUEUE_TOPIC).await;
    let item = rig
        .service
        .enqueue(crawl_request("rust-docs"))
        .await
        .expect("Failed to enqueue")
        .into_item();
    let shutdown = rig.spawn_worker();

    // First attempt wedges and its one-second lease runs out; the
    // second, unscripted attempt succeeds.
    let done = wait_for_status(&rig.store, item.id, ItemStatus::Completed).await;
    assert_eq!(done.retry_count, 0, "reclaim carries no retry penalty");
    assert_eq!(rig.pipeline.invocation_count(), 2);

    let kinds = event_kinds_until(&mut events, "completed").await;
    assert!(kinds.contains(&"reclaimed".to_string()));

    shutdown.cancel();
}
