//! Crawl pipeline contract.
//!
//! The queue does not crawl anything itself. It claims items and hands
//! each one to a `CrawlPipeline`, consuming the returned stream of
//! progress updates:
//!
//! - every `Ok(ProgressUpdate)` is persisted and fanned out to
//!   subscribers;
//! - the first `Err(CrawlError)` is the terminal failure for this run;
//! - the stream ending without an error means the crawl succeeded.
//!
//! The worker may stop consuming at any point (cancellation, shutdown).
//! Implementations get a `CancellationToken` and should wind down when
//! it fires, but the queue does not depend on them doing so promptly.
//! Reclaimed items are re-invoked, so pipelines must tolerate
//! at-least-once delivery.

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::queue::error::CrawlError;
use super::queue::item::{QueueItem, StatsDelta};

pub type ProgressStream = BoxStream<'static, Result<ProgressUpdate, CrawlError>>;

/// One incremental report from a running crawl.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ProgressUpdate {
    /// Absolute completion percentage (0-100). `None` leaves the stored
    /// value untouched.
    pub progress: Option<i32>,
    /// Counter increments since the previous update.
    #[serde(default)]
    pub stats: StatsDelta,
}

impl ProgressUpdate {
    pub fn percent(progress: i32) -> Self {
        Self {
            progress: Some(progress),
            stats: StatsDelta::default(),
        }
    }

    pub fn counters(stats: StatsDelta) -> Self {
        Self {
            progress: None,
            stats,
        }
    }

    pub fn new(progress: i32, stats: StatsDelta) -> Self {
        Self {
            progress: Some(progress),
            stats,
        }
    }
}

/// Produces the multi-stage crawl (fetch pages, chunk, extract code
/// examples, embed) for one queue item.
pub trait CrawlPipeline: Send + Sync {
    fn invoke(&self, item: &QueueItem, cancel: CancellationToken) -> ProgressStream;
}

/// Pipeline for deployments that have not linked a crawler. Every
/// invocation fails with a configuration error, which lands the item
/// in the review queue.
pub struct UnconfiguredPipeline;

impl UnconfiguredPipeline {
    pub fn new() -> Self {
        Self
    }
}

impl Default for UnconfiguredPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlPipeline for UnconfiguredPipeline {
    fn invoke(&self, _item: &QueueItem, _cancel: CancellationToken) -> ProgressStream {
        futures::stream::once(async {
            Err(CrawlError::other(
                "no crawl pipeline is configured for this deployment",
            ))
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_update_carries_no_counters() {
        let update = ProgressUpdate::percent(50);
        assert_eq!(update.progress, Some(50));
        assert!(update.stats.is_empty());
    }

    #[test]
    fn counters_update_leaves_progress_untouched() {
        let update = ProgressUpdate::counters(StatsDelta::pages(4));
        assert!(update.progress.is_none());
        assert_eq!(update.stats.pages_crawled, 4);
    }

    #[tokio::test]
    async fn unconfigured_pipeline_fails_every_item() {
        use crate::kernel::queue::item::NewQueueItem;

        let item = QueueItem::for_request(
            &NewQueueItem::builder()
                .source_id("src-1")
                .source_url("https://docs.example.com")
                .build(),
        );

        let mut stream =
            UnconfiguredPipeline::new().invoke(&item, CancellationToken::new());
        let error = stream.next().await.unwrap().unwrap_err();
        assert!(error.message.contains("no crawl pipeline"));
    }
}
