//! Test doubles for the queue.
//!
//! `ScriptedPipeline` stands in for the real crawl pipeline and plays
//! back a configured step sequence per invocation, so worker behavior
//! (retries, escalation, cancellation) can be exercised without any
//! network or database.

use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::common::ItemId;
use crate::kernel::pipeline::{CrawlPipeline, ProgressStream, ProgressUpdate};

use super::error::CrawlError;
use super::item::QueueItem;

/// One step of a scripted pipeline run.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Yield a progress update.
    Report(ProgressUpdate),
    /// Yield the terminal error, failing the run.
    Fail(CrawlError),
    /// Sleep before the next step.
    Wait(Duration),
    /// Block until the run's cancellation token fires, then end.
    Hang,
}

/// A pipeline that plays back scripted runs.
///
/// Each invocation consumes the next queued script; when no script is
/// queued the run succeeds immediately (empty stream). Invocations are
/// recorded for later inspection.
pub struct ScriptedPipeline {
    scripts: RwLock<VecDeque<Vec<ScriptStep>>>,
    invocations: RwLock<Vec<QueueItem>>,
}

impl Default for ScriptedPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPipeline {
    /// Create a pipeline where every run succeeds immediately.
    pub fn new() -> Self {
        Self {
            scripts: RwLock::new(VecDeque::new()),
            invocations: RwLock::new(Vec::new()),
        }
    }

    /// Queue the step sequence for the next invocation.
    pub fn push_run(&self, steps: Vec<ScriptStep>) {
        self.scripts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(steps);
    }

    /// Queue a run that fails immediately with the given error.
    pub fn push_failure(&self, error: CrawlError) {
        self.push_run(vec![ScriptStep::Fail(error)]);
    }

    /// Get all invocations.
    pub fn invocations(&self) -> Vec<QueueItem> {
        self.invocations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Get invocation count.
    pub fn invocation_count(&self) -> usize {
        self.invocations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Check if invoked for a specific item.
    pub fn was_invoked_with(&self, id: ItemId) -> bool {
        self.invocations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|item| item.id == id)
    }

    /// Clear invocations and queued scripts.
    pub fn clear(&self) {
        self.scripts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.invocations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn next_script(&self) -> Vec<ScriptStep> {
        self.scripts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_default()
    }
}

impl CrawlPipeline for ScriptedPipeline {
    fn invoke(&self, item: &QueueItem, cancel: CancellationToken) -> ProgressStream {
        self.invocations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(item.clone());

        let steps = self.next_script();
        futures::stream::iter(steps)
            .filter_map(move |step| {
                let cancel = cancel.clone();
                async move {
                    match step {
                        ScriptStep::Report(update) => Some(Ok(update)),
                        ScriptStep::Fail(error) => Some(Err(error)),
                        ScriptStep::Wait(duration) => {
                            tokio::time::sleep(duration).await;
                            None
                        }
                        ScriptStep::Hang => {
                            cancel.cancelled().await;
                            None
                        }
                    }
                }
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::queue::item::{NewQueueItem, StatsDelta};

    fn sample_item() -> QueueItem {
        QueueItem::for_request(
            &NewQueueItem::builder()
                .source_id("src-1")
                .source_url("https://docs.example.com")
                .build(),
        )
    }

    #[tokio::test]
    async fn default_script_succeeds_immediately() {
        let pipeline = ScriptedPipeline::new();
        let item = sample_item();

        let mut stream = pipeline.invoke(&item, CancellationToken::new());
        assert!(stream.next().await.is_none());
        assert!(pipeline.was_invoked_with(item.id));
    }

    #[tokio::test]
    async fn scripted_steps_play_back_in_order() {
        let pipeline = ScriptedPipeline::new();
        pipeline.push_run(vec![
            ScriptStep::Report(ProgressUpdate::new(10, StatsDelta::pages(2))),
            ScriptStep::Fail(CrawlError::network("connection reset")),
        ]);

        let mut stream = pipeline.invoke(&sample_item(), CancellationToken::new());

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.progress, Some(10));

        let second = stream.next().await.unwrap().unwrap_err();
        assert_eq!(second.message, "connection reset");
    }

    #[tokio::test]
    async fn scripts_are_consumed_per_invocation() {
        let pipeline = ScriptedPipeline::new();
        pipeline.push_failure(CrawlError::timeout("too slow"));

        let mut first = pipeline.invoke(&sample_item(), CancellationToken::new());
        assert!(first.next().await.unwrap().is_err());

        // Second run has no script left and succeeds.
        let mut second = pipeline.invoke(&sample_item(), CancellationToken::new());
        assert!(second.next().await.is_none());
        assert_eq!(pipeline.invocation_count(), 2);
    }

    #[tokio::test]
    async fn hang_step_ends_after_cancellation() {
        let pipeline = ScriptedPipeline::new();
        pipeline.push_run(vec![ScriptStep::Hang]);

        let cancel = CancellationToken::new();
        let mut stream = pipeline.invoke(&sample_item(), cancel.clone());

        cancel.cancel();
        assert!(stream.next().await.is_none());
    }
}
