//! Crawl queue infrastructure.
//!
//! This module provides the kernel-level queue machinery:
//! - [`QueueStore`] - storage contract, with [`PostgresQueueStore`] for
//!   production and [`MemoryQueueStore`] for tests
//! - [`QueueWorker`] - long-running service that claims and crawls
//! - [`QueueService`] - command/query facade used by the HTTP layer
//! - [`ProgressReporter`] - persists progress and fans it out to SSE
//!
//! # Architecture
//!
//! ```text
//! HTTP enqueue/retry/stop ──► QueueService ──► QueueStore
//!
//! QueueWorker
//!     │
//!     ├─► reclaim_stalled (expired leases back to pending)
//!     ├─► claim_batch (FOR UPDATE SKIP LOCKED)
//!     └─► CrawlPipeline::invoke per item
//!             ├─► progress ──► ProgressReporter ──► StreamHub
//!             └─► terminal ──► state machine ──► retry or escalate
//! ```
//!
//! The actual crawling lives behind [`CrawlPipeline`]; this module only
//! schedules it.
//!
//! [`CrawlPipeline`]: crate::kernel::pipeline::CrawlPipeline

pub mod backoff;
pub mod error;
pub mod events;
pub mod item;
pub mod memory;
pub mod progress;
pub mod service;
pub mod state;
pub mod store;
pub mod testing;
pub mod worker;

pub use backoff::RetryPolicy;
pub use error::{classify_error, CrawlError, CrawlErrorKind, QueueError};
pub use events::QueueEvent;
pub use item::{CrawlScope, CrawlStats, ItemStatus, NewQueueItem, QueueItem, StatsDelta};
pub use memory::MemoryQueueStore;
pub use progress::ProgressReporter;
pub use service::QueueService;
pub use state::{decide_failure, decide_manual_retry, FailureOutcome, RequeueKind};
pub use store::{
    ActiveCrawl, EnqueueResult, ItemFilter, PostgresQueueStore, QueueStats, QueueStore,
};
pub use worker::{QueueWorker, QueueWorkerConfig, RunningCrawls};
