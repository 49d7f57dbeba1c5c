//! Kernel module - queue infrastructure and live streaming.

pub mod pipeline;
pub mod queue;
pub mod stream_hub;

pub use pipeline::{CrawlPipeline, ProgressStream, ProgressUpdate, UnconfiguredPipeline};
pub use stream_hub::StreamHub;
