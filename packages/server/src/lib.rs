// Docs Crawl Queue - Server Core
//
// This crate provides the persistent queue and worker scheduler that
// drive documentation crawls: enqueueing, exactly-once claiming,
// retry/escalation, liveness reclaim, and live progress streaming.
//
// Queue machinery lives in kernel/queue; the HTTP surface in server/.

pub mod common;
pub mod config;
pub mod kernel;
pub mod server;

pub use config::*;
