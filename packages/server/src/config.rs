use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use crate::kernel::queue::{QueueWorkerConfig, RetryPolicy};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Whether this instance runs the crawl worker alongside the API
    pub queue_worker_enabled: bool,
    /// Seconds between worker polls
    pub queue_worker_interval_secs: u64,
    /// Max crawls in flight at once; also the claim limit per poll
    pub queue_batch_size: i64,
    /// Automatic attempts before an item escalates to human review
    pub queue_max_retries: i32,
    /// Seconds without a progress report before a running item is
    /// considered stalled and reclaimed
    pub queue_liveness_timeout_secs: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            queue_worker_enabled: env::var("QUEUE_WORKER_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .context("QUEUE_WORKER_ENABLED must be true or false")?,
            queue_worker_interval_secs: env::var("QUEUE_WORKER_INTERVAL")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("QUEUE_WORKER_INTERVAL must be a number of seconds")?,
            queue_batch_size: env::var("QUEUE_BATCH_SIZE")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("QUEUE_BATCH_SIZE must be a valid number")?,
            queue_max_retries: env::var("QUEUE_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("QUEUE_MAX_RETRIES must be a valid number")?,
            queue_liveness_timeout_secs: env::var("QUEUE_LIVENESS_TIMEOUT")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .context("QUEUE_LIVENESS_TIMEOUT must be a number of seconds")?,
        })
    }

    /// Worker settings derived from this configuration.
    pub fn worker_config(&self) -> QueueWorkerConfig {
        QueueWorkerConfig {
            batch_size: self.queue_batch_size,
            poll_interval: Duration::from_secs(self.queue_worker_interval_secs),
            ..QueueWorkerConfig::default()
        }
    }

    /// Retry policy derived from this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_retries(self.queue_max_retries)
    }
}
