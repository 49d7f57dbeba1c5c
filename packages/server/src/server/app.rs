//! Application setup and server configuration.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::kernel::pipeline::CrawlPipeline;
use crate::kernel::queue::{
    PostgresQueueStore, ProgressReporter, QueueService, QueueStore, QueueWorker, RunningCrawls,
};
use crate::kernel::stream_hub::StreamHub;
use crate::server::routes::{
    delete_item_handler, enqueue_handler, get_item_handler, health_handler, item_stream_handler,
    list_items_handler, queue_stream_handler, retry_handler, stats_handler, stop_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub service: Arc<QueueService>,
    pub stream_hub: StreamHub,
}

/// Build the Axum application router and spawn the queue worker.
///
/// The crawl pipeline is injected by the composition root: the queue is
/// generic over what actually crawls. With the worker disabled, this
/// instance serves the API and SSE feeds only; another instance (or a
/// deployment that links a real pipeline) runs the crawls.
pub fn build_app(
    pool: PgPool,
    config: &Config,
    pipeline: Arc<dyn CrawlPipeline>,
    shutdown: CancellationToken,
) -> Router {
    let store: Arc<dyn QueueStore> = Arc::new(PostgresQueueStore::with_liveness_timeout(
        pool.clone(),
        config.queue_liveness_timeout_secs,
    ));
    let stream_hub = StreamHub::new();
    let reporter = ProgressReporter::new(store.clone(), stream_hub.clone());
    let running = RunningCrawls::new();

    let service = Arc::new(QueueService::new(
        store.clone(),
        reporter.clone(),
        running.clone(),
        config.retry_policy(),
    ));

    if config.queue_worker_enabled {
        let worker = QueueWorker::with_config(
            store,
            pipeline,
            reporter,
            running,
            config.retry_policy(),
            config.worker_config(),
        );
        tokio::spawn(async move {
            if let Err(e) = worker.run(shutdown).await {
                tracing::error!(error = %e, "queue worker exited with error");
            }
        });
    } else {
        tracing::info!("queue worker disabled by configuration");
    }

    let app_state = AppState {
        db_pool: pool,
        service,
        stream_hub,
    };

    // CORS: the dashboard runs on its own origin
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/queue/items",
            post(enqueue_handler).get(list_items_handler),
        )
        .route(
            "/api/queue/items/:id",
            get(get_item_handler).delete(delete_item_handler),
        )
        .route("/api/queue/items/:id/retry", post(retry_handler))
        .route("/api/queue/items/:id/stop", post(stop_handler))
        .route("/api/queue/stats", get(stats_handler))
        .route("/api/queue/stream", get(queue_stream_handler))
        .route("/api/queue/stream/:id", get(item_stream_handler))
        .layer(Extension(app_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
