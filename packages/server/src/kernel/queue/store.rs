//! PostgreSQL-backed queue storage.
//!
//! All lifecycle writes are single guarded statements: each `UPDATE`
//! names the states it may transition from, so concurrent commands and
//! late pipeline reports resolve to a no-op instead of clobbering a
//! newer state. Claiming uses `FOR UPDATE SKIP LOCKED` so concurrent
//! pollers never receive the same item.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::common::{ItemId, Page, ValidatedPageArgs};

use super::error::CrawlError;
use super::item::{CrawlScope, ItemStatus, NewQueueItem, QueueItem, StatsDelta};
use super::state::{FailureOutcome, RequeueKind};

/// Default liveness window: a running item that reports nothing for this
/// long is considered abandoned by its worker.
pub const DEFAULT_LIVENESS_TIMEOUT_SECS: i64 = 600;

const SELECT_COLS: &str = "id, batch_id, source_id, source_url, source_title, scope, priority, \
     status, retry_count, max_retries, requires_human_review, lease_expires_at, worker_id, \
     error_message, error_kind, error_details, progress, pages_crawled, chunks_created, \
     code_examples_count, embeddings_generated, created_at, updated_at, started_at, \
     completed_at, last_retry_at, next_retry_at, last_crawled_at";

// ============================================================================
// Result / filter types
// ============================================================================

/// Result type for enqueue operations that handles duplicate suppression.
#[derive(Debug, Clone)]
pub enum EnqueueResult {
    /// A new item was inserted.
    Created(QueueItem),
    /// An active item for the same source and scope already exists.
    Duplicate(QueueItem),
}

impl EnqueueResult {
    pub fn item(&self) -> &QueueItem {
        match self {
            EnqueueResult::Created(item) | EnqueueResult::Duplicate(item) => item,
        }
    }

    pub fn into_item(self) -> QueueItem {
        match self {
            EnqueueResult::Created(item) | EnqueueResult::Duplicate(item) => item,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// Filters for listing queue items. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub status: Option<ItemStatus>,
    pub scope: Option<CrawlScope>,
    pub source_id: Option<String>,
}

/// Aggregate queue health snapshot.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub requires_review: i64,
    pub actively_crawling: Vec<ActiveCrawl>,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct ActiveCrawl {
    pub id: ItemId,
    pub source_id: String,
    pub progress: i32,
}

// ============================================================================
// Store trait
// ============================================================================

/// Storage operations for the crawl queue.
///
/// Transition methods return whether a row was actually moved; `false`
/// means the item was absent or no longer in a state the transition
/// applies to. Callers treat `false` as "somebody else got there first".
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a pending item, unless an active duplicate exists.
    async fn enqueue(&self, req: NewQueueItem) -> Result<EnqueueResult>;

    /// Atomically claim up to `limit` eligible pending items for `worker_id`.
    ///
    /// Uses `FOR UPDATE SKIP LOCKED`; two concurrent calls never return
    /// overlapping sets. Claimed items come back already marked running
    /// with a fresh lease.
    async fn claim_batch(&self, worker_id: &str, limit: i64) -> Result<Vec<QueueItem>>;

    /// Persist a progress/statistics update and extend the lease.
    ///
    /// Progress only moves forward; counter deltas only add. Has no
    /// effect unless the item is still running.
    async fn record_progress(
        &self,
        id: ItemId,
        progress: Option<i32>,
        stats: &StatsDelta,
    ) -> Result<bool>;

    /// Running → completed. Forces progress to 100 and stamps
    /// `completed_at`/`last_crawled_at`.
    async fn mark_completed(&self, id: ItemId) -> Result<bool>;

    /// Running → pending (retry) or running → failed (escalation),
    /// per the decided outcome. Retries reset progress and counters.
    async fn mark_failed(
        &self,
        id: ItemId,
        error: &CrawlError,
        outcome: &FailureOutcome,
    ) -> Result<bool>;

    /// Pending/running/failed → cancelled.
    async fn mark_cancelled(&self, id: ItemId) -> Result<bool>;

    /// Failed/cancelled → pending, on human request.
    async fn requeue(&self, id: ItemId, kind: RequeueKind) -> Result<bool>;

    /// Return running items with expired leases to pending.
    ///
    /// Worker death is an infrastructure failure, so `retry_count` is
    /// deliberately left untouched.
    async fn reclaim_stalled(&self) -> Result<Vec<ItemId>>;

    async fn get(&self, id: ItemId) -> Result<Option<QueueItem>>;

    async fn list(&self, filter: &ItemFilter, page: ValidatedPageArgs) -> Result<Page<QueueItem>>;

    /// Hard delete regardless of status.
    async fn delete(&self, id: ItemId) -> Result<bool>;

    async fn stats(&self) -> Result<QueueStats>;
}

// ============================================================================
// Postgres implementation
// ============================================================================

pub struct PostgresQueueStore {
    pool: PgPool,
    liveness_timeout_secs: i64,
}

impl PostgresQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            liveness_timeout_secs: DEFAULT_LIVENESS_TIMEOUT_SECS,
        }
    }

    pub fn with_liveness_timeout(pool: PgPool, secs: i64) -> Self {
        Self {
            pool,
            liveness_timeout_secs: secs,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Look up an active (pending or running) item for the same source
    /// URL and scope.
    async fn find_active_duplicate(
        &self,
        source_url: &str,
        scope: CrawlScope,
    ) -> Result<Option<QueueItem>> {
        let sql = format!(
            "SELECT {SELECT_COLS} FROM queue_items \
             WHERE source_url = $1 AND scope = $2 AND status IN ('pending', 'running') \
             LIMIT 1"
        );
        let item = sqlx::query_as::<_, QueueItem>(&sql)
            .bind(source_url)
            .bind(scope)
            .fetch_optional(&self.pool)
            .await?;

        Ok(item)
    }

    async fn insert(&self, item: &QueueItem) -> Result<QueueItem> {
        let sql = format!(
            r#"
            INSERT INTO queue_items (
                id, batch_id, source_id, source_url, source_title, scope, priority,
                status, retry_count, max_retries, requires_human_review, lease_expires_at, worker_id,
                error_message, error_kind, error_details, progress, pages_crawled, chunks_created,
                code_examples_count, embeddings_generated, created_at, updated_at, started_at,
                completed_at, last_retry_at, next_retry_at, last_crawled_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7,
                $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, $18, $19,
                $20, $21, $22, $23, $24,
                $25, $26, $27, $28
            )
            RETURNING {SELECT_COLS}
            "#
        );
        let inserted = sqlx::query_as::<_, QueueItem>(&sql)
            .bind(item.id)
            .bind(item.batch_id)
            .bind(&item.source_id)
            .bind(&item.source_url)
            .bind(&item.source_title)
            .bind(item.scope)
            .bind(item.priority)
            .bind(item.status)
            .bind(item.retry_count)
            .bind(item.max_retries)
            .bind(item.requires_human_review)
            .bind(item.lease_expires_at)
            .bind(&item.worker_id)
            .bind(&item.error_message)
            .bind(item.error_kind)
            .bind(&item.error_details)
            .bind(item.progress)
            .bind(item.statistics.pages_crawled)
            .bind(item.statistics.chunks_created)
            .bind(item.statistics.code_examples_count)
            .bind(item.statistics.embeddings_generated)
            .bind(item.created_at)
            .bind(item.updated_at)
            .bind(item.started_at)
            .bind(item.completed_at)
            .bind(item.last_retry_at)
            .bind(item.next_retry_at)
            .bind(item.last_crawled_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(inserted)
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    async fn enqueue(&self, req: NewQueueItem) -> Result<EnqueueResult> {
        if let Some(existing) = self.find_active_duplicate(&req.source_url, req.scope).await? {
            debug!(
                item_id = %existing.id,
                source_url = %req.source_url,
                "enqueue suppressed, active duplicate exists"
            );
            return Ok(EnqueueResult::Duplicate(existing));
        }

        let item = QueueItem::for_request(&req);
        let inserted = self.insert(&item).await?;

        Ok(EnqueueResult::Created(inserted))
    }

    async fn claim_batch(&self, worker_id: &str, limit: i64) -> Result<Vec<QueueItem>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            WITH next_items AS (
                SELECT id
                FROM queue_items
                WHERE status = 'pending'
                  AND (next_retry_at IS NULL OR next_retry_at <= NOW())
                ORDER BY priority DESC, COALESCE(next_retry_at, created_at) ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE queue_items
            SET
                status = 'running',
                started_at = NOW(),
                lease_expires_at = NOW() + ($2 || ' seconds')::INTERVAL,
                worker_id = $3,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_items)
            RETURNING {SELECT_COLS}
            "#
        );
        let items = sqlx::query_as::<_, QueueItem>(&sql)
            .bind(limit)
            .bind(self.liveness_timeout_secs.to_string())
            .bind(worker_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(items)
    }

    async fn record_progress(
        &self,
        id: ItemId,
        progress: Option<i32>,
        stats: &StatsDelta,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET progress = LEAST(GREATEST(progress, COALESCE($2, progress)), 100),
                pages_crawled = pages_crawled + GREATEST($3, 0),
                chunks_created = chunks_created + GREATEST($4, 0),
                code_examples_count = code_examples_count + GREATEST($5, 0),
                embeddings_generated = embeddings_generated + GREATEST($6, 0),
                lease_expires_at = NOW() + ($7 || ' seconds')::INTERVAL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(progress)
        .bind(stats.pages_crawled)
        .bind(stats.chunks_created)
        .bind(stats.code_examples_count)
        .bind(stats.embeddings_generated)
        .bind(self.liveness_timeout_secs.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_completed(&self, id: ItemId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'completed',
                progress = 100,
                completed_at = NOW(),
                last_crawled_at = NOW(),
                error_message = NULL,
                error_kind = NULL,
                error_details = NULL,
                next_retry_at = NULL,
                lease_expires_at = NULL,
                worker_id = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(
        &self,
        id: ItemId,
        error: &CrawlError,
        outcome: &FailureOutcome,
    ) -> Result<bool> {
        let result = match outcome {
            FailureOutcome::Retry {
                retry_count,
                next_retry_at,
            } => {
                sqlx::query(
                    r#"
                    UPDATE queue_items
                    SET status = 'pending',
                        retry_count = $2,
                        next_retry_at = $3,
                        last_retry_at = NOW(),
                        error_message = $4,
                        error_kind = $5,
                        error_details = $6,
                        progress = 0,
                        pages_crawled = 0,
                        chunks_created = 0,
                        code_examples_count = 0,
                        embeddings_generated = 0,
                        lease_expires_at = NULL,
                        worker_id = NULL,
                        updated_at = NOW()
                    WHERE id = $1 AND status = 'running'
                    "#,
                )
                .bind(id)
                .bind(retry_count)
                .bind(next_retry_at)
                .bind(&error.message)
                .bind(error.kind)
                .bind(&error.details)
                .execute(&self.pool)
                .await?
            }
            FailureOutcome::Escalate { retry_count } => {
                sqlx::query(
                    r#"
                    UPDATE queue_items
                    SET status = 'failed',
                        retry_count = $2,
                        requires_human_review = true,
                        error_message = $3,
                        error_kind = $4,
                        error_details = $5,
                        next_retry_at = NULL,
                        lease_expires_at = NULL,
                        worker_id = NULL,
                        updated_at = NOW()
                    WHERE id = $1 AND status = 'running'
                    "#,
                )
                .bind(id)
                .bind(retry_count)
                .bind(&error.message)
                .bind(error.kind)
                .bind(&error.details)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }

    async fn mark_cancelled(&self, id: ItemId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'cancelled',
                requires_human_review = false,
                next_retry_at = NULL,
                lease_expires_at = NULL,
                worker_id = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'running', 'failed')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn requeue(&self, id: ItemId, kind: RequeueKind) -> Result<bool> {
        let reset_count = matches!(kind, RequeueKind::ManualReset);
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'pending',
                retry_count = CASE WHEN $2 THEN 0 ELSE retry_count END,
                requires_human_review = false,
                error_message = NULL,
                error_kind = NULL,
                error_details = NULL,
                progress = 0,
                pages_crawled = 0,
                chunks_created = 0,
                code_examples_count = 0,
                embeddings_generated = 0,
                next_retry_at = NULL,
                last_retry_at = NOW(),
                started_at = NULL,
                completed_at = NULL,
                lease_expires_at = NULL,
                worker_id = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('failed', 'cancelled')
            "#,
        )
        .bind(id)
        .bind(reset_count)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reclaim_stalled(&self) -> Result<Vec<ItemId>> {
        let ids: Vec<ItemId> = sqlx::query_scalar(
            r#"
            UPDATE queue_items
            SET status = 'pending',
                progress = 0,
                pages_crawled = 0,
                chunks_created = 0,
                code_examples_count = 0,
                embeddings_generated = 0,
                next_retry_at = NULL,
                lease_expires_at = NULL,
                worker_id = NULL,
                updated_at = NOW()
            WHERE status = 'running' AND lease_expires_at < NOW()
            RETURNING id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        if !ids.is_empty() {
            info!(count = ids.len(), "reclaimed stalled queue items");
        }

        Ok(ids)
    }

    async fn get(&self, id: ItemId) -> Result<Option<QueueItem>> {
        let sql = format!("SELECT {SELECT_COLS} FROM queue_items WHERE id = $1");
        let item = sqlx::query_as::<_, QueueItem>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(item)
    }

    async fn list(&self, filter: &ItemFilter, page: ValidatedPageArgs) -> Result<Page<QueueItem>> {
        let sql = format!(
            r#"
            SELECT {SELECT_COLS}
            FROM queue_items
            WHERE ($1::queue_item_status IS NULL OR status = $1)
              AND ($2::crawl_scope IS NULL OR scope = $2)
              AND ($3::text IS NULL OR source_id = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#
        );
        let items = sqlx::query_as::<_, QueueItem>(&sql)
            .bind(filter.status)
            .bind(filter.scope)
            .bind(&filter.source_id)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM queue_items
            WHERE ($1::queue_item_status IS NULL OR status = $1)
              AND ($2::crawl_scope IS NULL OR scope = $2)
              AND ($3::text IS NULL OR source_id = $3)
            "#,
        )
        .bind(filter.status)
        .bind(filter.scope)
        .bind(&filter.source_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Page::new(items, total, page))
    }

    async fn delete(&self, id: ItemId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM queue_items WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn stats(&self) -> Result<QueueStats> {
        #[derive(sqlx::FromRow)]
        struct StatusCounts {
            pending: i64,
            running: i64,
            completed: i64,
            failed: i64,
            cancelled: i64,
            requires_review: i64,
        }

        let counts = sqlx::query_as::<_, StatusCounts>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'running') AS running,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled,
                COUNT(*) FILTER (WHERE requires_human_review) AS requires_review
            FROM queue_items
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let actively_crawling = sqlx::query_as::<_, ActiveCrawl>(
            r#"
            SELECT id, source_id, progress
            FROM queue_items
            WHERE status = 'running'
            ORDER BY started_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(QueueStats {
            pending: counts.pending,
            running: counts.running,
            completed: counts.completed,
            failed: counts.failed,
            cancelled: counts.cancelled,
            requires_review: counts.requires_review,
            actively_crawling,
        })
    }
}
