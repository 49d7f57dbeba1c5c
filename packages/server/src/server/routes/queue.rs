//! REST surface for the crawl queue.
//!
//! Enqueue, list, inspect, and command endpoints. Errors map onto
//! status codes here; the service layer stays HTTP-agnostic.

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::common::{ItemId, Page, PageArgs};
use crate::kernel::queue::{
    CrawlScope, EnqueueResult, ItemFilter, ItemStatus, NewQueueItem, QueueError, QueueItem,
    QueueStats,
};
use crate::server::app::AppState;

/// Queue command/query failure as an HTTP response.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] QueueError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            QueueError::NotFound(_) => StatusCode::NOT_FOUND,
            QueueError::InvalidTransition { .. } => StatusCode::CONFLICT,
            QueueError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            QueueError::Internal(error) => {
                tracing::error!(error = %error, "queue command failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// POST /api/queue/items
///
/// 201 with the created item; 200 with the existing one when an active
/// item for the same source URL and scope already exists.
pub async fn enqueue_handler(
    Extension(state): Extension<AppState>,
    Json(request): Json<NewQueueItem>,
) -> Result<(StatusCode, Json<QueueItem>), ApiError> {
    match state.service.enqueue(request).await? {
        EnqueueResult::Created(item) => Ok((StatusCode::CREATED, Json(item))),
        EnqueueResult::Duplicate(item) => Ok((StatusCode::OK, Json(item))),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListItemsQuery {
    pub status: Option<ItemStatus>,
    pub scope: Option<CrawlScope>,
    pub source_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /api/queue/items?status=&scope=&source_id=&limit=&offset=
pub async fn list_items_handler(
    Extension(state): Extension<AppState>,
    Query(query): Query<ListItemsQuery>,
) -> Result<Json<Page<QueueItem>>, ApiError> {
    let filter = ItemFilter {
        status: query.status,
        scope: query.scope,
        source_id: query.source_id,
    };
    let page = PageArgs {
        limit: query.limit,
        offset: query.offset,
    };
    Ok(Json(state.service.list_items(filter, page).await?))
}

/// GET /api/queue/items/:id
pub async fn get_item_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<ItemId>,
) -> Result<Json<QueueItem>, ApiError> {
    Ok(Json(state.service.get_item(id).await?))
}

/// POST /api/queue/items/:id/retry
pub async fn retry_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<ItemId>,
) -> Result<Json<QueueItem>, ApiError> {
    Ok(Json(state.service.retry(id).await?))
}

/// POST /api/queue/items/:id/stop
pub async fn stop_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<ItemId>,
) -> Result<Json<QueueItem>, ApiError> {
    Ok(Json(state.service.stop(id).await?))
}

/// DELETE /api/queue/items/:id
pub async fn delete_item_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<ItemId>,
) -> Result<StatusCode, ApiError> {
    state.service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/queue/stats
pub async fn stats_handler(
    Extension(state): Extension<AppState>,
) -> Result<Json<QueueStats>, ApiError> {
    Ok(Json(state.service.stats().await?))
}
