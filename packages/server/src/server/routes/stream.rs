//! SSE streaming endpoints.
//!
//! GET /api/queue/stream        carries every queue event (dashboards).
//! GET /api/queue/stream/:id    carries one item's progress feed.
//!
//! Subscribes to the StreamHub and forwards JSON values as SSE events,
//! named by the payload's `type` field. A slow consumer sees a `lagged`
//! event with the number of missed messages instead of stalling the
//! worker.

use std::convert::Infallible;

use axum::{
    extract::{Extension, Path},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::common::ItemId;
use crate::kernel::stream_hub::{item_topic, QUEUE_TOPIC};
use crate::server::app::AppState;

/// SSE feed for a single queue item.
pub async fn item_stream_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<ItemId>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.stream_hub.subscribe(&item_topic(id)).await;
    sse_response(rx)
}

/// SSE feed carrying every queue event.
pub async fn queue_stream_handler(
    Extension(state): Extension<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.stream_hub.subscribe(QUEUE_TOPIC).await;
    sse_response(rx)
}

/// Stream with connected preamble and lag handling.
fn sse_response(
    rx: broadcast::Receiver<serde_json::Value>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let connected =
        stream::once(async { Ok::<_, Infallible>(Event::default().event("connected").data("ok")) });

    let events = BroadcastStream::new(rx).filter_map(|result| async {
        match result {
            Ok(value) => {
                let event_name = value
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("message");
                Event::default()
                    .event(event_name)
                    .json_data(&value)
                    .ok()
                    .map(Ok)
            }
            Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(n)) => {
                Event::default()
                    .event("lagged")
                    .json_data(&serde_json::json!({"missed": n}))
                    .ok()
                    .map(Ok)
            }
        }
    });

    Sse::new(connected.chain(events)).keep_alive(KeepAlive::default())
}
