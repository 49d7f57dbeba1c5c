//! Test fixtures for creating queue test data.

use queue_core::kernel::queue::{EnqueueResult, NewQueueItem, QueueItem, QueueStore};

/// Build an enqueue request with a URL derived from the source id.
pub fn crawl_request(source_id: &str) -> NewQueueItem {
    NewQueueItem::builder()
        .source_id(source_id)
        .source_url(format!("https://docs.example.com/{}", source_id))
        .source_title(format!("{} docs", source_id))
        .build()
}

/// Enqueue a fresh pending item, panicking on duplicates.
pub async fn enqueue_item(store: &dyn QueueStore, source_id: &str) -> QueueItem {
    match store
        .enqueue(crawl_request(source_id))
        .await
        .expect("Failed to enqueue item")
    {
        EnqueueResult::Created(item) => item,
        EnqueueResult::Duplicate(item) => panic!("unexpected duplicate for {}", item.source_url),
    }
}

/// Enqueue and immediately claim one item for `worker`, returning the
/// running row.
pub async fn claim_one(store: &dyn QueueStore, source_id: &str, worker: &str) -> QueueItem {
    let item = enqueue_item(store, source_id).await;
    let claimed = store
        .claim_batch(worker, 1)
        .await
        .expect("Failed to claim item");
    assert_eq!(claimed.len(), 1, "expected exactly one claimed item");
    assert_eq!(claimed[0].id, item.id);
    claimed.into_iter().next().expect("claimed item missing")
}
