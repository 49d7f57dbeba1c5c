//! Typed ID definitions for queue entities.
//!
//! One alias per entity, so the compiler catches mixed-up IDs at call
//! sites instead of the database catching them at 3am.

pub use super::id::Id;

// ============================================================================
// Entity marker types
// ============================================================================

/// Marker type for queue items (one crawl or recrawl of a source).
pub struct CrawlItem;

/// Marker type for crawl batches (items enqueued together).
pub struct CrawlBatch;

// ============================================================================
// Type aliases - the primary API
// ============================================================================

/// Typed ID for queue items.
pub type ItemId = Id<CrawlItem>;

/// Typed ID for crawl batches.
pub type BatchId = Id<CrawlBatch>;
