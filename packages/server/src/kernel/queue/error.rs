//! Error taxonomy for crawl failures and queue commands.

use serde::{Deserialize, Serialize};

use crate::common::ItemId;

use super::item::ItemStatus;

// ============================================================================
// Crawl error classification
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "crawl_error_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CrawlErrorKind {
    /// Connection refused, DNS failure, dropped socket
    Network,
    /// The source answered too slowly or not at all
    Timeout,
    /// Fetched content could not be parsed or chunked
    Parse,
    /// Credentials rejected by the source
    Auth,
    #[default]
    Other,
}

impl CrawlErrorKind {
    /// Whether failures of this kind are worth another attempt.
    /// Auth failures never fix themselves, so they escalate immediately.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CrawlErrorKind::Auth)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlErrorKind::Network => "network",
            CrawlErrorKind::Timeout => "timeout",
            CrawlErrorKind::Parse => "parse",
            CrawlErrorKind::Auth => "auth",
            CrawlErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for CrawlErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure reported by the crawl pipeline for one item.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{kind} error: {message}")]
pub struct CrawlError {
    pub kind: CrawlErrorKind,
    pub message: String,
    /// Structured context (failing URL, HTTP status, stage name)
    pub details: Option<serde_json::Value>,
}

impl CrawlError {
    pub fn new(kind: CrawlErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(CrawlErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(CrawlErrorKind::Timeout, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(CrawlErrorKind::Parse, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(CrawlErrorKind::Auth, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(CrawlErrorKind::Other, message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Best-effort classification for errors that reach the queue as plain
/// `anyhow` values (pipeline internals, panics caught at the dispatch
/// boundary). Pipelines that know better should construct a `CrawlError`
/// directly.
pub fn classify_error(error: &anyhow::Error) -> CrawlErrorKind {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("unauthorized")
        || error_str.contains("forbidden")
        || error_str.contains("permission denied")
        || error_str.contains("invalid credentials")
    {
        return CrawlErrorKind::Auth;
    }

    if error_str.contains("timed out") || error_str.contains("timeout") {
        return CrawlErrorKind::Timeout;
    }

    if error_str.contains("connection")
        || error_str.contains("dns")
        || error_str.contains("network")
    {
        return CrawlErrorKind::Network;
    }

    if error_str.contains("parse") || error_str.contains("deserialize") {
        return CrawlErrorKind::Parse;
    }

    CrawlErrorKind::Other
}

// ============================================================================
// Queue command errors
// ============================================================================

/// Failures surfaced by the command/query facade. The HTTP layer maps
/// these onto status codes; everything else stays `Internal`.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue item {0} not found")]
    NotFound(ItemId),

    #[error("cannot {action} an item in the {from:?} state")]
    InvalidTransition {
        from: ItemStatus,
        action: &'static str,
    },

    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_are_not_retryable() {
        assert!(!CrawlErrorKind::Auth.is_retryable());
    }

    #[test]
    fn transient_kinds_are_retryable() {
        assert!(CrawlErrorKind::Network.is_retryable());
        assert!(CrawlErrorKind::Timeout.is_retryable());
        assert!(CrawlErrorKind::Parse.is_retryable());
        assert!(CrawlErrorKind::Other.is_retryable());
    }

    #[test]
    fn classify_error_timeout() {
        let error = anyhow::anyhow!("request timed out after 30s");
        assert_eq!(classify_error(&error), CrawlErrorKind::Timeout);
    }

    #[test]
    fn classify_error_network() {
        let error = anyhow::anyhow!("connection refused by host");
        assert_eq!(classify_error(&error), CrawlErrorKind::Network);
    }

    #[test]
    fn classify_error_auth() {
        let error = anyhow::anyhow!("401 Unauthorized");
        assert_eq!(classify_error(&error), CrawlErrorKind::Auth);
    }

    #[test]
    fn classify_error_defaults_to_other() {
        let error = anyhow::anyhow!("something unexpected happened");
        assert_eq!(classify_error(&error), CrawlErrorKind::Other);
    }

    #[test]
    fn crawl_error_display_includes_kind() {
        let err = CrawlError::timeout("source stalled");
        assert_eq!(err.to_string(), "timeout error: source stalled");
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&CrawlErrorKind::Network).unwrap();
        assert_eq!(json, "\"network\"");
    }
}
