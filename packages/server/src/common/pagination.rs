//! Limit/offset pagination shared by list queries and the HTTP layer.

use serde::{Deserialize, Serialize};

/// Default page size when the caller does not ask for one.
pub const DEFAULT_LIMIT: i64 = 50;

/// Hard cap on page size.
pub const MAX_LIMIT: i64 = 200;

/// Raw pagination input as it arrives from a query string.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageArgs {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageArgs {
    /// Applies defaults and bounds (limit 1..=200, offset >= 0).
    pub fn validate(&self) -> ValidatedPageArgs {
        ValidatedPageArgs {
            limit: self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            offset: self.offset.unwrap_or(0).max(0),
        }
    }
}

/// Validated and normalized pagination arguments.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedPageArgs {
    pub limit: i64,
    pub offset: i64,
}

impl Default for ValidatedPageArgs {
    fn default() -> Self {
        PageArgs::default().validate()
    }
}

/// One page of results plus the total row count for the filter.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, args: ValidatedPageArgs) -> Self {
        Page {
            items,
            total,
            limit: args.limit,
            offset: args.offset,
        }
    }

    /// Whether rows exist beyond this page.
    pub fn has_more(&self) -> bool {
        self.offset + (self.items.len() as i64) < self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_applies_defaults() {
        let args = PageArgs::default().validate();
        assert_eq!(args.limit, DEFAULT_LIMIT);
        assert_eq!(args.offset, 0);
    }

    #[test]
    fn test_validate_clamps_limit() {
        let args = PageArgs {
            limit: Some(10_000),
            offset: None,
        }
        .validate();
        assert_eq!(args.limit, MAX_LIMIT);

        let args = PageArgs {
            limit: Some(0),
            offset: None,
        }
        .validate();
        assert_eq!(args.limit, 1);
    }

    #[test]
    fn test_validate_rejects_negative_offset() {
        let args = PageArgs {
            limit: None,
            offset: Some(-5),
        }
        .validate();
        assert_eq!(args.offset, 0);
    }

    #[test]
    fn test_page_has_more() {
        let args = PageArgs {
            limit: Some(2),
            offset: Some(0),
        }
        .validate();
        let page = Page::new(vec![1, 2], 5, args);
        assert!(page.has_more());

        let args = PageArgs {
            limit: Some(2),
            offset: Some(4),
        }
        .validate();
        let page = Page::new(vec![5], 5, args);
        assert!(!page.has_more());
    }
}
