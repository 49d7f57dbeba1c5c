//! Status transition rules and failure decisions.
//!
//! Everything here is pure so the lifecycle can be tested without a
//! database. The store mirrors these rules in its `WHERE status` guards;
//! this module is the single place that says which edges exist.

use chrono::{DateTime, Utc};

use super::backoff::RetryPolicy;
use super::error::CrawlError;
use super::item::ItemStatus;

impl ItemStatus {
    /// Legal lifecycle edges.
    ///
    /// Running → Pending is the watchdog reclaim; Failed/Cancelled →
    /// Pending is the manual retry path. Deletion is not a transition
    /// and bypasses this graph entirely.
    pub fn can_transition_to(self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Pending)
                | (Failed, Pending)
                | (Failed, Cancelled)
                | (Cancelled, Pending)
        )
    }
}

/// What to do with a running item whose pipeline reported failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Requeue as pending with backoff. Progress resets to zero.
    Retry {
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
    },
    /// Park as failed and flag for human review.
    Escalate { retry_count: i32 },
}

/// Decides between another automatic attempt and human escalation.
///
/// `retry_count` is the count before this failure; the failure itself
/// consumes one attempt, so an item with `max_retries = 3` runs at most
/// three times before escalating.
pub fn decide_failure(
    retry_count: i32,
    max_retries: i32,
    error: &CrawlError,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> FailureOutcome {
    let new_count = retry_count.saturating_add(1);

    if error.is_retryable() && new_count < max_retries {
        FailureOutcome::Retry {
            retry_count: new_count,
            next_retry_at: policy.next_retry_at(now, new_count, error.kind),
        }
    } else {
        FailureOutcome::Escalate {
            retry_count: new_count.min(max_retries),
        }
    }
}

/// How a human-triggered requeue treats the accumulated retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueKind {
    /// Restart the budget at zero and clear error state.
    ManualReset,
    /// Keep the accumulated count, clear error state.
    ManualContinue,
}

pub fn decide_manual_retry(policy: &RetryPolicy) -> RequeueKind {
    if policy.manual_retry_resets_count {
        RequeueKind::ManualReset
    } else {
        RequeueKind::ManualContinue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::queue::error::CrawlErrorKind;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            jitter_fraction: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn pending_can_start_or_cancel() {
        assert!(ItemStatus::Pending.can_transition_to(ItemStatus::Running));
        assert!(ItemStatus::Pending.can_transition_to(ItemStatus::Cancelled));
        assert!(!ItemStatus::Pending.can_transition_to(ItemStatus::Completed));
        assert!(!ItemStatus::Pending.can_transition_to(ItemStatus::Failed));
    }

    #[test]
    fn running_can_finish_fail_cancel_or_reclaim() {
        assert!(ItemStatus::Running.can_transition_to(ItemStatus::Completed));
        assert!(ItemStatus::Running.can_transition_to(ItemStatus::Failed));
        assert!(ItemStatus::Running.can_transition_to(ItemStatus::Cancelled));
        assert!(ItemStatus::Running.can_transition_to(ItemStatus::Pending));
    }

    #[test]
    fn failed_can_requeue_or_cancel() {
        assert!(ItemStatus::Failed.can_transition_to(ItemStatus::Pending));
        assert!(ItemStatus::Failed.can_transition_to(ItemStatus::Cancelled));
        assert!(!ItemStatus::Failed.can_transition_to(ItemStatus::Completed));
    }

    #[test]
    fn completed_has_no_outgoing_edges() {
        for next in [
            ItemStatus::Pending,
            ItemStatus::Running,
            ItemStatus::Failed,
            ItemStatus::Cancelled,
        ] {
            assert!(!ItemStatus::Completed.can_transition_to(next));
        }
    }

    #[test]
    fn cancelled_can_only_requeue() {
        assert!(ItemStatus::Cancelled.can_transition_to(ItemStatus::Pending));
        assert!(!ItemStatus::Cancelled.can_transition_to(ItemStatus::Running));
        assert!(!ItemStatus::Cancelled.can_transition_to(ItemStatus::Completed));
    }

    #[test]
    fn failure_with_budget_schedules_retry() {
        let now = Utc::now();
        let outcome = decide_failure(0, 3, &CrawlError::network("refused"), &policy(), now);
        match outcome {
            FailureOutcome::Retry {
                retry_count,
                next_retry_at,
            } => {
                assert_eq!(retry_count, 1);
                assert!(next_retry_at > now);
            }
            other => panic!("expected retry, got {:?}", other),
        }
    }

    #[test]
    fn third_failure_with_three_retries_escalates() {
        let now = Utc::now();
        let outcome = decide_failure(2, 3, &CrawlError::network("refused"), &policy(), now);
        assert_eq!(outcome, FailureOutcome::Escalate { retry_count: 3 });
    }

    #[test]
    fn auth_failure_escalates_regardless_of_budget() {
        let now = Utc::now();
        let outcome = decide_failure(0, 3, &CrawlError::auth("401"), &policy(), now);
        assert_eq!(outcome, FailureOutcome::Escalate { retry_count: 1 });
    }

    #[test]
    fn escalation_never_reports_count_above_budget() {
        let now = Utc::now();
        let outcome = decide_failure(7, 3, &CrawlError::network("refused"), &policy(), now);
        assert_eq!(outcome, FailureOutcome::Escalate { retry_count: 3 });
    }

    #[test]
    fn backoff_grows_between_attempts() {
        let now = Utc::now();
        let first = decide_failure(0, 5, &CrawlError::network("refused"), &policy(), now);
        let second = decide_failure(1, 5, &CrawlError::network("refused"), &policy(), now);
        let (FailureOutcome::Retry {
            next_retry_at: at1, ..
        }, FailureOutcome::Retry {
            next_retry_at: at2, ..
        }) = (first, second)
        else {
            panic!("expected retries");
        };
        assert!(at2 > at1);
    }

    #[test]
    fn manual_retry_resets_by_default() {
        assert_eq!(
            decide_manual_retry(&RetryPolicy::default()),
            RequeueKind::ManualReset
        );
    }

    #[test]
    fn manual_retry_can_preserve_count() {
        let policy = RetryPolicy {
            manual_retry_resets_count: false,
            ..Default::default()
        };
        assert_eq!(decide_manual_retry(&policy), RequeueKind::ManualContinue);
    }
}
