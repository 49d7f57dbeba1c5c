//! Retry scheduling: exponential backoff with bounded jitter.

use chrono::{DateTime, Duration, Utc};

use super::error::CrawlErrorKind;

/// Controls how failed items re-enter the queue.
///
/// Delays double per attempt from `base_delay_secs` up to
/// `max_delay_secs`, with uniform jitter on top so a burst of failures
/// does not come back as a burst of retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: i32,
    pub base_delay_secs: i64,
    pub max_delay_secs: i64,
    /// Upper bound of the random slack, as a fraction of the delay.
    pub jitter_fraction: f64,
    /// Whether a human-triggered retry restarts the budget at zero.
    pub manual_retry_resets_count: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 30,
            max_delay_secs: 3600,
            jitter_fraction: 0.2,
            manual_retry_resets_count: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: i32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Delay before the `retry_count`-th attempt (1-based; 0 is treated
    /// as the first retry). Timeout failures start from a doubled base
    /// since the source was already slow.
    pub fn delay_for(&self, retry_count: i32, kind: CrawlErrorKind) -> Duration {
        let base = match kind {
            CrawlErrorKind::Timeout => self.base_delay_secs.saturating_mul(2),
            _ => self.base_delay_secs,
        };

        let exp = retry_count.saturating_sub(1).clamp(0, 30) as u32;
        let delay_secs = base
            .saturating_mul(2i64.saturating_pow(exp))
            .min(self.max_delay_secs);

        let jitter_max = (delay_secs as f64 * self.jitter_fraction) as i64;
        let jitter_secs = if jitter_max > 0 {
            fastrand::i64(0..=jitter_max)
        } else {
            0
        };

        Duration::seconds(delay_secs + jitter_secs)
    }

    /// When the item becomes eligible again.
    pub fn next_retry_at(
        &self,
        now: DateTime<Utc>,
        retry_count: i32,
        kind: CrawlErrorKind,
    ) -> DateTime<Utc> {
        now + self.delay_for(retry_count, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_without_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter_fraction: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn first_retry_uses_base_delay() {
        let policy = policy_without_jitter();
        let delay = policy.delay_for(1, CrawlErrorKind::Other);
        assert_eq!(delay, Duration::seconds(30));
    }

    #[test]
    fn delay_doubles_per_retry() {
        let policy = policy_without_jitter();
        assert_eq!(
            policy.delay_for(2, CrawlErrorKind::Other),
            Duration::seconds(60)
        );
        assert_eq!(
            policy.delay_for(3, CrawlErrorKind::Other),
            Duration::seconds(120)
        );
    }

    #[test]
    fn delay_caps_at_max() {
        let policy = policy_without_jitter();
        let delay = policy.delay_for(30, CrawlErrorKind::Other);
        assert_eq!(delay, Duration::seconds(3600));
    }

    #[test]
    fn huge_retry_counts_do_not_overflow() {
        let policy = policy_without_jitter();
        let delay = policy.delay_for(i32::MAX, CrawlErrorKind::Other);
        assert_eq!(delay, Duration::seconds(3600));
    }

    #[test]
    fn timeout_errors_back_off_from_doubled_base() {
        let policy = policy_without_jitter();
        let delay = policy.delay_for(1, CrawlErrorKind::Timeout);
        assert_eq!(delay, Duration::seconds(60));
    }

    #[test]
    fn zero_retry_count_treated_as_first() {
        let policy = policy_without_jitter();
        let delay = policy.delay_for(0, CrawlErrorKind::Other);
        assert_eq!(delay, Duration::seconds(30));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay_for(1, CrawlErrorKind::Other);
            assert!(delay >= Duration::seconds(30));
            assert!(delay <= Duration::seconds(36));
        }
    }

    #[test]
    fn next_retry_at_lands_after_now() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let at = policy.next_retry_at(now, 1, CrawlErrorKind::Network);
        assert!(at > now);
    }
}
