//! Retry/backoff policy.
//!
//! Deterministic given the retry count so tests can assert exact
//! `ocr_next_retry_at` values.

use std::time::Duration;

/// Default base delay before the first retry.
pub const DEFAULT_BASE_DELAY_SECS: u64 = 60;
/// Cap on the backoff delay regardless of retry count.
pub const DEFAULT_MAX_DELAY_SECS: u64 = 3600;
/// Default maximum number of automatic retries per document.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Computes the delay before the next attempt (exponential with cap):
/// `base * 2^retry_count`, where `retry_count` is the document's retry count
/// after the failed attempt incremented it.
#[inline]
pub fn next_retry_delay(retry_count: i32, base: Duration, cap: Duration) -> Duration {
    let exp = retry_count.clamp(0, 32) as u32;
    base.saturating_mul(2_u32.saturating_pow(exp)).min(cap)
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(DEFAULT_BASE_DELAY_SECS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, retry_count: i32) -> Duration {
        next_retry_delay(retry_count, self.base_delay, self.max_delay)
    }

    /// Whether a document with this retry count still has budget left.
    pub fn allows_retry(&self, retry_count: i32) -> bool {
        retry_count < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        let base = Duration::from_secs(60);
        let cap = Duration::from_secs(3600);
        assert_eq!(next_retry_delay(0, base, cap), Duration::from_secs(60));
        assert_eq!(next_retry_delay(1, base, cap), Duration::from_secs(120));
        assert_eq!(next_retry_delay(2, base, cap), Duration::from_secs(240));
        assert_eq!(next_retry_delay(3, base, cap), Duration::from_secs(480));
        assert_eq!(next_retry_delay(6, base, cap), cap);
        assert_eq!(next_retry_delay(30, base, cap), cap);
    }

    #[test]
    fn test_negative_count_clamped_to_base() {
        let base = Duration::from_secs(60);
        let cap = Duration::from_secs(3600);
        assert_eq!(next_retry_delay(-1, base, cap), base);
    }

    #[test]
    fn test_policy_budget_boundary() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
        assert!(!policy.allows_retry(4));
    }

    #[test]
    fn test_delays_strictly_increase_until_cap() {
        let policy = RetryPolicy::default();
        let d1 = policy.delay_for(1);
        let d2 = policy.delay_for(2);
        let d3 = policy.delay_for(3);
        assert!(d1 < d2 && d2 < d3);
    }
}
