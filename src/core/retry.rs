//! Exponential backoff for throttled storage requests

use crate::error::StorageResult;
use rand::Rng;
use std::time::Duration;
use tracing::warn;

/// Backoff schedule for throttled requests
///
/// Retry `n` (zero-based) waits a jittered delay in
/// `[ceiling / 2, ceiling]` where `ceiling = min(base * 2^n, max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    /// Ceiling for the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        RetryPolicy {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Delay ceiling before retry `retry` (zero-based)
    ///
    /// # Examples
    ///
    /// ```
    /// use sitebinder::core::retry::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(1));
    /// assert_eq!(policy.backoff_ceiling(0), Duration::from_millis(100));
    /// assert_eq!(policy.backoff_ceiling(2), Duration::from_millis(400));
    /// assert_eq!(policy.backoff_ceiling(10), Duration::from_secs(1));
    /// ```
    pub fn backoff_ceiling(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Jittered delay before retry `retry`
    pub fn delay(&self, retry: u32) -> Duration {
        let ceiling = self.backoff_ceiling(retry);
        let half = ceiling / 2;
        let spread = (ceiling - half).as_micros() as u64;
        if spread == 0 {
            return ceiling;
        }
        half + Duration::from_micros(rand::thread_rng().gen_range(0..=spread))
    }

    /// Run `op`, retrying while it reports `Throttled`
    ///
    /// Other errors are returned immediately. The returned attempt count
    /// includes the first attempt.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> (StorageResult<T>, u32)
    where
        F: FnMut() -> StorageResult<T>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op() {
                Err(err) if err.is_throttled() && attempts <= self.max_retries => {
                    let delay = self.delay(attempts - 1);
                    warn!(
                        "{} throttled (attempt {}/{}), retrying in {:?}",
                        label,
                        attempts,
                        self.max_retries + 1,
                        delay
                    );
                    std::thread::sleep(delay);
                }
                result => return (result, attempts),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100), Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    fn instant(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::ZERO, Duration::ZERO)
    }

    #[test]
    fn test_backoff_doubles_until_capped() {
        let policy = RetryPolicy::new(8, Duration::from_millis(50), Duration::from_millis(500));
        let ceilings: Vec<u64> = (0..6)
            .map(|n| policy.backoff_ceiling(n).as_millis() as u64)
            .collect();
        assert_eq!(ceilings, vec![50, 100, 200, 400, 500, 500]);
    }

    #[test]
    fn test_backoff_overflow_saturates() {
        let policy = RetryPolicy::new(100, Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(policy.backoff_ceiling(40), Duration::from_secs(30));
        assert_eq!(policy.backoff_ceiling(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(5));
        for retry in 0..5 {
            let ceiling = policy.backoff_ceiling(retry);
            for _ in 0..20 {
                let delay = policy.delay(retry);
                assert!(delay >= ceiling / 2 && delay <= ceiling);
            }
        }
    }

    #[test]
    fn test_retries_throttled_until_success() {
        let mut calls = 0;
        let (result, attempts) = instant(3).run("put", || {
            calls += 1;
            if calls < 3 {
                Err(StorageError::Throttled("slow down".into()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_gives_up_at_ceiling() {
        let (result, attempts) =
            instant(2).run::<(), _>("put", || Err(StorageError::Throttled("slow down".into())));
        assert!(matches!(result, Err(StorageError::Throttled(_))));
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_non_throttle_errors_not_retried() {
        let (result, attempts) =
            instant(5).run::<(), _>("put", || Err(StorageError::Internal("boom".into())));
        assert!(matches!(result, Err(StorageError::Internal(_))));
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_none_policy_single_attempt() {
        let (result, attempts) =
            RetryPolicy::none().run::<(), _>("put", || Err(StorageError::Throttled("x".into())));
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
