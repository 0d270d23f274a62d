//! Retry logic with exponential backoff for blob operations.
//!
//! Only errors the backend marks retryable (throttling, unavailability)
//! are retried. A backend retry-after hint replaces the current backoff
//! step. Once the total budget is spent the next failure is returned; a
//! sleep cut short by the budget is still followed by one last attempt.

use std::future::Future;
use std::time::{Duration, Instant};

use fwa_core::config::StoreConfig;

use crate::error::BlobError;

/// Backoff parameters for blob operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// First delay; doubles after every retry.
    pub initial_delay: Duration,
    /// Total time after which no further retry is scheduled.
    pub budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for RetryPolicy {
    fn from(cfg: &StoreConfig) -> Self {
        Self {
            initial_delay: cfg.retry_initial_delay,
            budget: cfg.retry_budget,
        }
    }
}

/// Run `f` until it succeeds, fails permanently, or the budget runs out.
pub(crate) async fn retry_blob<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    path: &str,
    f: F,
) -> Result<T, BlobError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, BlobError>>,
{
    let started = Instant::now();
    let mut backoff = policy.initial_delay;
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let err = match f().await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        if !err.is_retryable() {
            return Err(err);
        }
        let elapsed = started.elapsed();
        if elapsed >= policy.budget {
            tracing::warn!(operation, path, attempt, "blob retry budget exhausted: {err}");
            return Err(err);
        }
        let delay = err
            .retry_after()
            .unwrap_or(backoff)
            .min(policy.budget - elapsed);
        tracing::warn!(
            operation,
            path,
            attempt,
            "blob operation failed, retrying in {delay:?}: {err}"
        );
        tokio::time::sleep(delay).await;
        backoff = backoff.saturating_mul(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            budget: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let out = retry_blob(&fast(), "get", "p", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(BlobError::Unavailable("down".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(out, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let out: Result<(), _> = retry_blob(&fast(), "get", "p", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BlobError::NotFound("p".into()))
        })
        .await;
        assert!(matches!(out, Err(BlobError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_bounds_attempts() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(10),
            budget: Duration::from_millis(50),
        };
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let out: Result<(), _> = retry_blob(&policy, "replace", "p", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BlobError::Unavailable("down".into()))
        })
        .await;
        assert!(out.is_err());
        // 10 + 20 + (cut to remaining) then one final attempt.
        let n = calls.load(Ordering::SeqCst);
        assert!((2..=5).contains(&n), "unexpected attempt count {n}");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_retry_after_hint_is_honored() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(60),
            budget: Duration::from_secs(120),
        };
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let out = retry_blob(&policy, "replace", "p", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(BlobError::Throttled {
                    path: "p".into(),
                    retry_after: Some(Duration::from_millis(5)),
                })
            } else {
                Ok(())
            }
        })
        .await;
        assert_eq!(out, Ok(()));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
