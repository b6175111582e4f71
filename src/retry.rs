//! Bounded retry for read-side ledger calls
//!
//! Only transport-level unavailability is retried, and only for read
//! operations. Submissions are never auto-retried: a timed-out submission may
//! still land, so the caller must re-query ledger state first.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::RetryPolicy;
use crate::error::EscrowResult;

/// Backoff delay before the given retry attempt (1-based), capped
pub fn delay_for(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let delay_ms = policy
        .base_delay_ms
        .saturating_mul(1u64 << exp)
        .min(policy.max_delay_ms);
    Duration::from_millis(delay_ms)
}

/// Run a read-only ledger call, retrying retryable failures with backoff
pub async fn retry_read<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> EscrowResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EscrowResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < attempts => {
                let delay = delay_for(policy, attempt);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    what, attempt, attempts, delay, e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EscrowError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 4,
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 350,
        };
        assert_eq!(delay_for(&policy, 1), Duration::from_millis(100));
        assert_eq!(delay_for(&policy, 2), Duration::from_millis(200));
        assert_eq!(delay_for(&policy, 3), Duration::from_millis(350));
        assert_eq!(delay_for(&policy, 10), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_retries_unavailable_until_success() {
        let calls = AtomicU32::new(0);
        let result: EscrowResult<u32> = retry_read(&fast_policy(), "details", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(EscrowError::LedgerUnavailable("connection refused".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_reverts() {
        let calls = AtomicU32::new(0);
        let result: EscrowResult<u32> = retry_read(&fast_policy(), "details", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(EscrowError::LedgerSubmission {
                    reason: "escrow inactive".to_string(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let result: EscrowResult<u32> = retry_read(&fast_policy(), "details", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EscrowError::LedgerUnavailable("down".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(EscrowError::LedgerUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
