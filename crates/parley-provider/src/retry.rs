// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded retry for a single chain member.

use std::future::Future;
use std::time::Duration;

use parley_core::{Backoff, ParleyError, RetryPolicy};
use rand::Rng;
use tracing::warn;

/// Runs `op` up to `policy.attempts` times, sleeping between attempts.
///
/// Only retryable errors (see [`ParleyError::is_retryable`]) are retried;
/// anything else, and the error of the final attempt, is returned as is.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    provider: &str,
    mut op: F,
) -> Result<T, ParleyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ParleyError>>,
{
    let max_attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && e.is_retryable() => {
                let delay = backoff_delay(policy, attempt);
                warn!(
                    provider,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "provider call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Exponential delays get up to 20% jitter so concurrent retries spread out.
fn backoff_delay(policy: &RetryPolicy, retry: u32) -> Duration {
    let base = policy.delay_for(retry);
    match policy.backoff {
        Backoff::Fixed { .. } => base,
        Backoff::Exponential { .. } => {
            let ms = base.as_millis() as u64;
            let jitter = rand::thread_rng().gen_range(0..=ms / 5);
            Duration::from_millis(ms + jitter)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fixed(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            backoff: Backoff::Fixed { delay_ms: 0 },
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fixed(3), "groq", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ParleyError::provider("groq", "503"))
            } else {
                Ok("ok")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fixed(4), "groq", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ParleyError::provider("groq", "timeout"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fixed(5), "groq", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ParleyError::Validation("bad request".into()))
        })
        .await;
        assert!(matches!(result, Err(ParleyError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_attempts_still_calls_once() {
        let calls = AtomicU32::new(0);
        let _ = with_retry(&fixed(0), "groq", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ParleyError>(())
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exponential_jitter_stays_within_twenty_percent() {
        let policy = RetryPolicy {
            attempts: 3,
            backoff: Backoff::Exponential {
                base_ms: 1000,
                max_ms: 10_000,
            },
        };
        for _ in 0..100 {
            let d = backoff_delay(&policy, 2).as_millis();
            assert!((2000..=2400).contains(&d), "{d}");
        }
    }
}
