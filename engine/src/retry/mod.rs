//! Bounded retry with exponential backoff and jitter
//!
//! An operation is attempted up to `max_retries + 1` times. Before retry
//! attempt `i` (1-indexed) the helper sleeps `base_delay * 2^i` plus a
//! uniform jitter in `[0, 100ms)`. The last error is returned once the
//! attempts are used up.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound for the random jitter added to each backoff
pub const MAX_JITTER: Duration = Duration::from_millis(100);

/// Retry `op` on every error
pub async fn with_retry<T, E, F, Fut>(op: F, max_retries: u32, base_delay: Duration) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    with_retry_if(op, max_retries, base_delay, |_| true).await
}

/// Retry `op` while `should_retry` accepts the error
///
/// Errors rejected by the predicate are returned immediately without
/// sleeping.
pub async fn with_retry_if<T, E, F, Fut, P>(
    mut op: F,
    max_retries: u32,
    base_delay: Duration,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= max_retries || !should_retry(&e) {
                    return Err(e);
                }
                attempt += 1;

                let delay = backoff_delay(base_delay, attempt);
                warn!(
                    "Attempt {} failed: {}. Retrying in {}ms",
                    attempt,
                    e,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                debug!("Retry attempt {} of {}", attempt, max_retries);
            }
        }
    }
}

/// `base * 2^attempt + jitter`
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    let jitter_ms = rand::thread_rng().gen_range(0..MAX_JITTER.as_millis() as u64);
    base.saturating_mul(factor) + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn test_succeeds_without_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(7) }
            },
            3,
            Duration::from_millis(1),
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backoff_timing() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let counter = Arc::clone(&calls);
        let result: Result<(), String> = with_retry(
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(format!("failure {}", n)) }
            },
            2,
            Duration::from_millis(100),
        )
        .await;

        // 200ms + 400ms of backoff at minimum
        assert!(start.elapsed() >= Duration::from_millis(600));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err(), "failure 3");
    }

    #[tokio::test]
    async fn test_recovers_on_later_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, String> = with_retry(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err("flaky".to_string())
                    } else {
                        Ok("ok")
                    }
                }
            },
            2,
            Duration::from_millis(1),
        )
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_two_failures_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let counter = Arc::clone(&calls);
        let result: Result<&str, String> = with_retry(
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(format!("failure {}", n + 1))
                    } else {
                        Ok("answer")
                    }
                }
            },
            3,
            Duration::from_millis(100),
        )
        .await;
        let elapsed = start.elapsed();

        assert_eq!(result.unwrap(), "answer");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 200ms + 400ms of backoff, jitter below 200ms, nothing after success
        assert!(elapsed >= Duration::from_millis(600));
        assert!(elapsed < Duration::from_millis(1200), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_predicate_stops_early() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = with_retry_if(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            },
            5,
            Duration::from_millis(1),
            |e| e != "fatal",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_delay_bounds() {
        let base = Duration::from_millis(10);
        for _ in 0..50 {
            let d = backoff_delay(base, 2);
            assert!(d >= Duration::from_millis(40));
            assert!(d < Duration::from_millis(140));
        }
    }
}
