//! Bounded retry with exponential backoff for retryable gateway failures

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use super::shutdown::ShutdownToken;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Policy that runs the operation exactly once
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn with_jitter(delay: Duration) -> Duration {
        // ±25% of the delay
        let quarter = delay.as_millis() as u64 / 4;
        if quarter == 0 {
            return delay;
        }
        let offset = rand::thread_rng().gen_range(0..=quarter * 2);
        (delay + Duration::from_millis(offset)).saturating_sub(Duration::from_millis(quarter))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, runs out
    /// of attempts, or shutdown is requested.
    pub async fn run<T, F, Fut>(&self, label: &str, shutdown: &ShutdownToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match shutdown.run(op()).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    error!("{} failed after {} attempts: {}", label, attempt, e);
                    return Err(e);
                }
                Err(e) => {
                    let delay = Self::with_jitter(self.backoff(attempt));
                    warn!(
                        "{} attempt {} failed: {}. Retrying in {:?}",
                        label, attempt, e, delay
                    );
                    shutdown.sleep(delay).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PairbotError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_retryable_errors_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let value = policy
            .run("flaky", &ShutdownToken::never(), || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PairbotError::Gateway("503".into()))
                } else {
                    Ok("done")
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result: Result<()> = policy
            .run("down", &ShutdownToken::never(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PairbotError::Gateway("503".into()))
            })
            .await;

        assert!(matches!(result, Err(PairbotError::Gateway(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_returned_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result: Result<()> = policy
            .run("reject", &ShutdownToken::never(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PairbotError::OrderRejected("post only".into()))
            })
            .await;

        assert!(matches!(result, Err(PairbotError::OrderRejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
