//! Linear backoff for rate-limited calls.

use std::future::Future;
use std::time::Duration;

use crate::error::AppError;

/// Retry policy applied to every network call.
///
/// Only rate-limit errors (HTTP 429) are retried, with a delay of
/// `attempt × step`. Every other error is returned immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay added per attempt.
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(5, Duration::from_millis(1000))
    }
}

impl RetryPolicy {
    pub fn linear(max_retries: u32, step: Duration) -> Self {
        Self { max_retries, step }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::linear(0, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.step * attempt
    }

    /// Runs `op`, retrying it while it reports a rate limit.
    ///
    /// Once `max_retries` is exhausted the last rate-limit error is returned.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Err(err) if err.is_rate_limited() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_rate_limited() => {
                    tracing::warn!(operation, attempt, "rate limited, retries exhausted");
                    return Err(err);
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn too_many_requests() -> AppError {
        AppError::Http {
            status: 429,
            url: "http://localhost/admin/products".into(),
            body: "slow down".into(),
        }
    }

    #[test]
    fn test_linear_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(3000));
        assert_eq!(policy.max_retries, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_linearly_then_gives_up() {
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let policy = RetryPolicy::linear(3, Duration::from_millis(1000));

        let result: Result<(), AppError> = policy
            .run("create_product", || {
                let calls = calls.clone();
                async move {
                    calls.lock().unwrap().push(Instant::now());
                    Err(too_many_requests())
                }
            })
            .await;

        assert!(result.unwrap_err().is_rate_limited());

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        let gaps: Vec<u128> = calls
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis())
            .collect();
        assert_eq!(gaps, vec![1000, 2000, 3000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_rate_limits() {
        let attempts = Arc::new(Mutex::new(0u32));
        let started = Instant::now();

        let result = RetryPolicy::default()
            .run("list_products", || {
                let attempts = attempts.clone();
                async move {
                    let mut n = attempts.lock().unwrap();
                    *n += 1;
                    if *n <= 3 {
                        Err(too_many_requests())
                    } else {
                        Ok(*n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 4);
        assert_eq!(started.elapsed(), Duration::from_millis(6000));
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let attempts = Arc::new(Mutex::new(0u32));

        let result: Result<(), AppError> = RetryPolicy::default()
            .run("create_variant", || {
                let attempts = attempts.clone();
                async move {
                    *attempts.lock().unwrap() += 1;
                    Err(AppError::Http {
                        status: 400,
                        url: "http://localhost".into(),
                        body: "sku is required".into(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(*attempts.lock().unwrap(), 1);
    }
}
