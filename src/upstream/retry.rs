//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::domain::{PharmaOpsError, Result};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Retry policy for transient failures. The loop inspects the error variant:
/// only `is_retryable()` errors are attempted again, and an upstream
/// `RateLimited` wait is honored over the computed backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;

            match operation().await {
                Ok(result) => {
                    if attempts > 1 {
                        debug!("operation succeeded after {} attempt(s)", attempts);
                    }
                    return Ok(result);
                }
                Err(err) if !err.is_retryable() || attempts >= self.config.max_attempts => {
                    return Err(err);
                }
                Err(err) => {
                    let backoff = match &err {
                        PharmaOpsError::RateLimited { retry_after_secs } => {
                            Duration::from_secs(*retry_after_secs)
                        }
                        _ => self.calculate_backoff(attempts),
                    };
                    warn!(
                        "attempt {}/{} failed: {}; retrying after {:?}",
                        attempts, self.config.max_attempts, err, backoff
                    );
                    sleep(backoff).await;
                }
            }
        }
    }

    fn calculate_backoff(&self, attempt: usize) -> Duration {
        let base = self.config.initial_backoff.as_secs_f64()
            * self.config.multiplier.powi((attempt - 1) as i32);
        let backoff = Duration::from_secs_f64(base.min(self.config.max_backoff.as_secs_f64()));

        if self.config.jitter {
            add_jitter(backoff)
        } else {
            backoff
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

fn add_jitter(duration: Duration) -> Duration {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let jitter: f64 = rng.gen_range(0.0..=0.3);
    Duration::from_secs_f64(duration.as_secs_f64() * (1.0 - jitter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_retry_success_after_transient_failures() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let policy = RetryPolicy::new(fast_config());
        let result = policy
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(PharmaOpsError::UpstreamClient {
                            status: 502,
                            body_excerpt: "bad gateway".to_string(),
                        })
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted_returns_last_error() {
        let policy = RetryPolicy::new(fast_config());
        let result: Result<()> = policy
            .execute(|| async {
                Err(PharmaOpsError::UpstreamClient {
                    status: 503,
                    body_excerpt: String::new(),
                })
            })
            .await;

        assert!(matches!(
            result,
            Err(PharmaOpsError::UpstreamClient { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let policy = RetryPolicy::new(fast_config());
        let result: Result<()> = policy
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(PharmaOpsError::UpstreamClient {
                        status: 404,
                        body_excerpt: "not found".to_string(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_progression() {
        let policy = RetryPolicy::new(RetryConfig {
            jitter: false,
            ..fast_config()
        });
        assert_eq!(policy.calculate_backoff(1), Duration::from_millis(10));
        assert_eq!(policy.calculate_backoff(2), Duration::from_millis(20));
        assert_eq!(policy.calculate_backoff(3), Duration::from_millis(40));
        // Capped at max_backoff.
        assert_eq!(policy.calculate_backoff(5), Duration::from_millis(50));
    }
}
