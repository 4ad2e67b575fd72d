//! Retry with exponential backoff for transient transport failures.

use std::future::Future;
use std::time::Duration;

use super::error::{ApiError, Result};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        // 3 attempts at 1s / 2s / 4s.
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Run `op`, retrying transient failures with exponential backoff.
///
/// Rate limits are retried too, honouring the server's `retry-after` value
/// when it exceeds the backoff delay. Everything else returns immediately.
pub async fn retry_with_backoff<T, F, Fut>(op: F, config: &RetryConfig) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt + 1 >= config.max_attempts {
                    return Err(err);
                }
                let delay = match &err {
                    e if e.is_transient() => config.delay_for_attempt(attempt),
                    ApiError::RateLimited { retry_after, .. } => retry_after
                        .map(Duration::from_secs)
                        .unwrap_or_default()
                        .max(config.delay_for_attempt(attempt)),
                    _ => return Err(err),
                };
                tracing::warn!(
                    "API request failed (attempt {}/{}), retrying in {:?}: {}",
                    attempt + 1,
                    config.max_attempts,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let result = retry_with_backoff(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ApiError::Stream("connection reset".to_string()))
                } else {
                    Ok(42)
                }
            },
            &config,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_auth_errors() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let result: Result<()> = retry_with_backoff(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::Auth {
                    status: 401,
                    message: "nope".to_string(),
                })
            },
            &config,
        )
        .await;
        assert!(matches!(result, Err(ApiError::Auth { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
    }
}
