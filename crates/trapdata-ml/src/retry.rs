//! Retry policy with exponential backoff for inference requests.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use tracing::{info_span, warn, Instrument};

use crate::error::{MlError, MlResult};

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay for exponential backoff (in milliseconds).
    pub base_delay_ms: u64,
    /// Maximum delay cap (in milliseconds).
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 5000,
        }
    }
}

impl RetryConfig {
    /// No retries, used by tests.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_retries: std::env::var("TRAPDATA_INFERENCE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            base_delay_ms: std::env::var("TRAPDATA_INFERENCE_RETRY_BASE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(200),
            max_delay_ms: 5000,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// Execute an async operation, retrying network and server errors.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &str, op: F) -> MlResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = MlResult<T>>,
{
    let mut last_error = None;

    for attempt in 0..=config.max_retries {
        let span = info_span!("inference_retry", operation = %operation, attempt = attempt + 1);

        match op().instrument(span).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    operation = %operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Inference request failed, retrying: {}",
                    e
                );
                counter!("trapdata_inference_retries_total", "operation" => operation.to_string())
                    .increment(1);
                tokio::time::sleep(delay).await;
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| MlError::RequestFailed("retries exhausted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::{assert_err, assert_ok, block_on};

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(20), Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn test_retries_only_retryable_errors() {
        let config = RetryConfig {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 1,
        };

        let calls = AtomicU32::new(0);
        let result: MlResult<()> = with_retry(&config, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(MlError::from_http_status(503, "busy")) }
        })
        .await;
        assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let calls = AtomicU32::new(0);
        let result: MlResult<()> = with_retry(&config, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(MlError::from_http_status(400, "bad request")) }
        })
        .await;
        assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_recovers_after_transient_failure() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 1,
        };

        let calls = AtomicU32::new(0);
        let result = block_on(with_retry(&config, "test", || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(MlError::from_http_status(502, "gateway"))
                } else {
                    Ok(attempt)
                }
            }
        }));
        assert_eq!(assert_ok!(result), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
