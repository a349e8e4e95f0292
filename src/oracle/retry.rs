//! Per-provider retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Retry budget for one provider fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first one
    pub attempts: u32,
    /// Delay before the second try; doubles for each further try
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(1_000),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based):
    /// `base_delay * 2^(attempt - 1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Run `op` until it succeeds, the budget is spent, or the error says
/// retrying is pointless.
///
/// No delay before the first try. A server-requested `Retry-After` longer
/// than the backoff takes precedence.
pub async fn with_retry<T, F, Fut>(exchange: &str, policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(exchange = %exchange, attempt, "Price fetch recovered after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if !err.is_retryable() {
                    tracing::warn!(
                        exchange = %exchange,
                        attempt,
                        code = %err.code(),
                        error = %err,
                        "Price fetch failed with non-retryable error"
                    );
                    return Err(err);
                }
                if attempt >= max_attempts {
                    tracing::error!(
                        exchange = %exchange,
                        attempts = attempt,
                        code = %err.code(),
                        error = %err,
                        "Price fetch failed, retries exhausted"
                    );
                    return Err(err);
                }

                let delay = policy
                    .backoff(attempt)
                    .max(err.retry_after().unwrap_or_default());
                tracing::warn!(
                    exchange = %exchange,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    code = %err.code(),
                    error = %err,
                    "Price fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
