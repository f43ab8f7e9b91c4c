use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::SyncError;

/// Classifies failures and schedules exponential backoff between attempts.
///
/// Recoverable failures (see [`SyncError::is_retryable`]) are retried up to
/// `max_attempts` total attempts; fatal failures surface immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Deadline applied to every remote fetch attempt. Expiry classifies as
    /// retryable.
    pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before re-running attempt `attempt` (0-based):
    /// `base * 2^attempt` plus uniform jitter of up to 30% of that value,
    /// clamped to the configured maximum.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1_u32.checked_shl(attempt).unwrap_or(u32::MAX));
        let jitter = exp.mul_f64(0.3 * rand::rng().random::<f64>());
        (exp + jitter).min(self.max_delay)
    }

    /// Run `op`, sleeping the backoff between retryable failures until the
    /// attempt budget is exhausted.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let mut attempt = 0_u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient failure, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    if error.is_retryable() {
                        warn!(attempts = self.max_attempts, error = %error, "retry budget exhausted");
                    }
                    return Err(error);
                }
            }
        }
    }
}

/// Bound a fetch future with the mandatory deadline.
pub async fn with_fetch_timeout<T, Fut>(fut: Fut) -> Result<T, SyncError>
where
    Fut: Future<Output = Result<T, SyncError>>,
{
    match tokio::time::timeout(RetryPolicy::FETCH_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(RetryPolicy::FETCH_TIMEOUT.as_secs())),
    }
}
