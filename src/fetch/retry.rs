use crate::config::RetryPolicy;
use crate::core::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is exhausted.
///
/// `op` receives the 1-based attempt number. `delay` receives the 1-based retry
/// number and returns the pause before that retry. The last error observed is
/// returned when attempts run out.
pub async fn retry_with_backoff<T, F, Fut, D>(max_attempts: u32, mut delay: D, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    D: FnMut(u32) -> Duration,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let pause = delay(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = pause.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                sleep(pause).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// [`retry_with_backoff`] driven by a [`RetryPolicy`].
pub async fn retry_with_policy<T, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_backoff(policy.max_attempts, |retry| policy.delay_for(retry), op).await
}
