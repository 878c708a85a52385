use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Parameters for [`retry_with_backoff`].
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Geometric growth per attempt; clamped to at least 1.0.
    pub backoff_factor: f64,
    /// Attempt cap; 0 means unbounded.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_attempts: 0,
        }
    }
}

impl BackoffConfig {
    /// Delay after the `attempt`-th failure (1-based):
    /// `min(max_delay, initial_delay * factor^(attempt - 1))`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0);
        let exponent = attempt.saturating_sub(1).min(1000) as i32;
        let millis = self.initial_delay.as_millis() as f64 * factor.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Outcome of a retried operation.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Cancellation was requested during a sleep or between attempts.
    #[error("operation cancelled")]
    Cancelled,
    /// The operation failed non-transiently, or the attempt cap was reached.
    #[error(transparent)]
    Operation(E),
}

/// Run `op` until it succeeds, retrying transient failures with geometric
/// backoff.
///
/// On the `k`-th failure (1-based): if the error is not transient, or
/// `k >= max_attempts > 0`, the error is surfaced as-is. Otherwise `on_retry`
/// observes `(attempt, delay, error)` and the loop sleeps before trying
/// again. Cancellation is honored between attempts and during every sleep.
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: &BackoffConfig,
    cancel: &CancellationToken,
    is_transient: impl Fn(&E) -> bool,
    mut on_retry: impl FnMut(u32, Duration, &E),
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let capped = config.max_attempts > 0 && attempt >= config.max_attempts;
                if capped || !is_transient(&err) {
                    return Err(RetryError::Operation(err));
                }
                let delay = config.delay_for_attempt(attempt);
                on_retry(attempt, delay, &err);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
