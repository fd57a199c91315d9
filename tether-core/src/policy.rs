//! Deadlines and retry schedules for external calls.

use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::ExponentialBackoff;

use crate::config::RetryConfig;
use crate::error::TetherError;

/// Delays between attempts for an operation whose first attempt runs
/// immediately: `initial, 2*initial, 4*initial, ...`, capped at
/// `max_backoff_ms`, `max_attempts - 1` entries.
pub fn retry_schedule(config: &RetryConfig) -> impl Iterator<Item = Duration> {
    exponential(config).take(config.max_attempts.saturating_sub(1))
}

fn exponential(config: &RetryConfig) -> ExponentialBackoff {
    // base 2 scaled by initial/2 yields initial, 2*initial, 4*initial
    let factor = (config.initial_backoff_ms / 2).max(1);
    ExponentialBackoff::from_millis(2)
        .factor(factor)
        .max_delay(Duration::from_millis(config.max_backoff_ms))
}

/// Run `fut` with a deadline; on expiry fail with `Timeout` naming `what`.
pub async fn with_deadline<T, F>(limit: Duration, what: &str, fut: F) -> Result<T, TetherError>
where
    F: Future<Output = Result<T, TetherError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(TetherError::Timeout(format!(
            "{} exceeded {}ms",
            what,
            limit.as_millis()
        ))),
    }
}
