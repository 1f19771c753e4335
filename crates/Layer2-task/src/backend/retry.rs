//! Retry logic for provisioning calls

use ncluster_foundation::{Error, Result, RetrySettings};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Wait before the retry following `attempt` (0-based), with up to 10% jitter
pub fn delay_for_attempt(settings: &RetrySettings, attempt: u32) -> Duration {
    let delay_ms =
        (settings.initial_delay_ms as f64 * settings.backoff_multiplier.powi(attempt as i32)) as u64;
    let delay_ms = delay_ms.min(settings.max_delay_ms);
    let jitter = rand::thread_rng().gen_range(0..=delay_ms / 10);
    Duration::from_millis(delay_ms.saturating_add(jitter).min(settings.max_delay_ms))
}

/// Run `f` until it succeeds, fails with a non-retryable error, or runs out
/// of attempts
pub async fn with_retry<F, Fut, T>(
    settings: &RetrySettings,
    operation_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..=settings.max_retries {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_retryable() || attempt >= settings.max_retries {
                    return Err(e);
                }

                let delay = delay_for_attempt(settings, attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_retries = settings.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after error"
                );

                last_error = Some(e);
                sleep(delay).await;
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Internal("No attempts made".to_string())))
}
