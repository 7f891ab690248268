//! Bounded exponential backoff with jitter for transient provider errors.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use sb_domain::config::RetryConfig;
use sb_domain::error::{Error, Result};

/// Whether an error is worth retrying (network, 5xx, rate limit).
/// Auth failures and other 4xx surface immediately.
pub fn is_transient(error: &Error) -> bool {
    matches!(
        error,
        Error::Http(_) | Error::Timeout(_) | Error::RateLimited(_) | Error::Provider { .. }
    )
}

/// Delay before attempt `attempt` (1-based): exponential from the base,
/// capped, with up to 25% jitter.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config
        .base_delay_ms
        .saturating_mul(1u64 << (attempt - 1).min(16));
    let capped = exp.min(config.max_delay_ms);
    let jitter = rand::thread_rng().gen_range(0..=capped / 4);
    Duration::from_millis(capped + jitter)
}

/// Run `op` with retries on transient errors.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if is_transient(&e) && attempt < config.max_retries => {
                attempt += 1;
                let delay = backoff_delay(config, attempt);
                tracing::warn!(
                    attempt,
                    max = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient provider error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
