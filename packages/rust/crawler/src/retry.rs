//! Bounded retry with exponential backoff for transient service failures.

use std::future::Future;

use tracing::warn;

use kbcrawl_shared::{Clock, Result, RetryPolicy};

/// Run `op`, retrying transient failures (see [`kbcrawl_shared::KbError::is_transient`])
/// up to `policy.max_retries` times. Non-transient errors return immediately.
pub async fn with_retry<T, C, F, Fut>(
    clock: &C,
    policy: RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    C: Clock,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let delay = policy.backoff(attempt);
                attempt += 1;
                warn!(
                    operation,
                    error = %e,
                    retry = attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retrying"
                );
                clock.sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
