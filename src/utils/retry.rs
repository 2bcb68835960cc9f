// Retry with exponential backoff

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(500),
        }
    }

    /// Delay before retry number `attempt` (1-based), capped at 32x the base
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.pow(attempt.saturating_sub(1).min(5))
    }
}

/// Run `operation` until it succeeds, fails with an error `should_retry`
/// rejects, or the policy's retries are used up.
pub async fn with_retry<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                attempt += 1;
                if attempt > policy.max_retries || !should_retry(&error) {
                    return Err(error);
                }

                let delay = policy.delay_for(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "Retrying after error");
                sleep(delay).await;
            }
        }
    }
}
