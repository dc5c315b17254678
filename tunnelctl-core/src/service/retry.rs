//! Fixed delay retry for operations that report success as a bool

use std::future::Future;
use std::time::Duration;

/// Run `operation`, retrying up to `retries` more times after a `false`
/// result, sleeping `delay` between attempts
pub async fn retry_on_false<F, Fut>(retries: u32, delay: Duration, operation: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let max_attempts = retries.saturating_add(1);

    for attempt in 1..=max_attempts {
        if operation().await {
            return true;
        }

        if attempt < max_attempts {
            log::warn!(
                "Attempt {}/{} failed, retrying in {}ms...",
                attempt,
                max_attempts,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        } else {
            log::error!("All {} attempts failed", max_attempts);
        }
    }

    false
}
