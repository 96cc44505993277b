use crate::error::{CommerceError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded exponential backoff for optimistic-concurrency conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(200),
        }
    }
}

/// Runs `attempt` until it succeeds, fails with anything other than
/// `StoreConflict`, or runs out of attempts. Each attempt must re-read the
/// records it writes.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = policy.base_delay;
    let mut tries = 1;
    loop {
        match attempt().await {
            Err(CommerceError::StoreConflict(what)) if tries < policy.max_attempts.max(1) => {
                warn!(operation, attempt = tries, conflict = %what, "Store conflict, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(policy.max_delay);
                tries += 1;
            }
            other => return other,
        }
    }
}
