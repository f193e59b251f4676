//! Bounded retry with exponential backoff for transport failures.
//!
//! Only errors tagged with [`ErrorKind::Transport`] are retried. Everything else
//! (authentication, decoding, local storage) is returned right away, as repeating the
//! call would yield the same result.

use crate::errors::{ErrorKind, error_kind};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// A policy which performs exactly one attempt.
    pub fn none() -> Self {
        Self::new(1)
    }

    /// Computes the delay before the given retry (1-based), with up to 25% jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)));
        let capped = exponential.min(self.max_delay);
        let jitter_ms = (capped.as_millis() as u64) / 4;

        if jitter_ms == 0 {
            capped
        } else {
            capped + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-transport error, or the
/// attempts of `policy` are exhausted.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut call: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 1;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err)
                if attempt < policy.attempts
                    && error_kind(&err) == Some(ErrorKind::Transport) =>
            {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying: {:#}",
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
