//! Opt-in retry with exponential backoff for fetchers

use crate::download::Fetcher;
use crate::error::FetchError;
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first; `1` disables retrying
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Base for exponential backoff calculation
    pub exponential_base: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            exponential_base: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// `retries` additional attempts after the first
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            ..Self::default()
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f32(self.exponential_base).min(self.max_delay)
    }
}

/// Wraps a fetcher and retries transport and server failures
///
/// Not-found errors are returned immediately. Timeouts and cancellation are
/// applied by the caller around the whole retry loop, so they are never
/// retried either.
#[derive(Debug, Clone)]
pub struct RetryingFetcher<F> {
    inner: F,
    policy: RetryPolicy,
}

impl<F: Fetcher> RetryingFetcher<F> {
    pub fn new(inner: F, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

impl<F: Fetcher> Fetcher for RetryingFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 0;
        let mut delay = self.policy.initial_delay;

        loop {
            attempt += 1;

            match self.inner.fetch(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if !e.is_retryable() || attempt >= self.policy.max_attempts => {
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        url,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "fetch failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = self.policy.next_delay(delay);
                }
            }
        }
    }
}
