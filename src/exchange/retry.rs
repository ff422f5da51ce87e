use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{FetchError, PersistenceError};

/// Errors a [`RetryPolicy`] knows how to time out and classify.
pub trait Retryable: Display {
    fn timed_out(after: Duration) -> Self;

    fn is_retryable(&self) -> bool {
        true
    }
}

impl Retryable for FetchError {
    fn timed_out(after: Duration) -> Self {
        FetchError::Timeout(after.as_millis() as u64)
    }

    fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Unavailable { .. } | FetchError::Decode(_))
    }
}

impl Retryable for PersistenceError {
    fn timed_out(after: Duration) -> Self {
        PersistenceError::Timeout(after.as_millis() as u64)
    }

    /// Timeouts are final: the write may still commit on the blocking pool.
    fn is_retryable(&self) -> bool {
        matches!(self, PersistenceError::Sqlite(_) | PersistenceError::Io(_))
    }
}

/// Per-call timeout plus capped exponential backoff between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub timeout: Duration,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_backoff)
    }

    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable,
    {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, op()).await {
                Ok(r) => r,
                Err(_) => Err(E::timed_out(self.timeout)),
            };

            match result {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_retries && e.is_retryable() => {
                    let delay = self.backoff_duration(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {} - retrying in {:?}",
                        what,
                        attempt + 1,
                        self.max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
