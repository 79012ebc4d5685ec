use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Exponential backoff policy for upstream calls.
///
/// Attempt `n` (0-indexed) that fails waits `base_delay_ms * backoff^n`, capped at
/// `max_delay_ms`, before the next attempt. After `max_attempts` failures the last
/// error is returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub backoff: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64, backoff: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            backoff: backoff.max(1),
            max_delay_ms: max_delay_ms.max(base_delay_ms),
        }
    }

    pub fn listings() -> Self {
        Self::new(3, 2_000, 2, 60_000)
    }

    /// The info endpoint rate-limits (429) much more eagerly than listings.
    pub fn metadata() -> Self {
        Self::new(7, 3_000, 5, 60_000)
    }

    /// No waiting between attempts.
    #[cfg(test)]
    pub fn immediate(max_attempts: usize) -> Self {
        Self::new(max_attempts, 0, 1, 0)
    }

    fn next_delay(&self, attempt: usize) -> Duration {
        let factor = self.backoff.saturating_pow(attempt as u32);
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    pub async fn retry_async<F, Fut, T, E>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(val) => return Ok(val),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.next_delay(attempt - 1);
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        label, attempt, self.max_attempts, err, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::listings()
    }
}
