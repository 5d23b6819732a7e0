use rand::Rng;
use std::future::Future;
use std::time::Duration;

use super::source::FetchError;
use crate::config::TrendsConfig;

/// Exponential backoff for timed-out fetches: the wait before attempt
/// `n + 1` is `base_delay * 2^(n - 1)`, capped at `max_delay`, then scaled by
/// a random factor in `1 ± jitter`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl From<&TrendsConfig> for RetryPolicy {
    fn from(config: &TrendsConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter.clamp(0.0, 1.0),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-based), before jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let scale = 1.0 + rand::rng().random_range(-self.jitter..=self.jitter);
        delay.mul_f64(scale)
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_attempts` is used up. The last error is returned.
    pub async fn run<T, F, Fut>(&self, keyword: &str, mut operation: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.jittered(self.delay_for(attempt));
                    log::warn!(
                        "Attempt {} for '{}' failed ({}), retrying in {:?}",
                        attempt,
                        keyword,
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
