//! Bounded retry with capped exponential backoff.
//!
//! Attempt `n` (0-indexed) that fails is followed by a delay of
//! `base_delay * 2^n`, capped at `max_delay`, optionally scaled by a random
//! factor in `[0.5, 1.5)` and re-capped. No delay follows the last attempt.

use crate::config::RegistryConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for registry session establishment.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RegistryConfig::MAX_ATTEMPTS,
            base_delay: RegistryConfig::BASE_DELAY,
            max_delay: RegistryConfig::MAX_DELAY,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay after failed attempt `attempt` (0-indexed).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let doubled = self.base_delay.as_secs_f64() * 2f64.powi(attempt.min(62) as i32);
        let cap = self.max_delay.as_secs_f64();
        let mut secs = doubled.min(cap);

        if self.jitter {
            secs = (secs * rand::rng().random_range(0.5..1.5)).min(cap);
        }

        Duration::from_secs_f64(secs)
    }

    /// Upper bound on the time spent sleeping between attempts.
    pub fn max_total_delay(&self) -> Duration {
        let retries = self.max_attempts.saturating_sub(1);
        self.max_delay.saturating_mul(retries)
    }
}

/// Outcome bookkeeping for one retried operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub attempts: u32,
    pub total_delay: Duration,
    pub success: bool,
    pub last_error: Option<String>,
}

/// Run `operation` until it succeeds, `should_retry` rejects its error, or
/// the policy's attempts are used up.
pub async fn retry_async<F, Fut, T, E>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> (Result<T, E>, RetryStats)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut stats = RetryStats::default();
    let mut attempt = 0;

    loop {
        stats.attempts = attempt + 1;

        let err = match operation(attempt).await {
            Ok(value) => {
                stats.success = true;
                if attempt > 0 {
                    debug!("Succeeded on attempt {}", attempt + 1);
                }
                return (Ok(value), stats);
            }
            Err(e) => e,
        };
        stats.last_error = Some(err.to_string());

        if !should_retry(&err) {
            debug!("Not retrying: {}", err);
            return (Err(err), stats);
        }
        if attempt + 1 >= policy.max_attempts {
            warn!(
                "Giving up after {} attempts. Last error: {}",
                policy.max_attempts, err
            );
            return (Err(err), stats);
        }

        let delay = policy.delay_after(attempt);
        stats.total_delay += delay;
        warn!(
            "Attempt {}/{} failed: {}. Retrying in {:?}",
            attempt + 1,
            policy.max_attempts,
            err,
            delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
