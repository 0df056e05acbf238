//! Exponential backoff bounded by a wall-clock budget.
//!
//! Only the HTTP exchange itself is retried. What the caller does with the final outcome
//! (patching on a duplicate, failing the record) happens outside of this loop.

use crate::metrics_defs::HTTP_RETRIES;
use serde::Deserialize;
use shared::counter;
use std::future::Future;
use tokio::time::{Duration, Instant, sleep};

const BASE_DELAY_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 30_000;
const BUDGET_SECS: u64 = 60;

/// Classification of an attempt's result for the retry loop.
pub trait Retriable {
    fn is_retriable(&self) -> bool;
}

/// Retry settings as they appear in the config file.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub budget_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            base_delay_ms: BASE_DELAY_MS,
            max_delay_ms: MAX_DELAY_MS,
            budget_secs: BUDGET_SECS,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt. Doubles with every further attempt.
    pub base_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Total time, measured from the first attempt, within which retries may start.
    pub budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            budget: Duration::from_secs(config.budget_secs),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `attempts` failed attempts (1-based).
    fn delay_after(&self, attempts: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempts.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Progress of one logical call through the retry loop.
#[derive(Clone, Copy, Debug)]
pub struct RetryState {
    started: Instant,
    attempts: u32,
}

impl RetryState {
    fn start() -> Self {
        RetryState {
            started: Instant::now(),
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Runs `operation` until it yields a non-retriable result or the budget runs out.
///
/// Returns the last result together with the loop state. When the budget is exhausted the
/// returned result is the last retriable one; no attempt is started at or past the end of
/// the budget.
pub async fn with_backoff<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> (T, RetryState)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
    T: Retriable,
{
    let mut state = RetryState::start();

    loop {
        let outcome = operation().await;
        state.attempts += 1;

        if !outcome.is_retriable() {
            if state.attempts > 1 {
                tracing::info!(attempts = state.attempts, "request settled after retry");
            }
            return (outcome, state);
        }

        let delay = policy.delay_after(state.attempts);
        if state.elapsed() + delay >= policy.budget {
            return (outcome, state);
        }

        tracing::warn!(
            attempt = state.attempts,
            delay_ms = delay.as_millis() as u64,
            "retriable failure, backing off"
        );
        counter!(HTTP_RETRIES).increment(1);
        sleep(delay).await;
    }
}
