//! Retry decisions for throttled upstream calls
//!
//! The policy is pure: the caller threads the attempt index through and
//! performs the wait itself. Only [`FetcherError::RateLimited`] is retried.

use std::time::Duration;

use crate::clock::RandomSource;
use crate::fetcher::config::{BACKOFF_JITTER, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS, MAX_RETRIES};
use crate::fetcher::FetcherError;

/// Outcome of [`BackoffPolicy::decide`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether another attempt should be made
    pub retry: bool,
    /// Wait before the next attempt; zero when `retry` is false
    pub delay: Duration,
}

impl RetryDecision {
    /// Give up and surface the error
    pub fn stop() -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
        }
    }

    /// Retry after `delay`
    pub fn after(delay: Duration) -> Self {
        Self { retry: true, delay }
    }
}

/// Exponential backoff with symmetric jitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling for the unjittered delay
    pub max_delay: Duration,
    /// Jitter as a fraction of the capped delay (0.25 = ±25%)
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            jitter: BACKOFF_JITTER,
        }
    }
}

impl BackoffPolicy {
    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Total attempts allowed, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Unjittered delay after the failure of attempt `attempt` (0-based)
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as u64;
        let delay_ms = initial_ms.saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as u64))
    }

    /// Base delay randomized by ±`jitter`
    pub fn jittered_delay(&self, attempt: u32, random: &dyn RandomSource) -> Duration {
        let base_ms = self.base_delay(attempt).as_millis() as f64;
        let sample = random.symmetric_unit().clamp(-1.0, 1.0);
        let jittered = base_ms + base_ms * self.jitter * sample;
        Duration::from_millis(jittered.max(0.0).round() as u64)
    }

    /// Decide whether attempt `attempt` (0-based), which failed with `error`,
    /// should be followed by another one
    pub fn decide(&self, attempt: u32, error: &FetcherError, random: &dyn RandomSource) -> RetryDecision {
        if !error.is_retryable() || attempt >= self.max_retries {
            return RetryDecision::stop();
        }

        match error.retry_after() {
            Some(hint) => RetryDecision::after(hint),
            None => RetryDecision::after(self.jittered_delay(attempt, random)),
        }
    }
}
