//! # Retry
//!
//! Module providing a `RetryPolicy` struct to bound how often a message is processed
//! before it is given up on.
use std::time;

#[derive(Clone, Debug)]
/// A retry policy to determine retry parameters for a message.
pub struct RetryPolicy {
    /// Total number of processing attempts, including the first one.
    pub max_attempts: u32,
    /// The backoff interval after the first failed attempt. Later waits grow linearly.
    pub initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    pub maximum_interval: Option<time::Duration>,
}

impl RetryPolicy {
    /// Initialize a `RetryPolicyBuilder`.
    pub fn build(max_attempts: u32, initial_interval: time::Duration) -> RetryPolicyBuilder {
        RetryPolicyBuilder::new(max_attempts, initial_interval)
    }

    /// Determine the wait after the given (1-based) failed attempt: `attempt * initial_interval`,
    /// capped by `maximum_interval` when one is set.
    pub fn retry_interval(&self, attempt: u32) -> time::Duration {
        let candidate_interval = self.initial_interval.saturating_mul(attempt.max(1));

        match self.maximum_interval {
            Some(max_interval) => std::cmp::min(candidate_interval, max_interval),
            None => candidate_interval,
        }
    }

    /// Whether another attempt is allowed after `attempt` attempts have failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicyBuilder::default().provide()
    }
}

/// Builder pattern struct to provide a `RetryPolicy`.
pub struct RetryPolicyBuilder {
    pub max_attempts: u32,
    pub initial_interval: time::Duration,
    pub maximum_interval: Option<time::Duration>,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: time::Duration::from_secs(1),
            maximum_interval: None,
        }
    }
}

impl RetryPolicyBuilder {
    pub fn new(max_attempts: u32, initial_interval: time::Duration) -> Self {
        Self {
            // A policy that never attempts would never acknowledge anything
            max_attempts: max_attempts.max(1),
            initial_interval,
            ..RetryPolicyBuilder::default()
        }
    }

    pub fn maximum_interval(mut self, interval: time::Duration) -> RetryPolicyBuilder {
        self.maximum_interval = Some(interval);
        self
    }

    /// Provide a `RetryPolicy` according to build parameters provided thus far.
    pub fn provide(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_interval: self.initial_interval,
            maximum_interval: self.maximum_interval,
        }
    }
}
