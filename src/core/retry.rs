//! Retry policy and the bounded retry state machine.
//!
//! The engine never sleeps directly: every wait goes through a [`Sleeper`] so
//! tests can observe backoff and quota cool-downs without waiting for them.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Retry policy for failed phases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Wait applied after a quota failure instead of the backoff delay
    #[serde(default = "default_quota_cooldown")]
    pub quota_cooldown_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_quota_cooldown() -> u64 {
    60_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            quota_cooldown_ms: default_quota_cooldown(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Delay before the next attempt after `error` ended attempt `attempt`
    pub fn delay_for_error(&self, attempt: u32, error: &PipelineError) -> Duration {
        if error.is_quota() {
            Duration::from_millis(self.quota_cooldown_ms)
        } else {
            self.delay_for_attempt(attempt)
        }
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Sleep for the duration, then attempt again
    RetryAfter(Duration),
    /// Budget exhausted or error not retryable
    GiveUp,
}

/// Attempt counter for one phase execution
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Start the next attempt; returns its 1-indexed number
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    /// Attempts started so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    /// Decide whether the failed current attempt gets a successor
    pub fn on_failure(&self, error: &PipelineError) -> RetryDecision {
        if !error.is_retryable() || !self.policy.should_retry(self.attempt) {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.policy.delay_for_error(self.attempt, error))
    }
}

/// Injectable wait primitive
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeper
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Sleeper that returns immediately and records every requested wait
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// All waits requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy {
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 10000,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(10000)); // Capped
    }

    #[test]
    fn test_quota_uses_cooldown() {
        let policy = RetryPolicy::default();
        let delay = policy.delay_for_error(1, &PipelineError::Quota("429".into()));
        assert_eq!(delay, Duration::from_secs(60));
    }

    #[test]
    fn test_state_machine_gives_up_after_budget() {
        let mut state = RetryState::new(RetryPolicy::default().with_max_attempts(2));
        let err = PipelineError::Transport("reset".into());

        assert_eq!(state.begin_attempt(), 1);
        assert_eq!(
            state.on_failure(&err),
            RetryDecision::RetryAfter(Duration::from_millis(1000))
        );
        assert_eq!(state.begin_attempt(), 2);
        assert_eq!(state.on_failure(&err), RetryDecision::GiveUp);
    }

    #[test]
    fn test_non_retryable_gives_up_immediately() {
        let mut state = RetryState::new(RetryPolicy::default());
        state.begin_attempt();
        assert_eq!(
            state.on_failure(&PipelineError::Auth("bad key".into())),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_recording_sleeper() {
        let sleeper = RecordingSleeper::new();
        tokio_test::block_on(async {
            sleeper.sleep(Duration::from_secs(1)).await;
            sleeper.sleep(Duration::from_secs(2)).await;
        });
        assert_eq!(sleeper.sleeps().len(), 2);
        assert_eq!(sleeper.total(), Duration::from_secs(3));
    }
}
