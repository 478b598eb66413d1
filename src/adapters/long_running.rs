//! Submit-then-poll driver for long-running provider operations.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{ServiceError, ServiceResponse};
use crate::core::retry::Sleeper;

/// Result of polling an operation handle
#[derive(Debug, Clone)]
pub enum PollStatus {
    /// Still running
    Pending,
    /// Finished with a payload
    Done(ServiceResponse),
    /// Finished without a usable payload (e.g. filtered output)
    Failed(String),
}

/// An operation that is started once and then polled by handle
#[async_trait]
pub trait LongRunningOperation: Send + Sync {
    fn name(&self) -> &str;

    /// Start the operation; returns an opaque handle
    async fn submit(&self, request: &Value) -> Result<String, ServiceError>;

    /// Check on a previously submitted operation
    async fn poll(&self, handle: &str) -> Result<PollStatus, ServiceError>;
}

/// Poll cadence and budgets
#[derive(Debug, Clone)]
pub struct LongRunningPolicy {
    pub poll_interval: Duration,
    pub max_polls: u32,
    /// Total submissions, including the first
    pub max_submits: u32,
    /// Wait after a failed submission that hit a quota
    pub quota_wait: Duration,
    /// Wait after any other failed submission
    pub error_wait: Duration,
}

impl Default for LongRunningPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_polls: 60,
            max_submits: 3,
            quota_wait: Duration::from_secs(60),
            error_wait: Duration::from_secs(10),
        }
    }
}

/// Submit, poll until done, and re-submit on failure up to the policy budget
///
/// Running out of polls and finishing without output are transient. Permanent
/// and auth failures are returned immediately; everything else is retried by
/// re-submission.
pub async fn run_to_completion(
    op: &dyn LongRunningOperation,
    request: &Value,
    policy: &LongRunningPolicy,
    sleeper: &dyn Sleeper,
) -> Result<ServiceResponse, ServiceError> {
    let mut last_error = ServiceError::transient(op.name(), "operation never submitted");

    for submit in 1..=policy.max_submits.max(1) {
        match drive_once(op, request, policy, sleeper).await {
            Ok(response) => return Ok(response),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                warn!(
                    provider = op.name(),
                    submit,
                    max_submits = policy.max_submits,
                    "Long-running operation failed: {}",
                    err
                );
                if submit < policy.max_submits {
                    let wait = if err.is_quota() {
                        policy.quota_wait
                    } else {
                        policy.error_wait
                    };
                    sleeper.sleep(wait).await;
                }
                last_error = err;
            }
        }
    }

    Err(last_error)
}

async fn drive_once(
    op: &dyn LongRunningOperation,
    request: &Value,
    policy: &LongRunningPolicy,
    sleeper: &dyn Sleeper,
) -> Result<ServiceResponse, ServiceError> {
    let handle = op.submit(request).await?;
    info!(provider = op.name(), handle = %handle, "Submitted long-running operation");

    for poll in 1..=policy.max_polls {
        sleeper.sleep(policy.poll_interval).await;
        match op.poll(&handle).await? {
            PollStatus::Pending => {
                debug!(provider = op.name(), poll, "Operation still running");
            }
            PollStatus::Done(response) => return Ok(response),
            PollStatus::Failed(reason) => {
                return Err(ServiceError::transient(
                    op.name(),
                    format!("operation finished with no output: {}", reason),
                ));
            }
        }
    }

    Err(ServiceError::transient(
        op.name(),
        format!(
            "timed out after {} polls of {:?}",
            policy.max_polls, policy.poll_interval
        ),
    ))
}
