//! Run journal events.
//!
//! Every phase transition is appended to the run's journal so a finished (or
//! abandoned) run can be reported on later without re-running anything.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single event in the append-only run journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Pipeline name (set on run-level events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,

    /// Phase name (if applicable)
    pub phase: Option<String>,

    /// Type of event
    pub event_type: EventType,

    /// Idempotency key format: "{run_id}:{phase}:{input_hash}"
    pub idempotency_key: String,

    /// Human-readable summary (NO secrets)
    pub summary: String,

    /// Phase state after this event
    pub state: PhaseState,

    /// Attempt number (phase events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,

    /// Time taken in milliseconds (for finished phases)
    pub duration_ms: Option<u64>,

    /// Error message if failed
    pub error: Option<String>,

    /// Estimated cost of billed calls made by the phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,

    /// Size of the phase output in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_bytes: Option<u64>,

    /// Short content digest of the phase output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_digest: Option<String>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(
        run_id: Uuid,
        phase: Option<String>,
        event_type: EventType,
        idempotency_key: String,
        summary: String,
        state: PhaseState,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            pipeline: None,
            phase,
            event_type,
            idempotency_key,
            summary,
            state,
            attempt: None,
            duration_ms: None,
            error: None,
            cost_usd: None,
            output_bytes: None,
            output_digest: None,
        }
    }

    pub fn with_pipeline(mut self, pipeline: &str) -> Self {
        self.pipeline = Some(pipeline.to_string());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Create an event with duration information
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Create an event with error information
    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }

    pub fn with_output(mut self, bytes: u64, digest: String) -> Self {
        self.output_bytes = Some(bytes);
        self.output_digest = Some(digest);
        self
    }
}

/// Types of events that can occur during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A new run has started
    RunStarted,

    /// All required phases completed
    RunCompleted,

    /// A required phase failed fatally
    RunFailed,

    /// A phase attempt has started
    PhaseStarted,

    /// A phase produced and checkpointed its output
    PhaseSucceeded,

    /// A phase did not run (checkpoint hit, missing credential, dry run, missing input)
    PhaseSkipped,

    /// A phase attempt failed and will be retried
    PhaseRetrying,

    /// A phase exhausted its attempts or failed permanently
    PhaseFailed,
}

/// State of a single phase within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    /// Not yet started
    #[default]
    Pending,

    /// Currently executing
    Running,

    /// Produced fresh output
    Succeeded,

    /// Output loaded from an existing checkpoint
    Checkpointed,

    /// Optional phase whose credential is not configured
    SkippedMissingCredential,

    /// Side-effecting phase suppressed by dry run
    SkippedDryRun,

    /// Optional phase whose declared input is absent
    SkippedMissingInput,

    /// Optional phase that exhausted its attempts
    SkippedWithWarning,

    /// Required phase failed; the run halted here
    Failed,
}

impl PhaseState {
    /// Output is available to later phases
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Checkpointed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            Self::SkippedMissingCredential
                | Self::SkippedDryRun
                | Self::SkippedMissingInput
                | Self::SkippedWithWarning
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Checkpointed => "checkpointed",
            Self::SkippedMissingCredential => "skipped_missing_credential",
            Self::SkippedDryRun => "skipped_dry_run",
            Self::SkippedMissingInput => "skipped_missing_input",
            Self::SkippedWithWarning => "skipped_with_warning",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = Event::new(
            Uuid::new_v4(),
            Some("analyze".to_string()),
            EventType::PhaseStarted,
            "test-key".to_string(),
            "Starting analyze phase".to_string(),
            PhaseState::Running,
        )
        .with_attempt(1);

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.event_type, EventType::PhaseStarted);
        assert_eq!(parsed.state, PhaseState::Running);
        assert_eq!(parsed.attempt, Some(1));
        assert!(!json.contains("output_digest"));
    }

    #[test]
    fn test_event_builders() {
        let event = Event::new(
            Uuid::new_v4(),
            Some("voice".to_string()),
            EventType::PhaseSucceeded,
            "test-key".to_string(),
            "Completed voice phase".to_string(),
            PhaseState::Succeeded,
        )
        .with_duration(1500)
        .with_cost(0.3)
        .with_output(48_000, "abcd1234".to_string());

        assert_eq!(event.duration_ms, Some(1500));
        assert_eq!(event.cost_usd, Some(0.3));
        assert_eq!(event.output_bytes, Some(48_000));
    }

    #[test]
    fn test_state_serialization_names() {
        let json = serde_json::to_string(&PhaseState::SkippedMissingCredential).unwrap();
        assert_eq!(json, "\"skipped_missing_credential\"");
        assert_eq!(
            PhaseState::SkippedMissingCredential.to_string(),
            "skipped_missing_credential"
        );
        assert!(PhaseState::Checkpointed.is_completed());
        assert!(PhaseState::SkippedDryRun.is_skipped());
    }
}
