//! Phase definitions: the unit of work the engine sequences.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::checkpoint::CheckpointStore;
use super::retry::RetryPolicy;
use crate::error::PipelineError;

/// Whether a run can continue without this phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Failure halts the run
    Required,
    /// Failure is recorded and the run continues
    Optional,
}

/// Static description of a phase
#[derive(Debug, Clone)]
pub struct PhaseSpec {
    /// Phase name (unique within a pipeline)
    pub name: String,

    /// Checkpoint key of the output artifact
    pub output: String,

    /// Outputs smaller than this are not valid checkpoints
    pub min_checkpoint_bytes: u64,

    /// Checkpoint keys of outputs this phase reads
    pub inputs: Vec<String>,

    pub requirement: Requirement,

    pub retry_policy: RetryPolicy,

    /// Publishes or triggers something outside the run directory
    pub side_effect: bool,

    /// Name of a credential the phase needs but the config lacks
    pub missing_credential: Option<String>,
}

impl PhaseSpec {
    pub fn new(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: output.into(),
            min_checkpoint_bytes: 1,
            inputs: Vec::new(),
            requirement: Requirement::Required,
            retry_policy: RetryPolicy::default(),
            side_effect: false,
            missing_credential: None,
        }
    }

    pub fn min_bytes(mut self, bytes: u64) -> Self {
        self.min_checkpoint_bytes = bytes.max(1);
        self
    }

    pub fn input(mut self, key: impl Into<String>) -> Self {
        self.inputs.push(key.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.requirement = Requirement::Optional;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn side_effect(mut self) -> Self {
        self.side_effect = true;
        self
    }

    /// Declare a credential; recorded as missing when `value` is `None`
    pub fn credential(mut self, name: &str, value: Option<&str>) -> Self {
        if value.map_or(true, |v| v.trim().is_empty()) {
            self.missing_credential = Some(name.to_string());
        }
        self
    }

    pub fn is_optional(&self) -> bool {
        self.requirement == Requirement::Optional
    }
}

/// What a successful attempt produced
#[derive(Debug, Clone)]
pub struct PhaseOutput {
    /// Bytes written as the phase checkpoint
    pub data: Vec<u8>,

    /// One-line description for logs and the journal
    pub summary: String,
}

impl PhaseOutput {
    pub fn bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            summary: String::new(),
        }
    }

    /// Pretty-printed JSON output
    pub fn json<T: Serialize>(value: &T) -> Result<Self, PipelineError> {
        Ok(Self::bytes(serde_json::to_vec_pretty(value)?))
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }
}

/// Everything a phase may read while executing
pub struct PhaseContext<'a> {
    pub run_id: Uuid,
    pub dry_run: bool,
    outputs: &'a HashMap<String, Vec<u8>>,
    checkpoints: &'a dyn CheckpointStore,
    attempt: AtomicU32,
    cost_usd: Mutex<f64>,
}

impl<'a> PhaseContext<'a> {
    pub fn new(
        run_id: Uuid,
        dry_run: bool,
        outputs: &'a HashMap<String, Vec<u8>>,
        checkpoints: &'a dyn CheckpointStore,
    ) -> Self {
        Self {
            run_id,
            dry_run,
            outputs,
            checkpoints,
            attempt: AtomicU32::new(0),
            cost_usd: Mutex::new(0.0),
        }
    }

    /// Current 1-indexed attempt
    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    pub(crate) fn set_attempt(&self, attempt: u32) {
        self.attempt.store(attempt, Ordering::SeqCst);
    }

    /// Output of an earlier phase; absent is a `MissingInput` error
    pub fn input(&self, key: &str) -> Result<&[u8], PipelineError> {
        self.optional_input(key)
            .ok_or_else(|| PipelineError::MissingInput(key.to_string()))
    }

    pub fn optional_input(&self, key: &str) -> Option<&[u8]> {
        self.outputs.get(key).map(Vec::as_slice)
    }

    /// Output of an earlier phase decoded as JSON
    pub fn input_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, PipelineError> {
        serde_json::from_slice(self.input(key)?).map_err(|e| {
            PipelineError::Other(format!("input '{}' is not valid JSON: {}", key, e))
        })
    }

    /// Checkpoint store for sub-artifacts (e.g. per-scene clips)
    pub fn checkpoints(&self) -> &dyn CheckpointStore {
        self.checkpoints
    }

    /// Record the estimated cost of a billed call that was made
    pub fn record_cost(&self, usd: f64) {
        if let Ok(mut cost) = self.cost_usd.lock() {
            *cost += usd;
        }
    }

    /// Cost recorded across all attempts so far
    pub fn cost(&self) -> f64 {
        self.cost_usd.lock().map(|c| *c).unwrap_or(0.0)
    }
}

/// A named unit of work producing one checkpointed artifact
#[async_trait]
pub trait Phase: Send + Sync {
    fn spec(&self) -> &PhaseSpec;

    /// One attempt; the engine owns retries and checkpointing
    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PipelineError>;

    /// What a side-effecting phase would do, logged on dry runs
    fn preview(&self, _ctx: &PhaseContext<'_>) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checkpoint::MemoryCheckpointStore;

    #[test]
    fn test_spec_builder() {
        let spec = PhaseSpec::new("publish", "publish.json")
            .input("final_video.mp4")
            .optional()
            .side_effect()
            .credential("TELEGRAM_BOT_TOKEN", None);

        assert!(spec.is_optional());
        assert!(spec.side_effect);
        assert_eq!(spec.inputs, vec!["final_video.mp4"]);
        assert_eq!(spec.missing_credential.as_deref(), Some("TELEGRAM_BOT_TOKEN"));

        let spec = PhaseSpec::new("voice", "narration.mp3").credential("KEY", Some("secret"));
        assert!(spec.missing_credential.is_none());
    }

    #[test]
    fn test_context_inputs_and_cost() {
        let mut outputs = HashMap::new();
        outputs.insert("script.json".to_string(), br#"{"title": "T"}"#.to_vec());
        let store = MemoryCheckpointStore::new();
        let ctx = PhaseContext::new(Uuid::new_v4(), false, &outputs, &store);

        let value: serde_json::Value = ctx.input_json("script.json").unwrap();
        assert_eq!(value["title"], "T");
        assert_eq!(
            ctx.input("narration.mp3").unwrap_err(),
            PipelineError::MissingInput("narration.mp3".into())
        );

        ctx.record_cost(0.25);
        ctx.record_cost(0.25);
        assert!((ctx.cost() - 0.5).abs() < 1e-9);
    }
}
