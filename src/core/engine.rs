//! Pipeline engine.
//!
//! Sequences phases strictly in order, resumes from checkpoints, applies the
//! retry and degrade policy, journals every transition and produces the
//! terminal [`RunReport`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{Event, EventType, PhaseOutcome, PhaseState, RunReport, RunStatus};
use crate::error::{truncate_diagnostic, PipelineError};

use super::checkpoint::CheckpointStore;
use super::journal::{generate_idempotency_key, hash_bytes, RunJournal};
use super::phase::{Phase, PhaseContext, PhaseSpec, Requirement};
use super::retry::{RetryDecision, RetryState, Sleeper, TokioSleeper};

/// Result of running one phase's attempt loop
struct Attempted {
    result: Result<Vec<u8>, PipelineError>,
    attempts: u32,
    cost_usd: f64,
    summary: String,
}

/// Phase sequencer
pub struct Engine {
    checkpoints: Arc<dyn CheckpointStore>,
    sleeper: Arc<dyn Sleeper>,
    journal: Option<RunJournal>,
    dry_run: bool,
    /// Minimum size of a usable checkpoint, by output key
    output_minimums: HashMap<String, u64>,
}

impl Engine {
    pub fn new(checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            checkpoints,
            sleeper: Arc::new(TokioSleeper),
            journal: None,
            dry_run: false,
            output_minimums: HashMap::new(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_journal(mut self, journal: RunJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Size floors of phases that are not part of this run, so a
    /// single-phase rerun rejects the same undersized inputs a full run would
    pub fn with_output_minimums(mut self, minimums: impl IntoIterator<Item = (String, u64)>) -> Self {
        self.output_minimums.extend(minimums);
        self
    }

    /// A checkpoint is usable when it holds at least this many bytes
    fn input_minimum(&self, phases: &[Box<dyn Phase>], key: &str) -> u64 {
        phases
            .iter()
            .map(|p| p.spec())
            .find(|s| s.output == key)
            .map(|s| s.min_checkpoint_bytes)
            .or_else(|| self.output_minimums.get(key).copied())
            .unwrap_or(0)
            .max(1)
    }

    async fn record(&self, event: Event) -> Result<()> {
        if let Some(ref journal) = self.journal {
            journal.append(&event).await?;
        }
        Ok(())
    }

    /// Execute the phases of one run in order
    #[instrument(skip(self, phases), fields(pipeline = %pipeline))]
    pub async fn run(&self, pipeline: &str, phases: &[Box<dyn Phase>]) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let mut report = RunReport::new(run_id, pipeline);
        let mut outputs: HashMap<String, Vec<u8>> = HashMap::new();

        info!(%run_id, phases = phases.len(), dry_run = self.dry_run, "Starting run");
        self.record(
            Event::new(
                run_id,
                None,
                EventType::RunStarted,
                format!("{}:start", run_id),
                format!("Pipeline '{}' started", pipeline),
                PhaseState::Running,
            )
            .with_pipeline(pipeline),
        )
        .await?;

        for phase in phases {
            let spec = phase.spec();
            let minimums: HashMap<&str, u64> = spec
                .inputs
                .iter()
                .map(|k| (k.as_str(), self.input_minimum(phases, k)))
                .collect();
            let outcome = self
                .run_phase(run_id, phase.as_ref(), &minimums, &mut outputs)
                .await?;
            let failed = outcome.state == PhaseState::Failed;
            let error = outcome.error.clone().unwrap_or_default();
            report.phases.push(outcome);

            if failed {
                error!(phase = %spec.name, error = %error, "Required phase failed, halting run");
                report.status = RunStatus::Failed {
                    phase: spec.name.clone(),
                    error: error.clone(),
                };
                report.completed_at = Some(Utc::now());
                self.record(
                    Event::new(
                        run_id,
                        Some(spec.name.clone()),
                        EventType::RunFailed,
                        format!("{}:complete", run_id),
                        format!("Run failed at '{}'", spec.name),
                        PhaseState::Failed,
                    )
                    .with_error(error),
                )
                .await?;
                return Ok(report);
            }
        }

        report.status = RunStatus::Succeeded;
        report.completed_at = Some(Utc::now());
        info!(%run_id, cost_usd = report.total_cost(), "Run completed");
        self.record(Event::new(
            run_id,
            None,
            EventType::RunCompleted,
            format!("{}:complete", run_id),
            format!("Pipeline '{}' completed", pipeline),
            PhaseState::Succeeded,
        ))
        .await?;

        Ok(report)
    }

    /// Drive one phase to a terminal state
    async fn run_phase(
        &self,
        run_id: Uuid,
        phase: &dyn Phase,
        input_minimums: &HashMap<&str, u64>,
        outputs: &mut HashMap<String, Vec<u8>>,
    ) -> Result<PhaseOutcome> {
        let spec = phase.spec();
        let started = Instant::now();

        // Checkpoint hit: load and skip without calling the phase
        match self.checkpoints.size(&spec.output).await? {
            Some(size) if size >= spec.min_checkpoint_bytes => {
                let data = self.checkpoints.read(&spec.output).await?;
                let mut outcome = PhaseOutcome::new(&spec.name, PhaseState::Checkpointed);
                outcome.output_bytes = Some(data.len() as u64);
                outcome.output_digest = Some(hash_bytes(&data));
                info!(phase = %spec.name, bytes = size, "Checkpoint found, skipping phase");
                self.record(
                    self.phase_event(run_id, spec, EventType::PhaseSkipped, PhaseState::Checkpointed, "checkpoint found")
                        .with_output(data.len() as u64, hash_bytes(&data)),
                )
                .await?;
                outputs.insert(spec.output.clone(), data);
                return Ok(outcome);
            }
            Some(size) => {
                warn!(
                    phase = %spec.name,
                    bytes = size,
                    min_bytes = spec.min_checkpoint_bytes,
                    "Checkpoint below minimum size, regenerating"
                );
                self.checkpoints.remove(&spec.output).await?;
            }
            None => {}
        }

        if let Some(ref credential) = spec.missing_credential {
            let error = format!("missing credential {}", credential);
            return match spec.requirement {
                Requirement::Optional => {
                    warn!(phase = %spec.name, credential = %credential, "Credential not configured, skipping phase");
                    self.skip(run_id, spec, PhaseState::SkippedMissingCredential, Some(error))
                        .await
                }
                Requirement::Required => self.fail(run_id, spec, 0, 0.0, error).await,
            };
        }

        if self.dry_run && spec.side_effect {
            let ctx = PhaseContext::new(run_id, true, outputs, self.checkpoints.as_ref());
            let preview = phase
                .preview(&ctx)
                .unwrap_or_else(|| format!("would run '{}'", spec.name));
            info!(phase = %spec.name, preview = %truncate_diagnostic(&preview), "Dry run, not executing side effect");
            return self.skip(run_id, spec, PhaseState::SkippedDryRun, None).await;
        }

        // Inputs not produced in this run may already exist as checkpoints
        for key in &spec.inputs {
            if outputs.contains_key(key) {
                continue;
            }
            let min = input_minimums.get(key.as_str()).copied().unwrap_or(1);
            match self.checkpoints.size(key).await? {
                Some(size) if size >= min => {
                    let data = self.checkpoints.read(key).await?;
                    outputs.insert(key.clone(), data);
                }
                Some(size) => {
                    warn!(phase = %spec.name, input = %key, bytes = size, min_bytes = min, "Input checkpoint below minimum size, ignoring");
                }
                None => {}
            }
        }
        if let Some(missing) = spec.inputs.iter().find(|k| !outputs.contains_key(*k)) {
            let error = PipelineError::MissingInput(missing.clone()).to_string();
            return match spec.requirement {
                Requirement::Optional => {
                    warn!(phase = %spec.name, input = %missing, "Input missing, skipping phase");
                    self.skip(run_id, spec, PhaseState::SkippedMissingInput, Some(error))
                        .await
                }
                Requirement::Required => self.fail(run_id, spec, 0, 0.0, error).await,
            };
        }

        let input_digest: String = spec
            .inputs
            .iter()
            .filter_map(|k| outputs.get(k))
            .map(|d| hash_bytes(d))
            .collect::<Vec<_>>()
            .join(",");
        let idem_key = generate_idempotency_key(run_id, &spec.name, &input_digest);

        let attempted = self.attempt_loop(run_id, phase, outputs, &idem_key).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        match attempted.result {
            Ok(data) => {
                let digest = hash_bytes(&data);
                let mut outcome = PhaseOutcome::new(&spec.name, PhaseState::Succeeded);
                outcome.attempts = attempted.attempts;
                outcome.cost_usd = attempted.cost_usd;
                outcome.output_bytes = Some(data.len() as u64);
                outcome.output_digest = Some(digest.clone());
                outcome.duration_ms = Some(duration_ms);

                info!(
                    phase = %spec.name,
                    bytes = data.len(),
                    attempts = attempted.attempts,
                    cost_usd = attempted.cost_usd,
                    "Phase succeeded{}",
                    if attempted.summary.is_empty() { String::new() } else { format!(": {}", attempted.summary) }
                );
                self.record(
                    Event::new(
                        run_id,
                        Some(spec.name.clone()),
                        EventType::PhaseSucceeded,
                        idem_key,
                        format!("Phase '{}' succeeded in {}ms", spec.name, duration_ms),
                        PhaseState::Succeeded,
                    )
                    .with_attempt(attempted.attempts)
                    .with_duration(duration_ms)
                    .with_cost(attempted.cost_usd)
                    .with_output(data.len() as u64, digest),
                )
                .await?;

                outputs.insert(spec.output.clone(), data);
                Ok(outcome)
            }
            Err(e) => {
                let error = e.diagnostic();
                match spec.requirement {
                    Requirement::Optional => {
                        warn!(
                            phase = %spec.name,
                            attempts = attempted.attempts,
                            error = %error,
                            "Optional phase failed, continuing without it"
                        );
                        let mut outcome =
                            PhaseOutcome::new(&spec.name, PhaseState::SkippedWithWarning);
                        outcome.attempts = attempted.attempts;
                        outcome.cost_usd = attempted.cost_usd;
                        outcome.error = Some(error.clone());
                        outcome.duration_ms = Some(duration_ms);
                        self.record(
                            self.phase_event(
                                run_id,
                                spec,
                                EventType::PhaseFailed,
                                PhaseState::SkippedWithWarning,
                                "optional phase failed",
                            )
                            .with_attempt(attempted.attempts)
                            .with_duration(duration_ms)
                            .with_cost(attempted.cost_usd)
                            .with_error(error),
                        )
                        .await?;
                        Ok(outcome)
                    }
                    Requirement::Required => {
                        self.fail(run_id, spec, attempted.attempts, attempted.cost_usd, error)
                            .await
                    }
                }
            }
        }
    }

    /// Attempts with retry; writes the checkpoint on success
    async fn attempt_loop(
        &self,
        run_id: Uuid,
        phase: &dyn Phase,
        outputs: &HashMap<String, Vec<u8>>,
        idem_key: &str,
    ) -> Result<Attempted> {
        let spec = phase.spec();
        let ctx = PhaseContext::new(run_id, self.dry_run, outputs, self.checkpoints.as_ref());
        let mut state = RetryState::new(spec.retry_policy.clone());

        loop {
            let attempt = state.begin_attempt();
            ctx.set_attempt(attempt);
            info!(phase = %spec.name, attempt, max_attempts = state.max_attempts(), "Phase started");
            self.record(
                Event::new(
                    run_id,
                    Some(spec.name.clone()),
                    EventType::PhaseStarted,
                    idem_key.to_string(),
                    format!("Phase '{}' attempt {}", spec.name, attempt),
                    PhaseState::Running,
                )
                .with_attempt(attempt),
            )
            .await?;

            let result = match phase.execute(&ctx).await {
                Ok(output) if (output.data.len() as u64) < spec.min_checkpoint_bytes => {
                    Err(PipelineError::validation(format!(
                        "output is {} bytes, below minimum of {}",
                        output.data.len(),
                        spec.min_checkpoint_bytes
                    )))
                }
                Ok(output) => match self.checkpoints.write(&spec.output, &output.data).await {
                    Ok(()) => Ok(output),
                    Err(e) => Err(PipelineError::from(e)),
                },
                Err(e) => Err(e),
            };

            match result {
                Ok(output) => {
                    return Ok(Attempted {
                        result: Ok(output.data),
                        attempts: attempt,
                        cost_usd: ctx.cost(),
                        summary: output.summary,
                    });
                }
                Err(e) => match state.on_failure(&e) {
                    RetryDecision::RetryAfter(delay) => {
                        warn!(
                            phase = %spec.name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e.diagnostic(),
                            "Phase failed, retrying"
                        );
                        self.record(
                            Event::new(
                                run_id,
                                Some(spec.name.clone()),
                                EventType::PhaseRetrying,
                                format!("{}:retry:{}", idem_key, attempt),
                                format!("Phase '{}' failed, retrying in {:?}", spec.name, delay),
                                PhaseState::Running,
                            )
                            .with_attempt(attempt)
                            .with_error(e.diagnostic()),
                        )
                        .await?;
                        self.sleeper.sleep(delay).await;
                    }
                    RetryDecision::GiveUp => {
                        return Ok(Attempted {
                            result: Err(e),
                            attempts: attempt,
                            cost_usd: ctx.cost(),
                            summary: String::new(),
                        });
                    }
                },
            }
        }
    }

    fn phase_event(
        &self,
        run_id: Uuid,
        spec: &PhaseSpec,
        event_type: EventType,
        state: PhaseState,
        summary: &str,
    ) -> Event {
        Event::new(
            run_id,
            Some(spec.name.clone()),
            event_type,
            format!("{}:{}", run_id, spec.name),
            format!("Phase '{}': {}", spec.name, summary),
            state,
        )
    }

    async fn skip(
        &self,
        run_id: Uuid,
        spec: &PhaseSpec,
        state: PhaseState,
        reason: Option<String>,
    ) -> Result<PhaseOutcome> {
        let mut outcome = PhaseOutcome::new(&spec.name, state);
        outcome.error = reason.clone();

        let mut event = self.phase_event(run_id, spec, EventType::PhaseSkipped, state, state.as_str());
        if let Some(reason) = reason {
            event = event.with_error(reason);
        }
        self.record(event).await?;
        Ok(outcome)
    }

    async fn fail(
        &self,
        run_id: Uuid,
        spec: &PhaseSpec,
        attempts: u32,
        cost_usd: f64,
        error: String,
    ) -> Result<PhaseOutcome> {
        let error = truncate_diagnostic(&error);
        error!(phase = %spec.name, attempts, error = %error, "Phase failed");

        let mut outcome = PhaseOutcome::new(&spec.name, PhaseState::Failed);
        outcome.attempts = attempts;
        outcome.cost_usd = cost_usd;
        outcome.error = Some(error.clone());

        self.record(
            self.phase_event(run_id, spec, EventType::PhaseFailed, PhaseState::Failed, "failed")
                .with_attempt(attempts)
                .with_cost(cost_usd)
                .with_error(error),
        )
        .await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checkpoint::MemoryCheckpointStore;
    use crate::core::phase::PhaseOutput;
    use crate::core::retry::RecordingSleeper;
    use async_trait::async_trait;

    struct Echo {
        spec: PhaseSpec,
        body: &'static [u8],
    }

    #[async_trait]
    impl Phase for Echo {
        fn spec(&self) -> &PhaseSpec {
            &self.spec
        }

        async fn execute(&self, _ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PipelineError> {
            Ok(PhaseOutput::bytes(self.body.to_vec()))
        }
    }

    #[tokio::test]
    async fn test_single_phase_run() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let engine = Engine::new(store.clone()).with_sleeper(Arc::new(RecordingSleeper::new()));

        let phases: Vec<Box<dyn Phase>> = vec![Box::new(Echo {
            spec: PhaseSpec::new("echo", "echo.txt"),
            body: b"hello",
        })];

        let report = engine.run("test", &phases).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.outcome("echo").unwrap().state, PhaseState::Succeeded);
        assert_eq!(store.read("echo.txt").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_output_below_minimum_is_retried_then_fails() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let engine = Engine::new(store.clone()).with_sleeper(sleeper.clone());

        let phases: Vec<Box<dyn Phase>> = vec![Box::new(Echo {
            spec: PhaseSpec::new("tiny", "tiny.bin").min_bytes(100),
            body: b"short",
        })];

        let report = engine.run("test", &phases).await.unwrap();
        let outcome = report.outcome("tiny").unwrap();
        assert_eq!(outcome.state, PhaseState::Failed);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(sleeper.sleeps().len(), 2);
        assert!(!store.exists("tiny.bin").await.unwrap());
    }
}
