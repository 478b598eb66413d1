//! Run reports and reconstruction from journal events.
//!
//! A [`RunReport`] is produced by the engine at the end of a run, and can be
//! rebuilt later by replaying the run's journal.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{Event, EventType, PhaseState};

/// Final record of one phase within a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseOutcome {
    pub phase: String,
    pub state: PhaseState,

    /// Attempts made in this run (0 when skipped)
    pub attempts: u32,

    /// Estimated cost of billed calls made in this run
    pub cost_usd: f64,

    pub output_bytes: Option<u64>,
    pub output_digest: Option<String>,

    /// Truncated diagnostic for failed or degraded phases
    pub error: Option<String>,

    pub duration_ms: Option<u64>,
}

impl PhaseOutcome {
    pub fn new(phase: impl Into<String>, state: PhaseState) -> Self {
        Self {
            phase: phase.into(),
            state,
            attempts: 0,
            cost_usd: 0.0,
            output_bytes: None,
            output_digest: None,
            error: None,
            duration_ms: None,
        }
    }
}

/// Overall state of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunStatus {
    /// Still executing (or abandoned mid-run)
    Running,

    /// Every required phase completed
    Succeeded,

    /// A required phase failed; later phases were not started
    Failed { phase: String, error: String },
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Running
    }
}

/// Terminal summary of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Outcomes in phase order
    pub phases: Vec<PhaseOutcome>,
}

impl RunReport {
    pub fn new(run_id: Uuid, pipeline: impl Into<String>) -> Self {
        Self {
            run_id,
            pipeline: pipeline.into(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            phases: Vec::new(),
        }
    }

    /// Reconstruct a report from a sequence of journal events
    ///
    /// Only the last run in the sequence is reported.
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let start = events
            .iter()
            .rposition(|e| e.event_type == EventType::RunStarted)?;
        let first = &events[start];

        let mut report = Self {
            run_id: first.run_id,
            pipeline: first.pipeline.clone().unwrap_or_default(),
            status: RunStatus::Running,
            started_at: first.timestamp,
            completed_at: None,
            phases: Vec::new(),
        };

        for event in &events[start..] {
            report.apply_event(event);
        }

        Some(report)
    }

    /// Apply a single event to update the report
    pub fn apply_event(&mut self, event: &Event) {
        match event.event_type {
            EventType::RunStarted => {
                self.status = RunStatus::Running;
                self.started_at = event.timestamp;
            }
            EventType::RunCompleted => {
                self.status = RunStatus::Succeeded;
                self.completed_at = Some(event.timestamp);
            }
            EventType::RunFailed => {
                self.status = RunStatus::Failed {
                    phase: event.phase.clone().unwrap_or_default(),
                    error: event.error.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
            _ => {
                let Some(ref phase) = event.phase else {
                    return;
                };
                let outcome = self.outcome_entry(phase);
                outcome.state = event.state;
                if let Some(attempt) = event.attempt {
                    outcome.attempts = outcome.attempts.max(attempt);
                }
                if let Some(cost) = event.cost_usd {
                    outcome.cost_usd = cost;
                }
                if event.output_bytes.is_some() {
                    outcome.output_bytes = event.output_bytes;
                    outcome.output_digest = event.output_digest.clone();
                }
                if event.duration_ms.is_some() {
                    outcome.duration_ms = event.duration_ms;
                }
                if event.error.is_some() {
                    outcome.error = event.error.clone();
                }
            }
        }
    }

    fn outcome_entry(&mut self, phase: &str) -> &mut PhaseOutcome {
        let index = match self.phases.iter().position(|p| p.phase == phase) {
            Some(index) => index,
            None => {
                self.phases.push(PhaseOutcome::new(phase, PhaseState::Pending));
                self.phases.len() - 1
            }
        };
        &mut self.phases[index]
    }

    pub fn outcome(&self, phase: &str) -> Option<&PhaseOutcome> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Cost of billed calls actually made in this run
    pub fn total_cost(&self) -> f64 {
        self.phases.iter().map(|p| p.cost_usd).sum()
    }

    /// Phases in the given state
    pub fn phases_in(&self, state: PhaseState) -> Vec<&str> {
        self.phases
            .iter()
            .filter(|p| p.state == state)
            .map(|p| p.phase.as_str())
            .collect()
    }

    /// Human-readable terminal summary
    pub fn render(&self) -> String {
        let mut out = String::new();
        let status = match &self.status {
            RunStatus::Running => "running (incomplete)".to_string(),
            RunStatus::Succeeded => "succeeded".to_string(),
            RunStatus::Failed { phase, .. } => format!("failed at '{}'", phase),
        };

        let _ = writeln!(out, "Run {} ({}): {}", self.run_id, self.pipeline, status);
        let _ = writeln!(out, "{}", "─".repeat(60));

        for p in &self.phases {
            let mut line = format!("  {:<14} {:<28}", p.phase, p.state.as_str());
            if p.attempts > 1 {
                let _ = write!(line, " attempts={}", p.attempts);
            }
            if let Some(bytes) = p.output_bytes {
                let _ = write!(line, " {}B", bytes);
            }
            if p.cost_usd > 0.0 {
                let _ = write!(line, " ${:.3}", p.cost_usd);
            }
            let _ = writeln!(out, "{}", line.trim_end());
            if let Some(ref error) = p.error {
                let _ = writeln!(out, "      {}", error);
            }
        }

        let _ = writeln!(out, "{}", "─".repeat(60));
        let _ = writeln!(
            out,
            "  completed: {}  checkpointed: {}  skipped: {}  failed: {}",
            self.phases_in(PhaseState::Succeeded).len(),
            self.phases_in(PhaseState::Checkpointed).len(),
            self.phases.iter().filter(|p| p.state.is_skipped()).count(),
            self.phases_in(PhaseState::Failed).len(),
        );
        let _ = writeln!(out, "  estimated cost: ${:.3}", self.total_cost());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase_event(run_id: Uuid, phase: &str, event_type: EventType, state: PhaseState) -> Event {
        Event::new(
            run_id,
            Some(phase.to_string()),
            event_type,
            format!("{}:{}:abc", run_id, phase),
            format!("{} {:?}", phase, event_type),
            state,
        )
    }

    #[test]
    fn test_report_from_events() {
        let run_id = Uuid::new_v4();

        let events = vec![
            Event::new(
                run_id,
                None,
                EventType::RunStarted,
                format!("{}:start", run_id),
                "Run started".to_string(),
                PhaseState::Running,
            )
            .with_pipeline("video"),
            phase_event(run_id, "script", EventType::PhaseSkipped, PhaseState::Checkpointed)
                .with_output(900, "d1".into()),
            phase_event(run_id, "voice", EventType::PhaseStarted, PhaseState::Running)
                .with_attempt(1),
            phase_event(run_id, "voice", EventType::PhaseRetrying, PhaseState::Running)
                .with_attempt(1)
                .with_error("transport error: reset".into()),
            phase_event(run_id, "voice", EventType::PhaseStarted, PhaseState::Running)
                .with_attempt(2),
            phase_event(run_id, "voice", EventType::PhaseSucceeded, PhaseState::Succeeded)
                .with_attempt(2)
                .with_cost(0.3)
                .with_output(40_000, "d2".into()),
            phase_event(
                run_id,
                "publish",
                EventType::PhaseSkipped,
                PhaseState::SkippedMissingCredential,
            ),
            Event::new(
                run_id,
                None,
                EventType::RunCompleted,
                format!("{}:complete", run_id),
                "Run completed".to_string(),
                PhaseState::Succeeded,
            ),
        ];

        let report = RunReport::from_events(&events).unwrap();

        assert_eq!(report.run_id, run_id);
        assert_eq!(report.pipeline, "video");
        assert!(report.is_success());
        assert_eq!(report.phases.len(), 3);
        assert_eq!(report.outcome("script").unwrap().state, PhaseState::Checkpointed);

        let voice = report.outcome("voice").unwrap();
        assert_eq!(voice.state, PhaseState::Succeeded);
        assert_eq!(voice.attempts, 2);
        assert_eq!(voice.output_digest.as_deref(), Some("d2"));
        assert!((report.total_cost() - 0.3).abs() < 1e-9);

        let rendered = report.render();
        assert!(rendered.contains("skipped_missing_credential"));
        assert!(rendered.contains("estimated cost: $0.300"));
    }

    #[test]
    fn test_failed_run() {
        let run_id = Uuid::new_v4();
        let events = vec![
            Event::new(
                run_id,
                None,
                EventType::RunStarted,
                "k".into(),
                "Run started".into(),
                PhaseState::Running,
            ),
            Event::new(
                run_id,
                Some("scenes".into()),
                EventType::RunFailed,
                "k".into(),
                "Run failed".into(),
                PhaseState::Failed,
            )
            .with_error("quota exhausted".into()),
        ];

        let report = RunReport::from_events(&events).unwrap();
        assert_eq!(
            report.status,
            RunStatus::Failed {
                phase: "scenes".into(),
                error: "quota exhausted".into()
            }
        );
        assert!(report.render().contains("failed at 'scenes'"));
    }

    #[test]
    fn test_empty_journal() {
        assert!(RunReport::from_events(&[]).is_none());
    }
}
