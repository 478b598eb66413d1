//! Concrete pipelines and the phases they share.
//!
//! Each pipeline module turns a [`Config`] into an ordered list of phases.
//! [`execute`] owns the run directory for the duration of a run: it takes the
//! run lock, opens the checkpoint store and journal, and hands the phases to
//! the [`Engine`].

pub mod dropship;
pub mod ideas;
pub mod video;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::adapters::anthropic::complete;
use crate::adapters::{AnthropicAdapter, HttpAdapter, QuotaGuard, ServiceAdapter, ServiceCall};
use crate::config::{Config, LlmSettings};
use crate::core::{
    Engine, FileLock, FsCheckpointStore, Phase, PhaseContext, PhaseOutput, PhaseSpec, RunJournal,
};
use crate::domain::{Artifact, RunReport};
use crate::error::PipelineError;
use crate::normalize::{normalize, ExpectedShape};
use crate::sources::{collect_signals, Signal, SignalQuery, SignalSource};
use crate::store::ArtifactStore;

/// Where and how a run executes
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub output_dir: PathBuf,
    /// Side-effect phases are previewed, not executed
    pub dry_run: bool,
    /// Run only this phase (inputs come from existing checkpoints)
    pub only: Option<String>,
}

impl RunOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            dry_run: false,
            only: None,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_only(mut self, phase: Option<String>) -> Self {
        self.only = phase;
        self
    }
}

/// Keep only the named phase, or all of them
pub fn select_phases(
    phases: Vec<Box<dyn Phase>>,
    only: Option<&str>,
) -> Result<Vec<Box<dyn Phase>>> {
    let Some(name) = only else {
        return Ok(phases);
    };

    let known: Vec<String> = phases.iter().map(|p| p.spec().name.clone()).collect();
    let selected: Vec<Box<dyn Phase>> = phases
        .into_iter()
        .filter(|p| p.spec().name == name)
        .collect();

    if selected.is_empty() {
        anyhow::bail!("unknown phase '{}' (expected one of: {})", name, known.join(", "));
    }
    Ok(selected)
}

/// Refuse to start when a required phase lacks its credential
pub fn preflight(phases: &[Box<dyn Phase>]) -> Result<(), PipelineError> {
    let missing: Vec<String> = phases
        .iter()
        .map(|p| p.spec())
        .filter(|spec| !spec.is_optional())
        .filter_map(|spec| {
            spec.missing_credential
                .as_ref()
                .map(|cred| format!("{} (needed by '{}')", cred, spec.name))
        })
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::Auth(format!(
            "missing credentials: {}",
            missing.join(", ")
        )))
    }
}

/// Run phases in `options.output_dir`, holding the run lock throughout
pub async fn execute(
    pipeline: &str,
    phases: Vec<Box<dyn Phase>>,
    options: &RunOptions,
) -> Result<RunReport> {
    let minimums: Vec<(String, u64)> = phases
        .iter()
        .map(|p| (p.spec().output.clone(), p.spec().min_checkpoint_bytes))
        .collect();
    let phases = select_phases(phases, options.only.as_deref())?;
    preflight(&phases)?;

    tokio::fs::create_dir_all(&options.output_dir)
        .await
        .with_context(|| format!("Failed to create {}", options.output_dir.display()))?;
    let _lock = FileLock::for_run_dir(&options.output_dir)
        .context("Another run is using this output directory")?;

    let checkpoints = Arc::new(FsCheckpointStore::open(&options.output_dir).await?);
    let journal = RunJournal::open(&options.output_dir).await?;

    info!(
        pipeline,
        dir = %options.output_dir.display(),
        dry_run = options.dry_run,
        "Executing pipeline"
    );
    Engine::new(checkpoints)
        .with_output_minimums(minimums)
        .with_journal(journal)
        .with_dry_run(options.dry_run)
        .run(pipeline, &phases)
        .await
}

/// Default output directory: one per pipeline per UTC day, so a same-day rerun resumes
pub fn dated_run_dir(config: &Config, pipeline: &str) -> PathBuf {
    config
        .run_dir(pipeline)
        .join(Utc::now().format("%Y%m%d").to_string())
}

/// Build webhook adapter (payload POSTed to the URL itself)
pub(crate) fn webhook_adapter(url: Option<&str>) -> Arc<dyn ServiceAdapter> {
    Arc::new(HttpAdapter::new("build-webhook", url.unwrap_or_default()))
}

/// Language model adapter behind the shared quota guard
pub(crate) fn llm_adapter(config: &Config) -> Arc<dyn ServiceAdapter> {
    let api_key = config
        .credentials
        .anthropic_api_key
        .as_deref()
        .unwrap_or_default();
    Arc::new(
        QuotaGuard::new(Arc::new(AnthropicAdapter::new(api_key)))
            .with_cooldown(Duration::from_millis(config.retry.quota_cooldown_ms))
            .with_max_concurrent(config.llm.max_concurrent),
    )
}

/// Collected posts, as checkpointed by the collection phases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalReport {
    pub collected_at: DateTime<Utc>,
    pub total: usize,
    pub sources: BTreeMap<String, usize>,
    pub signals: Vec<Signal>,
}

impl SignalReport {
    pub fn new(signals: Vec<Signal>) -> Self {
        let mut sources = BTreeMap::new();
        for signal in &signals {
            *sources.entry(signal.source.clone()).or_insert(0) += 1;
        }
        Self {
            collected_at: Utc::now(),
            total: signals.len(),
            sources,
            signals,
        }
    }
}

/// Gathers public posts from every configured source
pub struct CollectPhase {
    spec: PhaseSpec,
    sources: Vec<Box<dyn SignalSource>>,
    query: SignalQuery,
}

impl CollectPhase {
    pub fn new(spec: PhaseSpec, sources: Vec<Box<dyn SignalSource>>, query: SignalQuery) -> Self {
        Self {
            spec,
            sources,
            query,
        }
    }
}

#[async_trait]
impl Phase for CollectPhase {
    fn spec(&self) -> &PhaseSpec {
        &self.spec
    }

    async fn execute(&self, _ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PipelineError> {
        let signals = collect_signals(&self.sources, &self.query).await?;
        if signals.is_empty() {
            return Err(PipelineError::validation("no posts found for any keyword"));
        }

        let report = SignalReport::new(signals);
        let summary = format!("{} posts from {} sources", report.total, report.sources.len());
        Ok(PhaseOutput::json(&report)?.with_summary(summary))
    }
}

/// Artifacts extracted by one analyze phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub analyzed_posts: usize,
    /// Newly accepted by the store in this run
    pub added: usize,
    /// Everything extracted, deduplicated and ranked by confidence
    pub artifacts: Vec<Artifact>,
}

/// How an analyze phase batches posts and phrases its prompt
#[derive(Clone)]
pub struct AnalysisPlan {
    pub input: String,
    pub max_posts: usize,
    pub batch_size: usize,
    pub shape: ExpectedShape,
    pub store_path: PathBuf,
    pub store_kind: &'static str,
    pub prompt: fn(&[Signal]) -> String,
}

/// LLM analysis of collected posts into store artifacts
pub struct AnalyzePhase {
    spec: PhaseSpec,
    llm: Arc<dyn ServiceAdapter>,
    settings: LlmSettings,
    plan: AnalysisPlan,
}

impl AnalyzePhase {
    pub fn new(
        spec: PhaseSpec,
        llm: Arc<dyn ServiceAdapter>,
        settings: LlmSettings,
        plan: AnalysisPlan,
    ) -> Self {
        Self {
            spec,
            llm,
            settings,
            plan,
        }
    }
}

#[async_trait]
impl Phase for AnalyzePhase {
    fn spec(&self) -> &PhaseSpec {
        &self.spec
    }

    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PipelineError> {
        let report: SignalReport = ctx.input_json(&self.plan.input)?;
        let mut posts = report.signals;
        posts.sort_by(|a, b| b.score.cmp(&a.score));
        posts.truncate(self.plan.max_posts);

        let prompts: Vec<String> = posts
            .chunks(self.plan.batch_size.max(1))
            .map(|batch| (self.plan.prompt)(batch))
            .collect();
        let artifacts = analyze_batches(
            ctx,
            self.llm.clone(),
            &self.settings,
            prompts,
            &self.plan.shape,
        )
        .await?;

        let mut store = ArtifactStore::open(&self.plan.store_path, self.plan.store_kind).await?;
        let added = store.add(artifacts.clone()).await?;

        let output = AnalysisOutput {
            analyzed_posts: posts.len(),
            added,
            artifacts: rank(artifacts),
        };
        let summary = format!(
            "{} extracted, {} new, store now holds {}",
            output.artifacts.len(),
            added,
            store.len()
        );
        Ok(PhaseOutput::json(&output)?.with_summary(summary))
    }
}

/// Dedup by name (first seen wins) and sort by confidence, unscored last
pub fn rank(artifacts: Vec<Artifact>) -> Vec<Artifact> {
    let mut seen = HashSet::new();
    let mut ranked: Vec<Artifact> = artifacts
        .into_iter()
        .filter(|a| seen.insert(a.key()))
        .collect();
    ranked.sort_by(|a, b| b.confidence.cmp(&a.confidence));
    ranked
}

/// Send prompts to the LLM with bounded concurrency and normalize each reply
///
/// Replies that cannot be parsed are logged and dropped. The phase fails
/// only when no batch produced anything usable.
pub async fn analyze_batches(
    ctx: &PhaseContext<'_>,
    llm: Arc<dyn ServiceAdapter>,
    settings: &LlmSettings,
    prompts: Vec<String>,
    shape: &ExpectedShape,
) -> Result<Vec<Artifact>, PipelineError> {
    let total = prompts.len();
    let replies: Vec<Result<(String, f64), PipelineError>> = stream::iter(prompts)
        .map(|prompt| {
            let llm = llm.clone();
            let model = settings.model.clone();
            let max_tokens = settings.max_tokens;
            async move { complete(llm.as_ref(), &model, &prompt, max_tokens).await }
        })
        .buffered(settings.max_concurrent.max(1))
        .collect()
        .await;

    let mut artifacts = Vec::new();
    let mut usable = 0;
    let mut first_error = None;

    for (index, reply) in replies.into_iter().enumerate() {
        let batch = index + 1;
        match reply {
            Ok((text, cost)) => {
                ctx.record_cost(cost);
                match normalize(&text, shape) {
                    Ok(items) => {
                        info!(batch, total, items = items.len(), "Batch analyzed");
                        usable += 1;
                        artifacts.extend(items);
                    }
                    Err(err) => {
                        warn!(batch, total, snippet = %err.snippet, "Unparseable reply, discarding batch");
                        first_error.get_or_insert(PipelineError::validation(format!(
                            "batch {} reply was not parseable",
                            batch
                        )));
                    }
                }
            }
            Err(err) => {
                warn!(batch, total, error = %err.diagnostic(), "Batch failed");
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        Some(err) if usable == 0 => Err(err),
        _ => Ok(artifacts),
    }
}

/// Write checkpoint bytes to a file for tools that need a path
pub(crate) async fn materialize(dir: &Path, name: &str, data: &[u8]) -> Result<PathBuf, PipelineError> {
    let path = dir.join(name);
    tokio::fs::write(&path, data).await?;
    Ok(path)
}

/// POST a build request to the configured webhook
pub(crate) async fn send_build_request(
    webhook: &dyn ServiceAdapter,
    payload: Value,
) -> Result<(), PipelineError> {
    webhook.call(ServiceCall::new("", payload)).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::adapters::{ServiceAdapter, ServiceCall, ServiceError, ServiceResponse};

    /// LLM stand-in replying with canned texts in call order
    pub struct CannedLlm {
        replies: Mutex<VecDeque<Result<String, ServiceError>>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl CannedLlm {
        pub fn new(replies: Vec<Result<String, ServiceError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ServiceAdapter for CannedLlm {
        fn name(&self) -> &str {
            "canned-llm"
        }

        async fn call(&self, call: ServiceCall) -> Result<ServiceResponse, ServiceError> {
            let prompt = call
                .payload
                .pointer("/messages/0/content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            self.prompts.lock().unwrap().push(prompt);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ServiceError::transient("canned-llm", "no reply left")))?;
            Ok(ServiceResponse::new(reply.into_bytes()).with_cost(0.002))
        }
    }

    /// Records every payload it accepts; the calls numbered in `failing`
    /// (from 1) fail with a transient error instead
    #[derive(Default)]
    pub struct RecordingWebhook {
        pub payloads: Mutex<Vec<Value>>,
        failing: Vec<usize>,
        calls: Mutex<usize>,
    }

    impl RecordingWebhook {
        pub fn failing_on(calls: &[usize]) -> Self {
            Self {
                failing: calls.to_vec(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ServiceAdapter for RecordingWebhook {
        fn name(&self) -> &str {
            "recording-webhook"
        }

        async fn call(&self, call: ServiceCall) -> Result<ServiceResponse, ServiceError> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if self.failing.contains(&n) {
                return Err(ServiceError::transient("recording-webhook", "connection reset"));
            }
            self.payloads.lock().unwrap().push(call.payload);
            Ok(ServiceResponse::new(b"{}".to_vec()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::phase::Requirement;

    struct Named(PhaseSpec);

    #[async_trait]
    impl Phase for Named {
        fn spec(&self) -> &PhaseSpec {
            &self.0
        }

        async fn execute(&self, _ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PipelineError> {
            Ok(PhaseOutput::bytes(b"ok".to_vec()))
        }
    }

    #[test]
    fn test_preflight_rejects_required_missing_credential() {
        let phases: Vec<Box<dyn Phase>> = vec![
            Box::new(Named(PhaseSpec::new("optional", "a").optional().credential("X", None))),
            Box::new(Named(PhaseSpec::new("required", "b").credential("ANTHROPIC_API_KEY", None))),
        ];
        let err = preflight(&phases).unwrap_err();
        assert!(matches!(err, PipelineError::Auth(_)));
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
        assert!(!err.to_string().contains("'optional'"));

        let ok: Vec<Box<dyn Phase>> = vec![Box::new(Named(
            PhaseSpec::new("optional", "a").optional().credential("X", None),
        ))];
        assert!(preflight(&ok).is_ok());
        assert_eq!(ok[0].spec().requirement, Requirement::Optional);
    }

    #[test]
    fn test_select_single_phase() {
        let phases = || -> Vec<Box<dyn Phase>> {
            vec![
                Box::new(Named(PhaseSpec::new("scrape", "posts.json"))),
                Box::new(Named(PhaseSpec::new("analyze", "ideas.json"))),
            ]
        };

        let selected = select_phases(phases(), Some("analyze")).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].spec().name, "analyze");

        assert_eq!(select_phases(phases(), None).unwrap().len(), 2);
        let err = select_phases(phases(), Some("deploy")).err().unwrap();
        assert!(err.to_string().contains("scrape, analyze"));
    }

    #[test]
    fn test_rank_dedups_and_orders() {
        let ranked = rank(vec![
            Artifact::new("A").with_confidence(5),
            Artifact::new("B"),
            Artifact::new("a").with_confidence(9),
            Artifact::new("C").with_confidence(8),
        ]);
        let names: Vec<&str> = ranked.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["C", "A", "B"]);
    }
}
