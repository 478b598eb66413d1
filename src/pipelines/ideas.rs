//! App idea pipeline: scrape pain points, extract ideas, send the best to a builder.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::{
    llm_adapter, send_build_request, webhook_adapter, AnalysisPlan, AnalyzePhase, CollectPhase,
};
use crate::adapters::ServiceAdapter;
use crate::config::Config;
use crate::core::{Phase, PhaseContext, PhaseOutput, PhaseSpec, RetryPolicy};
use crate::domain::Artifact;
use crate::error::PipelineError;
use crate::normalize::ExpectedShape;
use crate::sources::{HackerNewsSource, RedditSource, Signal, SignalQuery, SignalSource};
use crate::store::ArtifactStore;

pub const PIPELINE: &str = "ideas";
pub const PHASES: &[&str] = &["scrape", "analyze", "build"];

pub const POSTS_OUTPUT: &str = "posts.json";
pub const IDEAS_OUTPUT: &str = "ideas.json";
pub const BUILD_OUTPUT: &str = "build.json";
/// Ideas already sent by an unfinished build phase
pub const BUILD_SENT_KEY: &str = "build_sent.json";
pub const STORE_KIND: &str = "ideas";

/// Posts per LLM call
const BATCH_SIZE: usize = 5;
const MAX_BODY_IN_PROMPT: usize = 800;

/// Per-run overrides from the command line
#[derive(Debug, Clone, Default)]
pub struct IdeasOverrides {
    pub keywords: Option<Vec<String>>,
    pub time_range: Option<crate::sources::TimeRange>,
    pub min_confidence: Option<u8>,
}

/// Phases of the ideas pipeline, in order
pub fn phases(config: &Config, overrides: &IdeasOverrides) -> Vec<Box<dyn Phase>> {
    let credentials = &config.credentials;

    let sources: Vec<Box<dyn SignalSource>> = vec![
        Box::new(HackerNewsSource::default()),
        Box::new(RedditSource::default()),
    ];
    let query = SignalQuery::new(
        overrides
            .keywords
            .clone()
            .unwrap_or_else(|| config.ideas.keywords.clone()),
    )
    .with_time_range(overrides.time_range.unwrap_or(config.ideas.time_range));

    let llm = llm_adapter(config);

    let scrape = CollectPhase::new(
        PhaseSpec::new("scrape", POSTS_OUTPUT)
            .min_bytes(2)
            .retry(config.retry.clone()),
        sources,
        query,
    );

    let analyze = AnalyzePhase::new(
        PhaseSpec::new("analyze", IDEAS_OUTPUT)
            .input(POSTS_OUTPUT)
            .retry(config.retry.clone())
            .credential("ANTHROPIC_API_KEY", credentials.anthropic_api_key.as_deref()),
        llm,
        config.llm.clone(),
        analysis_plan(config.ideas_store(), config.ideas.max_posts),
    );

    let build = BuildPhase::new(
        webhook_adapter(credentials.build_webhook_url.as_deref()),
        config.ideas_store(),
        overrides.min_confidence.unwrap_or(config.ideas.min_confidence),
        config.ideas.build_count,
        credentials.build_webhook_url.as_deref(),
    );

    vec![Box::new(scrape), Box::new(analyze), Box::new(build)]
}

pub fn analysis_plan(store_path: PathBuf, max_posts: usize) -> AnalysisPlan {
    AnalysisPlan {
        input: POSTS_OUTPUT.to_string(),
        max_posts,
        batch_size: BATCH_SIZE,
        shape: ExpectedShape::ideas(),
        store_path,
        store_kind: STORE_KIND,
        prompt: analysis_prompt,
    }
}

/// Prompt asking for app ideas grounded in a batch of posts
pub fn analysis_prompt(posts: &[Signal]) -> String {
    let mut prompt = String::from(
        "You analyze online posts for unmet needs that a small mobile app could solve.\n\
         For each post below, identify the underlying problem and propose concrete app ideas.\n\n",
    );

    for (i, post) in posts.iter().enumerate() {
        let body: String = post.body.chars().take(MAX_BODY_IN_PROMPT).collect();
        prompt.push_str(&format!(
            "--- POST {} (id: {}, source: {}, score: {}) ---\nTitle: {}\n{}\n\n",
            i + 1,
            post.id,
            post.source,
            post.score,
            post.title,
            body
        ));
    }

    prompt.push_str(
        "Return ONLY a JSON array. Each element must have: \"name\", \"description\", \
         \"problem\", \"target_audience\", \"key_features\" (array of strings), \
         \"mvp_scope\", \"confidence\" (integer 0-10: how likely people would pay), \
         \"reasoning\", \"source_post_id\". Skip posts with no real app opportunity.",
    );
    prompt
}

/// Build prompt for one idea
pub fn build_prompt(idea: &Artifact) -> String {
    let description = idea
        .field_str("description")
        .or_else(|| idea.field_str("problem"))
        .unwrap_or_default();
    let audience = idea.field_str("target_audience").unwrap_or("general users");

    let mut features: Vec<String> = idea
        .fields
        .get("key_features")
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|f| f.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    if features.is_empty() {
        if let Some(scope) = idea.field_str("mvp_scope") {
            features.push(scope.to_string());
        }
    }
    let features = if features.is_empty() {
        "- Core functionality as described above".to_string()
    } else {
        features
            .iter()
            .map(|f| format!("- {}", f))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "Build me an Android app called \"{}\".\n\n{}\n\nKey features:\n{}\n\n\
         Target audience: {}\n\nKeep the MVP simple and focused.",
        idea.name, description, features, audience
    )
}

/// One idea sent to the builder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    pub idea: String,
    pub confidence: Option<u8>,
    pub prompt: String,
    pub sent_at: DateTime<Utc>,
}

/// Sends the top ideas to the build webhook
pub struct BuildPhase {
    spec: PhaseSpec,
    webhook: Arc<dyn ServiceAdapter>,
    store_path: PathBuf,
    min_confidence: u8,
    count: usize,
}

impl BuildPhase {
    pub fn new(
        webhook: Arc<dyn ServiceAdapter>,
        store_path: PathBuf,
        min_confidence: u8,
        count: usize,
        webhook_url: Option<&str>,
    ) -> Self {
        Self {
            spec: PhaseSpec::new("build", BUILD_OUTPUT)
                .input(IDEAS_OUTPUT)
                .optional()
                .side_effect()
                .retry(RetryPolicy::default().with_max_attempts(2))
                .credential("FORGELINE_BUILD_WEBHOOK", webhook_url),
            webhook,
            store_path,
            min_confidence,
            count,
        }
    }

    /// Ideas at or above the threshold; the single best idea when none qualifies
    pub fn select<'a>(&self, store: &'a ArtifactStore) -> Vec<&'a Artifact> {
        let ranked = store.top(store.len());
        let viable: Vec<&Artifact> = ranked
            .iter()
            .copied()
            .filter(|a| a.confidence.unwrap_or(0) >= self.min_confidence)
            .take(self.count)
            .collect();

        if viable.is_empty() {
            info!(
                min_confidence = self.min_confidence,
                "No idea meets the confidence threshold, falling back to the top idea"
            );
            return ranked.into_iter().take(1).collect();
        }
        viable
    }
}

#[async_trait]
impl Phase for BuildPhase {
    fn spec(&self) -> &PhaseSpec {
        &self.spec
    }

    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PipelineError> {
        let store = ArtifactStore::snapshot(&self.store_path, STORE_KIND).await?;
        let selected = self.select(&store);
        if selected.is_empty() {
            return Err(PipelineError::MissingInput("scored ideas in the store".to_string()));
        }

        // A retried or interrupted build must not send the same idea twice
        let checkpoints = ctx.checkpoints();
        let mut sent: Vec<BuildRequest> = if checkpoints.exists(BUILD_SENT_KEY).await? {
            let raw = checkpoints.read(BUILD_SENT_KEY).await?;
            serde_json::from_slice(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "Unreadable build ledger, starting over");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        let mut new_requests = 0;
        for idea in selected {
            if sent.iter().any(|r| r.idea.eq_ignore_ascii_case(&idea.name)) {
                info!(idea = %idea.name, "Already sent to builder");
                continue;
            }
            let prompt = build_prompt(idea);
            info!(idea = %idea.name, confidence = ?idea.confidence, "Sending idea to builder");
            send_build_request(
                self.webhook.as_ref(),
                json!({"kind": "app", "name": idea.name, "prompt": prompt}),
            )
            .await?;
            sent.push(BuildRequest {
                idea: idea.name.clone(),
                confidence: idea.confidence,
                prompt,
                sent_at: Utc::now(),
            });
            new_requests += 1;
            checkpoints
                .write(BUILD_SENT_KEY, &serde_json::to_vec_pretty(&sent)?)
                .await?;
        }

        let output = PhaseOutput::json(&sent)?;
        checkpoints.remove(BUILD_SENT_KEY).await?;

        let summary = format!(
            "{} ideas sent to builder ({} earlier)",
            sent.len(),
            sent.len() - new_requests
        );
        Ok(output.with_summary(summary))
    }

    fn preview(&self, _ctx: &PhaseContext<'_>) -> Option<String> {
        Some(format!(
            "would send up to {} ideas with confidence >= {} to the build webhook",
            self.count, self.min_confidence
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmSettings;
    use crate::core::{CheckpointStore, Engine, MemoryCheckpointStore, RecordingSleeper};
    use crate::pipelines::testing::{CannedLlm, RecordingWebhook};
    use crate::pipelines::{AnalysisOutput, SignalReport};
    use std::collections::HashMap;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn settings() -> LlmSettings {
        LlmSettings {
            model: "test-model".to_string(),
            max_tokens: 1024,
            max_concurrent: 2,
        }
    }

    fn post(id: &str, score: i64) -> Signal {
        Signal {
            id: id.to_string(),
            source: "hackernews".to_string(),
            title: format!("I wish there was an app for {}", id),
            body: String::new(),
            url: String::new(),
            score,
            num_comments: 0,
            created_at: String::new(),
            keyword: String::new(),
            author: String::new(),
            subreddit: None,
        }
    }

    #[tokio::test]
    async fn test_analyze_batches_posts_and_fills_store() {
        let temp = TempDir::new().unwrap();
        let store_path = temp.path().join("ideas.json");

        let posts: Vec<Signal> = (0..7).map(|i| post(&format!("p{}", i), i)).collect();
        let mut outputs = HashMap::new();
        outputs.insert(
            POSTS_OUTPUT.to_string(),
            serde_json::to_vec(&SignalReport::new(posts)).unwrap(),
        );

        let llm = Arc::new(CannedLlm::new(vec![
            Ok(r#"```json
[{"name": "ChoreWheel", "confidence": 8}, {"name": "RentSplit", "confidence": 6}]
```"#
                .to_string()),
            Ok("sorry, I cannot help with that".to_string()),
        ]));
        let phase = AnalyzePhase::new(
            PhaseSpec::new("analyze", IDEAS_OUTPUT).input(POSTS_OUTPUT),
            llm.clone(),
            settings(),
            analysis_plan(store_path.clone(), 30),
        );

        let checkpoints = MemoryCheckpointStore::new();
        let ctx = PhaseContext::new(Uuid::new_v4(), false, &outputs, &checkpoints);
        let output = phase.execute(&ctx).await.unwrap();
        let analysis: AnalysisOutput = serde_json::from_slice(&output.data).unwrap();

        // 7 posts in batches of 5 is two calls; the second reply is discarded
        assert_eq!(llm.calls(), 2);
        assert_eq!(analysis.analyzed_posts, 7);
        assert_eq!(analysis.added, 2);
        assert_eq!(analysis.artifacts[0].name, "ChoreWheel");
        assert!((ctx.cost() - 0.004).abs() < 1e-9);

        // Highest-scored posts go first
        assert!(llm.prompts.lock().unwrap()[0].contains("id: p6"));

        let store = ArtifactStore::snapshot(&store_path, STORE_KIND).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_analyze_fails_when_every_batch_is_unusable() {
        let temp = TempDir::new().unwrap();
        let mut outputs = HashMap::new();
        outputs.insert(
            POSTS_OUTPUT.to_string(),
            serde_json::to_vec(&SignalReport::new(vec![post("a", 1)])).unwrap(),
        );

        let phase = AnalyzePhase::new(
            PhaseSpec::new("analyze", IDEAS_OUTPUT).input(POSTS_OUTPUT),
            Arc::new(CannedLlm::new(vec![Ok("no json here".to_string())])),
            settings(),
            analysis_plan(temp.path().join("ideas.json"), 30),
        );

        let checkpoints = MemoryCheckpointStore::new();
        let ctx = PhaseContext::new(Uuid::new_v4(), false, &outputs, &checkpoints);
        let err = phase.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_build_falls_back_to_top_idea() {
        let temp = TempDir::new().unwrap();
        let store_path = temp.path().join("ideas.json");
        {
            let mut store = ArtifactStore::open(&store_path, STORE_KIND).await.unwrap();
            store
                .add(vec![
                    Artifact::new("Low").with_confidence(3),
                    Artifact::new("Lower").with_confidence(2),
                ])
                .await
                .unwrap();
        }

        let webhook = Arc::new(RecordingWebhook::default());
        let phase = BuildPhase::new(webhook.clone(), store_path, 6, 3, Some("https://hook"));

        let outputs = HashMap::new();
        let checkpoints = MemoryCheckpointStore::new();
        let ctx = PhaseContext::new(Uuid::new_v4(), false, &outputs, &checkpoints);
        let output = phase.execute(&ctx).await.unwrap();
        let sent: Vec<BuildRequest> = serde_json::from_slice(&output.data).unwrap();

        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].idea, "Low");
        let payloads = webhook.payloads.lock().unwrap();
        assert_eq!(payloads[0]["kind"], "app");
        assert!(payloads[0]["prompt"].as_str().unwrap().contains("\"Low\""));
    }

    #[tokio::test]
    async fn test_build_retry_does_not_resend_ideas() {
        let temp = TempDir::new().unwrap();
        let store_path = temp.path().join("ideas.json");
        {
            let mut store = ArtifactStore::open(&store_path, STORE_KIND).await.unwrap();
            store
                .add(vec![
                    Artifact::new("ChoreWheel").with_confidence(9),
                    Artifact::new("Plant Minder").with_confidence(8),
                    Artifact::new("Invoice Chaser").with_confidence(7),
                ])
                .await
                .unwrap();
        }
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        checkpoints.write(IDEAS_OUTPUT, b"{\"artifacts\": []}").await.unwrap();

        // Second send drops the connection; the retry must pick up from there
        let webhook = Arc::new(RecordingWebhook::failing_on(&[2]));
        let phase = BuildPhase::new(webhook.clone(), store_path, 6, 3, Some("https://hook"));
        let phases: Vec<Box<dyn Phase>> = vec![Box::new(phase)];

        let report = Engine::new(checkpoints.clone())
            .with_sleeper(Arc::new(RecordingSleeper::new()))
            .run("ideas", &phases)
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.phases[0].attempts, 2);

        let names: Vec<String> = webhook
            .payloads
            .lock()
            .unwrap()
            .iter()
            .map(|p| p["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["ChoreWheel", "Plant Minder", "Invoice Chaser"]);

        let sent: Vec<BuildRequest> =
            serde_json::from_slice(&checkpoints.read(BUILD_OUTPUT).await.unwrap()).unwrap();
        assert_eq!(sent.len(), 3);
        assert!(!checkpoints.exists(BUILD_SENT_KEY).await.unwrap());
    }

    #[test]
    fn test_build_prompt_uses_features_or_scope() {
        let idea = Artifact::new("ChoreWheel")
            .with_field("description", "Rotating chores for roommates")
            .with_field("key_features", json!(["Rotation", "Reminders"]));
        let prompt = build_prompt(&idea);
        assert!(prompt.contains("- Rotation\n- Reminders"));
        assert!(prompt.contains("Target audience: general users"));

        let scoped = Artifact::new("X").with_field("mvp_scope", "One screen");
        assert!(build_prompt(&scoped).contains("- One screen"));
    }

    #[test]
    fn test_missing_webhook_marks_credential() {
        let phase = BuildPhase::new(
            Arc::new(RecordingWebhook::default()),
            PathBuf::from("ideas.json"),
            6,
            1,
            None,
        );
        assert_eq!(
            phase.spec().missing_credential.as_deref(),
            Some("FORGELINE_BUILD_WEBHOOK")
        );
        assert!(phase.spec().is_optional());
        assert!(phase.spec().side_effect);
    }
}
