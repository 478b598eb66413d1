//! Promo video pipeline: script, narration, background music, generated
//! scenes, assembly, thumbnail and upload.
//!
//! Scene generation is the slow, expensive step. Every finished clip is
//! written as its own sub-checkpoint (`scene_<id>_<prompt digest>.mp4`)
//! before the next one is requested, so a run interrupted halfway through
//! only regenerates the clips it never finished, and a rewritten script
//! never reuses clips made for different prompts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::{llm_adapter, materialize};
use crate::adapters::anthropic::complete;
use crate::adapters::vertex::vertex_http;
use crate::adapters::{
    run_to_completion, FfmpegAssembler, HttpAdapter, LongRunningOperation,
    LongRunningPolicy, MediaAssembler, MediaInfo, ServiceAdapter, ServiceCall, TelegramClient,
    VertexPredictAdapter, VertexVideoOperation, VideoPublisher,
};
use crate::config::{Config, LlmSettings, VideoFormat};
use crate::core::{
    hash_bytes, Phase, PhaseContext, PhaseOutput, PhaseSpec, RetryPolicy, Sleeper, TokioSleeper,
};
use crate::error::PipelineError;
use crate::normalize::extract_value;

pub const PIPELINE: &str = "video";
pub const PHASES: &[&str] = &[
    "script", "voice", "music", "scenes", "assemble", "thumbnail", "publish",
];

pub const SCRIPT_OUTPUT: &str = "script.json";
pub const NARRATION_OUTPUT: &str = "narration.mp3";
pub const MUSIC_OUTPUT: &str = "music.wav";
pub const SCENES_OUTPUT: &str = "scenes.json";
pub const VIDEO_OUTPUT: &str = "video.mp4";
pub const THUMBNAIL_OUTPUT: &str = "thumbnail.jpg";
pub const PUBLISH_OUTPUT: &str = "publish.json";

pub const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";
const TTS_MODEL: &str = "eleven_flash_v2_5";

/// Voices picked from when none is configured
pub const MALE_VOICES: &[&str] = &[
    "pNInz6obpgDQGcFmaJgB",
    "TxGEqnHWrfWFTfGW9XjX",
    "ErXwobaYiN019PkySvjV",
    "VR6AewLTigWG4xSOukaG",
    "ODq5zmih8GrVes37Dy39",
];
pub const FEMALE_VOICES: &[&str] = &[
    "21m00Tcm4TlvDq8ikWAM",
    "EXAVITQu4vr4xnSDxMaL",
    "AZnzlk1XvdvUeBnXmlld",
    "MF3mGyEYCl7XYWbV9V6O",
    "ThT5KcBeYPX3keUQqHPh",
];

/// Narration shorter than this is a failed synthesis
const MIN_NARRATION_BYTES: u64 = 1000;
/// Music beds this small are silence or an error body
const MIN_MUSIC_BYTES: u64 = 1000;
/// Assembled videos below this size are broken
const MIN_VIDEO_BYTES: u64 = 500_000;
/// Assembled videos shorter than this are broken
const MIN_VIDEO_SECONDS: f64 = 5.0;

const SCENE_SECONDS: u32 = 8;
/// Pause between consecutive scene generations
const SCENE_DELAY: Duration = Duration::from_secs(15);
const THUMBNAIL_ASPECT: &str = "16:9";

const TTS_COST_PER_1K_CHARS: f64 = 0.30;
const SCENE_COST: f64 = 0.50;
const THUMBNAIL_COST: f64 = 0.04;
const MUSIC_COST: f64 = 0.01;

const DEFAULT_MUSIC_PROMPT: &str = "Upbeat, confident, clean instrumental background music for a \
     mobile app advertisement. Modern minimal piano and light percussion. Professional tone, \
     no vocals, 120 BPM.";
/// Visual style suffixes the script writer appends; meaningless to a music model
const VISUAL_SUFFIXES: &[&str] = &["cinematic 4K professional", "4K professional", "cinematic", "professional"];

/// What to make a video about
#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub topic: String,
    pub format: VideoFormat,
    /// Optional product brief passed to the script writer
    pub brief: Option<String>,
}

impl VideoRequest {
    pub fn new(topic: impl Into<String>, format: VideoFormat) -> Self {
        Self {
            topic: topic.into(),
            format,
            brief: None,
        }
    }

    pub fn with_brief(mut self, brief: Option<String>) -> Self {
        self.brief = brief;
        self
    }
}

/// Lowercase alphanumerics joined by dashes
pub fn slug(topic: &str) -> String {
    let mut slug = String::new();
    for c in topic.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.chars().take(60).collect()
    }
}

/// Default output directory: one per topic, so reruns resume
pub fn run_dir(config: &Config, topic: &str) -> PathBuf {
    config.run_dir(PIPELINE).join(slug(topic))
}

/// Stable voice for a topic: the same topic always gets the same narrator
pub fn choose_voice(topic: &str) -> &'static str {
    let digest = Sha256::digest(topic.trim().to_lowercase().as_bytes());
    let pool = if digest[0] % 2 == 0 {
        MALE_VOICES
    } else {
        FEMALE_VOICES
    };
    pool[digest[1] as usize % pool.len()]
}

/// Phases of the video pipeline, in order
pub fn phases(config: &Config, request: &VideoRequest) -> Vec<Box<dyn Phase>> {
    let credentials = &config.credentials;
    let video = &config.video;
    let project = video.gcp_project.clone().unwrap_or_default();
    let token = credentials.gcp_access_token.clone().unwrap_or_default();

    let llm = llm_adapter(config);
    let script = ScriptPhase::new(llm, config.llm.clone(), request.clone())
        .with_retry(config.retry.clone())
        .with_credential(credentials.anthropic_api_key.as_deref());

    let tts: Arc<dyn ServiceAdapter> = Arc::new(
        HttpAdapter::new("elevenlabs", ELEVENLABS_BASE_URL)
            .with_header(
                "xi-api-key",
                credentials.elevenlabs_api_key.as_deref().unwrap_or_default(),
            )
            .with_header("Accept", "audio/mpeg"),
    );
    let voice_id = video
        .voice_id
        .clone()
        .unwrap_or_else(|| choose_voice(&request.topic).to_string());
    let voice = VoicePhase::new(tts, voice_id, credentials.elevenlabs_api_key.as_deref())
        .with_retry(config.retry.clone());

    let vertex: Arc<dyn ServiceAdapter> = Arc::new(vertex_http(&video.gcp_location, &token));
    let lyria: Arc<dyn ServiceAdapter> = Arc::new(VertexPredictAdapter::music(
        vertex.clone(),
        &project,
        &video.gcp_location,
    ));
    let music = MusicPhase::new(lyria).with_credentials(
        credentials.gcp_access_token.as_deref(),
        video.gcp_project.as_deref(),
    );

    let operation: Arc<dyn LongRunningOperation> = Arc::new(VertexVideoOperation::new(
        vertex.clone(),
        &project,
        &video.gcp_location,
    ));
    let policy = LongRunningPolicy {
        quota_wait: Duration::from_millis(config.retry.quota_cooldown_ms),
        ..LongRunningPolicy::default()
    };
    let scenes = ScenesPhase::new(operation, request.format)
        .with_policy(policy)
        .with_credentials(
            credentials.gcp_access_token.as_deref(),
            video.gcp_project.as_deref(),
        );

    let assemble = AssemblePhase::new(Arc::new(FfmpegAssembler::new()));

    let images: Arc<dyn ServiceAdapter> =
        Arc::new(VertexPredictAdapter::image(vertex, &project, &video.gcp_location));
    let thumbnail = ThumbnailPhase::new(images).with_credentials(
        credentials.gcp_access_token.as_deref(),
        video.gcp_project.as_deref(),
    );

    let publisher: Arc<dyn VideoPublisher> = Arc::new(TelegramClient::new(
        credentials.telegram_bot_token.clone().unwrap_or_default(),
        credentials.telegram_chat_id.clone().unwrap_or_default(),
    ));
    let publish = PublishPhase::new(publisher)
        .with_credentials(
            credentials.telegram_bot_token.as_deref(),
            credentials.telegram_chat_id.as_deref(),
        )
        .enabled(video.publish);

    vec![
        Box::new(script),
        Box::new(voice),
        Box::new(music),
        Box::new(scenes),
        Box::new(assemble),
        Box::new(thumbnail),
        Box::new(publish),
    ]
}

/// One scene of the script
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scene {
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub narration_segment: String,
    pub video_prompt: String,
}

impl Scene {
    /// Sub-checkpoint key; changes whenever the prompt does
    pub fn checkpoint_key(&self) -> String {
        format!("scene_{}_{}.mp4", self.id, hash_bytes(self.video_prompt.as_bytes()))
    }
}

/// LLM-written script
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Script {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub narration: String,
    pub scenes: Vec<Scene>,
    #[serde(default)]
    pub thumbnail_prompt: String,
    #[serde(default)]
    pub cta_text: String,
    #[serde(default)]
    pub music_prompt: Option<String>,
}

impl Script {
    /// Parse model output, keep at most `scene_count` scenes and number them from 1
    pub fn from_reply(raw: &str, scene_count: usize) -> Result<Self, PipelineError> {
        let value = extract_value(raw).map_err(|e| {
            PipelineError::validation(format!("script reply is not JSON: {}", e.snippet))
        })?;
        let mut script: Script = serde_json::from_value(value)
            .map_err(|e| PipelineError::validation(format!("script is missing fields: {}", e)))?;

        if script.narration.trim().is_empty() {
            return Err(PipelineError::validation("script has no narration"));
        }
        if script.scenes.is_empty() {
            return Err(PipelineError::validation("script has no scenes"));
        }
        if script.scenes.len() > scene_count {
            warn!(
                generated = script.scenes.len(),
                expected = scene_count,
                "Trimming extra scenes"
            );
            script.scenes.truncate(scene_count);
        } else if script.scenes.len() < scene_count {
            warn!(
                generated = script.scenes.len(),
                expected = scene_count,
                "Fewer scenes than requested, continuing"
            );
        }
        for (i, scene) in script.scenes.iter_mut().enumerate() {
            scene.id = i as u32 + 1;
        }
        Ok(script)
    }

    /// Prompt for the background music bed, stripped of visual style words
    pub fn music_prompt(&self) -> String {
        let mut prompt = self
            .music_prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_MUSIC_PROMPT)
            .to_string();

        for suffix in VISUAL_SUFFIXES {
            let Some(cut) = prompt.len().checked_sub(suffix.len()) else {
                continue;
            };
            if prompt.is_char_boundary(cut) && prompt[cut..].eq_ignore_ascii_case(suffix) {
                prompt.truncate(cut);
                prompt = prompt.trim_end_matches([' ', ',', '.']).to_string();
            }
        }
        if prompt.is_empty() {
            DEFAULT_MUSIC_PROMPT.to_string()
        } else {
            prompt
        }
    }

    /// Upload caption: title, description and call to action
    pub fn caption(&self) -> String {
        [self.title.as_str(), self.description.as_str(), self.cta_text.as_str()]
            .iter()
            .filter(|part| !part.trim().is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Prompt for a promo script in the given format
pub fn script_prompt(request: &VideoRequest) -> String {
    let count = request.format.scene_count();
    let format_rules = match request.format {
        VideoFormat::Portrait => {
            "FORMAT: 15-second vertical short.\n\
             Structure: hook (0-1.5s), problem (1.5-5s), solution (5-12s), call to action (12-15s).\n\
             Narration: 35-45 words at most. The title ends with #Shorts."
        }
        VideoFormat::Landscape => {
            "FORMAT: 45-second landscape promo.\n\
             Structure: hook (0-5s), problem (5-20s), solution (20-38s), call to action (38-45s).\n\
             Narration: 130-150 words at a natural pace."
        }
    };
    let brief = request
        .brief
        .as_deref()
        .map(|b| format!("\nPRODUCT BRIEF:\n{}\n", b))
        .unwrap_or_default();
    let scenes: Vec<String> = (1..=count)
        .map(|i| {
            format!(
                "    {{\"id\": {}, \"narration_segment\": \"words spoken during scene {}\", \
                 \"video_prompt\": \"cinematic visual for scene {}\"}}",
                i, i, i
            )
        })
        .collect();

    format!(
        "You write short-form video ads that convert.\n\n\
         Write a promo script for: {topic}\n{brief}\n{format_rules}\n\n\
         Rules: talk to one person as \"you\"; be specific; never open with the product name.\n\
         Video prompts must never show brand names, logos, readable screens or close-up faces; \
         describe environment, subject, lighting and motion, ending with \"cinematic 4K professional\".\n\n\
         Return ONLY valid JSON:\n\
         {{\n  \"title\": \"under 70 chars\",\n  \"description\": \"200-250 chars\",\n  \
         \"tags\": [\"tag1\", \"tag2\"],\n  \"narration\": \"full spoken narration\",\n  \
         \"scenes\": [\n{scenes}\n  ],\n  \"thumbnail_prompt\": \"bold photorealistic thumbnail, no text\",\n  \
         \"cta_text\": \"under 5 words\",\n  \
         \"music_prompt\": \"instrumental background music: mood, instruments, tempo, no vocals\"\n}}",
        topic = request.topic,
        brief = brief,
        format_rules = format_rules,
        scenes = scenes.join(",\n"),
    )
}

/// Writes the script with the LLM
pub struct ScriptPhase {
    spec: PhaseSpec,
    llm: Arc<dyn ServiceAdapter>,
    settings: LlmSettings,
    request: VideoRequest,
}

impl ScriptPhase {
    pub fn new(llm: Arc<dyn ServiceAdapter>, settings: LlmSettings, request: VideoRequest) -> Self {
        Self {
            spec: PhaseSpec::new("script", SCRIPT_OUTPUT).min_bytes(50),
            llm,
            settings,
            request,
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.spec = self.spec.retry(policy);
        self
    }

    pub fn with_credential(mut self, api_key: Option<&str>) -> Self {
        self.spec = self.spec.credential("ANTHROPIC_API_KEY", api_key);
        self
    }
}

#[async_trait]
impl Phase for ScriptPhase {
    fn spec(&self) -> &PhaseSpec {
        &self.spec
    }

    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PipelineError> {
        let prompt = script_prompt(&self.request);
        let (reply, cost) = complete(
            self.llm.as_ref(),
            &self.settings.model,
            &prompt,
            self.settings.max_tokens,
        )
        .await?;
        ctx.record_cost(cost);

        let script = Script::from_reply(&reply, self.request.format.scene_count())?;
        let summary = format!("'{}' with {} scenes", script.title, script.scenes.len());
        Ok(PhaseOutput::json(&script)?.with_summary(summary))
    }
}

/// Synthesizes the narration track
pub struct VoicePhase {
    spec: PhaseSpec,
    tts: Arc<dyn ServiceAdapter>,
    voice_id: String,
}

impl VoicePhase {
    pub fn new(tts: Arc<dyn ServiceAdapter>, voice_id: String, api_key: Option<&str>) -> Self {
        Self {
            spec: PhaseSpec::new("voice", NARRATION_OUTPUT)
                .input(SCRIPT_OUTPUT)
                .min_bytes(MIN_NARRATION_BYTES)
                .credential("ELEVENLABS_API_KEY", api_key),
            tts,
            voice_id,
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.spec = self.spec.retry(policy);
        self
    }
}

#[async_trait]
impl Phase for VoicePhase {
    fn spec(&self) -> &PhaseSpec {
        &self.spec
    }

    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PipelineError> {
        let script: Script = ctx.input_json(SCRIPT_OUTPUT)?;
        let payload = json!({
            "text": script.narration,
            "model_id": TTS_MODEL,
            "voice_settings": {
                "stability": 0.5,
                "similarity_boost": 0.75,
                "style": 0.3,
                "use_speaker_boost": true
            }
        });

        let response = self
            .tts
            .call(ServiceCall::new(format!("text-to-speech/{}", self.voice_id), payload))
            .await?;
        ctx.record_cost(script.narration.chars().count() as f64 / 1000.0 * TTS_COST_PER_1K_CHARS);

        let summary = format!("{} bytes, voice {}", response.body.len(), self.voice_id);
        Ok(PhaseOutput::bytes(response.body).with_summary(summary))
    }
}

/// Generates an instrumental music bed for the narration
pub struct MusicPhase {
    spec: PhaseSpec,
    music: Arc<dyn ServiceAdapter>,
}

impl MusicPhase {
    pub fn new(music: Arc<dyn ServiceAdapter>) -> Self {
        Self {
            spec: PhaseSpec::new("music", MUSIC_OUTPUT)
                .input(SCRIPT_OUTPUT)
                .optional()
                .min_bytes(MIN_MUSIC_BYTES),
            music,
        }
    }

    pub fn with_credentials(mut self, token: Option<&str>, project: Option<&str>) -> Self {
        self.spec = self
            .spec
            .credential("GCP_PROJECT", project)
            .credential("GCP_ACCESS_TOKEN", token);
        self
    }
}

#[async_trait]
impl Phase for MusicPhase {
    fn spec(&self) -> &PhaseSpec {
        &self.spec
    }

    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PipelineError> {
        let script: Script = ctx.input_json(SCRIPT_OUTPUT)?;
        let prompt = script.music_prompt();

        let response = self
            .music
            .call(ServiceCall::new("", VertexPredictAdapter::music_request(&prompt)))
            .await?;
        ctx.record_cost(MUSIC_COST);

        let summary = format!("{} bytes", response.body.len());
        Ok(PhaseOutput::bytes(response.body).with_summary(summary))
    }
}

/// One generated clip in the scene manifest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SceneClip {
    pub id: u32,
    /// Sub-checkpoint holding the clip
    pub key: String,
    pub bytes: u64,
    /// Taken from an earlier run instead of generated
    pub reused: bool,
}

/// Generates one clip per scene, checkpointing each as it lands
pub struct ScenesPhase {
    spec: PhaseSpec,
    operation: Arc<dyn LongRunningOperation>,
    policy: LongRunningPolicy,
    sleeper: Arc<dyn Sleeper>,
    aspect_ratio: &'static str,
    min_scene_bytes: u64,
}

impl ScenesPhase {
    pub fn new(operation: Arc<dyn LongRunningOperation>, format: VideoFormat) -> Self {
        Self {
            // Finished clips are sub-checkpoints, so a phase retry only
            // regenerates what is missing
            spec: PhaseSpec::new("scenes", SCENES_OUTPUT)
                .input(SCRIPT_OUTPUT)
                .retry(RetryPolicy::default().with_max_attempts(2)),
            operation,
            policy: LongRunningPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            aspect_ratio: format.aspect_ratio(),
            min_scene_bytes: format.min_scene_bytes(),
        }
    }

    pub fn with_credentials(mut self, token: Option<&str>, project: Option<&str>) -> Self {
        self.spec = self
            .spec
            .credential("GCP_PROJECT", project)
            .credential("GCP_ACCESS_TOKEN", token);
        self
    }

    pub fn with_policy(mut self, policy: LongRunningPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

impl ScenesPhase {
    /// Generate one clip, re-submitting undersized results within the
    /// policy's submission budget
    async fn generate(
        &self,
        ctx: &PhaseContext<'_>,
        scene: &Scene,
        total: usize,
    ) -> Result<Vec<u8>, PipelineError> {
        let request =
            VertexVideoOperation::request(&scene.video_prompt, self.aspect_ratio, SCENE_SECONDS);
        let budget = self.policy.max_submits.max(1);
        let mut bytes = 0;

        for submit in 1..=budget {
            info!(scene = scene.id, total, submit, "Generating scene");
            let response = run_to_completion(
                self.operation.as_ref(),
                &request,
                &self.policy,
                self.sleeper.as_ref(),
            )
            .await?;
            ctx.record_cost(SCENE_COST);

            bytes = response.body.len() as u64;
            if bytes >= self.min_scene_bytes {
                return Ok(response.body);
            }
            warn!(
                scene = scene.id,
                bytes,
                min_bytes = self.min_scene_bytes,
                submit,
                "Scene clip too small"
            );
            if submit < budget {
                self.sleeper.sleep(self.policy.error_wait).await;
            }
        }

        Err(PipelineError::validation(format!(
            "scene {} is only {} bytes after {} submissions (minimum {})",
            scene.id, bytes, budget, self.min_scene_bytes
        )))
    }
}

#[async_trait]
impl Phase for ScenesPhase {
    fn spec(&self) -> &PhaseSpec {
        &self.spec
    }

    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PipelineError> {
        let script: Script = ctx.input_json(SCRIPT_OUTPUT)?;
        let checkpoints = ctx.checkpoints();
        let total = script.scenes.len();

        let mut clips = Vec::with_capacity(total);
        let mut generated = 0;

        for scene in &script.scenes {
            let key = scene.checkpoint_key();

            match checkpoints.size(&key).await? {
                Some(size) if size >= self.min_scene_bytes => {
                    info!(scene = scene.id, total, bytes = size, "Scene already generated");
                    clips.push(SceneClip {
                        id: scene.id,
                        key,
                        bytes: size,
                        reused: true,
                    });
                    continue;
                }
                Some(size) => {
                    warn!(scene = scene.id, bytes = size, "Scene checkpoint too small, regenerating");
                    checkpoints.remove(&key).await?;
                }
                None => {}
            }

            if generated > 0 {
                self.sleeper.sleep(SCENE_DELAY).await;
            }
            let clip = self.generate(ctx, scene, total).await?;
            generated += 1;

            let bytes = clip.len() as u64;
            checkpoints.write(&key, &clip).await?;
            clips.push(SceneClip {
                id: scene.id,
                key,
                bytes,
                reused: false,
            });
        }

        let summary = format!("{} scenes ({} generated)", clips.len(), generated);
        Ok(PhaseOutput::json(&clips)?.with_summary(summary))
    }
}

/// Problems that make an assembled file unusable; empty when it is fine
pub fn video_defects(info: &MediaInfo) -> Vec<String> {
    let mut defects = Vec::new();
    if info.duration_secs < MIN_VIDEO_SECONDS {
        defects.push(format!(
            "duration {:.1}s is under {}s",
            info.duration_secs, MIN_VIDEO_SECONDS
        ));
    }
    if !info.has_video {
        defects.push("no video stream".to_string());
    }
    if !info.has_audio {
        defects.push("no audio stream".to_string());
    }
    defects
}

/// Joins the clips, narration and optional music into the final video
pub struct AssemblePhase {
    spec: PhaseSpec,
    assembler: Arc<dyn MediaAssembler>,
}

impl AssemblePhase {
    pub fn new(assembler: Arc<dyn MediaAssembler>) -> Self {
        Self {
            spec: PhaseSpec::new("assemble", VIDEO_OUTPUT)
                .input(SCENES_OUTPUT)
                .input(NARRATION_OUTPUT)
                .min_bytes(MIN_VIDEO_BYTES)
                .retry(RetryPolicy::default().with_max_attempts(2)),
            assembler,
        }
    }
}

impl AssemblePhase {
    /// Music from this run, or from an earlier one when assembling alone
    async fn music_bed(&self, ctx: &PhaseContext<'_>) -> Result<Option<Vec<u8>>, PipelineError> {
        if let Some(data) = ctx.optional_input(MUSIC_OUTPUT) {
            return Ok(Some(data.to_vec()).filter(|d| d.len() as u64 >= MIN_MUSIC_BYTES));
        }
        match ctx.checkpoints().size(MUSIC_OUTPUT).await? {
            Some(size) if size >= MIN_MUSIC_BYTES => {
                Ok(Some(ctx.checkpoints().read(MUSIC_OUTPUT).await?))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl Phase for AssemblePhase {
    fn spec(&self) -> &PhaseSpec {
        &self.spec
    }

    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PipelineError> {
        let clips: Vec<SceneClip> = ctx.input_json(SCENES_OUTPUT)?;
        if clips.is_empty() {
            return Err(PipelineError::MissingInput("scene clips".to_string()));
        }

        let scratch = tempfile::tempdir()?;
        let mut scenes = Vec::with_capacity(clips.len());
        for clip in &clips {
            let data = ctx.checkpoints().read(&clip.key).await?;
            scenes.push(materialize(scratch.path(), &clip.key, &data).await?);
        }
        let narration =
            materialize(scratch.path(), NARRATION_OUTPUT, ctx.input(NARRATION_OUTPUT)?).await?;
        let music = match self.music_bed(ctx).await? {
            Some(data) => Some(materialize(scratch.path(), MUSIC_OUTPUT, &data).await?),
            None => None,
        };
        let output = scratch.path().join(VIDEO_OUTPUT);

        self.assembler
            .assemble(&scenes, &narration, music.as_deref(), &output)
            .await
            .map_err(|e| PipelineError::other(format!("{:#}", e)))?;

        let info = self
            .assembler
            .probe(&output)
            .await
            .map_err(|e| PipelineError::other(format!("{:#}", e)))?;
        let defects = video_defects(&info);
        if !defects.is_empty() {
            return Err(PipelineError::validation(format!(
                "assembled video failed checks: {}",
                defects.join(" | ")
            )));
        }

        let video = tokio::fs::read(&output).await?;
        let summary = format!(
            "{} scenes, {:.1}s, {} bytes{}",
            clips.len(),
            info.duration_secs,
            video.len(),
            if music.is_some() { ", with music" } else { "" }
        );
        Ok(PhaseOutput::bytes(video).with_summary(summary))
    }
}

/// Generates a thumbnail image
pub struct ThumbnailPhase {
    spec: PhaseSpec,
    images: Arc<dyn ServiceAdapter>,
}

impl ThumbnailPhase {
    pub fn new(images: Arc<dyn ServiceAdapter>) -> Self {
        Self {
            spec: PhaseSpec::new("thumbnail", THUMBNAIL_OUTPUT)
                .input(SCRIPT_OUTPUT)
                .optional()
                .min_bytes(1000),
            images,
        }
    }

    pub fn with_credentials(mut self, token: Option<&str>, project: Option<&str>) -> Self {
        self.spec = self
            .spec
            .credential("GCP_PROJECT", project)
            .credential("GCP_ACCESS_TOKEN", token);
        self
    }
}

#[async_trait]
impl Phase for ThumbnailPhase {
    fn spec(&self) -> &PhaseSpec {
        &self.spec
    }

    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PipelineError> {
        let script: Script = ctx.input_json(SCRIPT_OUTPUT)?;
        let prompt = if script.thumbnail_prompt.trim().is_empty() {
            format!(
                "Bold video thumbnail for \"{}\". Rich dark background, strong contrast, \
                 photorealistic, dramatic lighting, no text in the image.",
                script.title
            )
        } else {
            script.thumbnail_prompt.clone()
        };

        let response = self
            .images
            .call(ServiceCall::new("", VertexPredictAdapter::image_request(&prompt, THUMBNAIL_ASPECT)))
            .await?;
        ctx.record_cost(THUMBNAIL_COST);

        let summary = format!("{} bytes", response.body.len());
        Ok(PhaseOutput::bytes(response.body).with_summary(summary))
    }
}

/// Where a video was published
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRecord {
    pub target: String,
    pub reference: String,
    pub title: String,
    pub published_at: DateTime<Utc>,
}

/// Uploads the finished video
pub struct PublishPhase {
    spec: PhaseSpec,
    publisher: Arc<dyn VideoPublisher>,
}

impl PublishPhase {
    pub fn new(publisher: Arc<dyn VideoPublisher>) -> Self {
        Self {
            spec: PhaseSpec::new("publish", PUBLISH_OUTPUT)
                .input(SCRIPT_OUTPUT)
                .input(VIDEO_OUTPUT)
                .optional()
                .side_effect()
                .retry(RetryPolicy::default().with_max_attempts(2)),
            publisher,
        }
    }

    pub fn with_credentials(mut self, bot_token: Option<&str>, chat_id: Option<&str>) -> Self {
        self.spec = self
            .spec
            .credential("TELEGRAM_CHAT_ID", chat_id)
            .credential("TELEGRAM_BOT_TOKEN", bot_token);
        self
    }

    /// Publishing switched off is treated like a missing credential
    pub fn enabled(mut self, enabled: bool) -> Self {
        if !enabled {
            self.spec = self.spec.credential("FORGELINE_PUBLISH", None);
        }
        self
    }
}

#[async_trait]
impl Phase for PublishPhase {
    fn spec(&self) -> &PhaseSpec {
        &self.spec
    }

    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PipelineError> {
        let script: Script = ctx.input_json(SCRIPT_OUTPUT)?;
        let video = ctx.input(VIDEO_OUTPUT)?.to_vec();
        let file_name = format!("{}.mp4", slug(&script.title));

        let reference = self
            .publisher
            .publish(video, &file_name, &script.caption())
            .await?;
        info!(publisher = self.publisher.name(), reference = %reference, "Video published");

        let record = PublishRecord {
            target: self.publisher.name().to_string(),
            reference,
            title: script.title,
            published_at: Utc::now(),
        };
        let summary = format!("published to {}", record.target);
        Ok(PhaseOutput::json(&record)?.with_summary(summary))
    }

    fn preview(&self, ctx: &PhaseContext<'_>) -> Option<String> {
        let title = ctx
            .input_json::<Script>(SCRIPT_OUTPUT)
            .map(|s| s.title)
            .unwrap_or_else(|_| "the video".to_string());
        Some(format!("would publish '{}' to {}", title, self.publisher.name()))
    }
}
