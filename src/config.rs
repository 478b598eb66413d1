//! Configuration for forgeline.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (optionally loaded from `.env`)
//! 2. Config file (.forgeline/config.yaml)
//! 3. Defaults (~/.forgeline)
//!
//! Config file discovery:
//! - Searches current directory and parents for .forgeline/config.yaml
//! - Relative paths in the config file are relative to the project root
//!   (the directory containing `.forgeline/`)
//!
//! Configuration is resolved once at startup into [`Config`] and passed down
//! by reference. Nothing below the CLI reads the environment.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::retry::RetryPolicy;
use crate::sources::TimeRange;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub llm: Option<LlmConfig>,
    #[serde(default)]
    pub ideas: Option<IdeasConfig>,
    #[serde(default)]
    pub dropship: Option<DropshipConfig>,
    #[serde(default)]
    pub video: Option<VideoConfig>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory
    pub home: Option<String>,
    /// Directory holding the artifact stores
    pub data: Option<String>,
    /// Parent directory of run output directories
    pub runs: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmConfig {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub max_concurrent: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdeasConfig {
    pub keywords: Option<Vec<String>>,
    pub time_range: Option<TimeRange>,
    pub max_posts: Option<usize>,
    pub min_confidence: Option<u8>,
    pub build_count: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DropshipConfig {
    pub keywords: Option<Vec<String>>,
    pub subreddits: Option<Vec<String>>,
    pub top_niches: Option<usize>,
    pub min_margin: Option<f64>,
    pub min_confidence: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoConfig {
    pub format: Option<VideoFormat>,
    pub gcp_project: Option<String>,
    pub gcp_location: Option<String>,
    pub voice_id: Option<String>,
    pub publish: Option<bool>,
}

/// Output shape of a generated video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    /// 9:16 short, two scenes
    #[default]
    Portrait,
    /// 16:9 promo, three scenes
    Landscape,
}

impl VideoFormat {
    pub fn aspect_ratio(&self) -> &'static str {
        match self {
            Self::Portrait => "9:16",
            Self::Landscape => "16:9",
        }
    }

    pub fn scene_count(&self) -> usize {
        match self {
            Self::Portrait => 2,
            Self::Landscape => 3,
        }
    }

    /// Smallest acceptable scene clip
    pub fn min_scene_bytes(&self) -> u64 {
        match self {
            Self::Portrait => 500_000,
            Self::Landscape => 1_500_000,
        }
    }
}

impl std::str::FromStr for VideoFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "portrait" | "short" => Ok(Self::Portrait),
            "landscape" | "long" => Ok(Self::Landscape),
            other => Err(format!(
                "unknown video format '{}' (expected portrait or landscape)",
                other
            )),
        }
    }
}

/// Secrets read from the environment; `Debug` never prints them
#[derive(Clone, Default)]
pub struct Credentials {
    pub anthropic_api_key: Option<String>,
    pub elevenlabs_api_key: Option<String>,
    pub gcp_access_token: Option<String>,
    pub cj_api_key: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub build_webhook_url: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn mark(value: &Option<String>) -> &'static str {
            if value.is_some() {
                "<set>"
            } else {
                "<missing>"
            }
        }
        f.debug_struct("Credentials")
            .field("anthropic_api_key", &mark(&self.anthropic_api_key))
            .field("elevenlabs_api_key", &mark(&self.elevenlabs_api_key))
            .field("gcp_access_token", &mark(&self.gcp_access_token))
            .field("cj_api_key", &mark(&self.cj_api_key))
            .field("telegram_bot_token", &mark(&self.telegram_bot_token))
            .field("telegram_chat_id", &mark(&self.telegram_chat_id))
            .field("build_webhook_url", &mark(&self.build_webhook_url))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub model: String,
    pub max_tokens: u32,
    /// Concurrent LLM batches within one analyze phase
    pub max_concurrent: usize,
}

#[derive(Debug, Clone)]
pub struct IdeasSettings {
    pub keywords: Vec<String>,
    pub time_range: TimeRange,
    /// Posts sent to analysis, highest score first
    pub max_posts: usize,
    pub min_confidence: u8,
    /// Ideas sent to the build webhook per run
    pub build_count: usize,
}

#[derive(Debug, Clone)]
pub struct DropshipSettings {
    pub keywords: Vec<String>,
    pub subreddits: Vec<String>,
    /// Niches sourced per run
    pub top_niches: usize,
    pub min_margin: f64,
    /// Niches scored below this are never sourced; 0 sources unscored niches too
    pub min_confidence: u8,
}

#[derive(Debug, Clone)]
pub struct VideoSettings {
    pub format: VideoFormat,
    pub gcp_project: Option<String>,
    pub gcp_location: String,
    /// Fixed TTS voice; chosen from the pool when unset
    pub voice_id: Option<String>,
    /// Upload the finished video
    pub publish: bool,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct Config {
    pub home: PathBuf,
    pub data_dir: PathBuf,
    pub runs_dir: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub llm: LlmSettings,
    pub ideas: IdeasSettings,
    pub dropship: DropshipSettings,
    pub video: VideoSettings,
    pub retry: RetryPolicy,
    pub credentials: Credentials,
}

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MIN_CONFIDENCE: u8 = 6;
pub const DEFAULT_MIN_MARGIN: f64 = 0.30;

impl Config {
    /// Load `.env`, discover the config file and read the environment once
    pub fn load() -> Result<Self> {
        // A missing .env is normal
        let _ = dotenvy::dotenv();

        let config_file = match find_config_file() {
            Some(path) => {
                let parsed = load_config_file(&path)?;
                Some((path, parsed))
            }
            None => None,
        };

        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_sources(config_file, &env)
    }

    /// Resolve from an already-parsed config file and an environment snapshot
    pub fn from_sources(
        config_file: Option<(PathBuf, ConfigFile)>,
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        let var = |name: &str| {
            env.get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let (config_path, file) = match config_file {
            Some((path, file)) => (Some(path), file),
            None => (None, ConfigFile::default()),
        };

        // Project root is the parent of .forgeline/
        let base_dir = config_path
            .as_deref()
            .and_then(Path::parent)
            .and_then(Path::parent)
            .map(Path::to_path_buf);

        let home = match (var("FORGELINE_HOME"), file.paths.home.as_deref(), &base_dir) {
            (Some(env_home), _, _) => PathBuf::from(env_home),
            (None, Some(home), Some(base)) => resolve_path(base, home),
            _ => dirs::home_dir()
                .context("Failed to determine home directory")?
                .join(".forgeline"),
        };

        let relative = |configured: Option<&str>, default: PathBuf| match (configured, &base_dir) {
            (Some(p), Some(base)) => resolve_path(base, p),
            (Some(p), None) => PathBuf::from(p),
            _ => default,
        };
        let data_dir = match var("FORGELINE_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => relative(file.paths.data.as_deref(), home.join("data")),
        };
        let runs_dir = match var("FORGELINE_RUNS_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => relative(file.paths.runs.as_deref(), home.join("runs")),
        };

        let llm_file = file.llm.unwrap_or_default();
        let llm = LlmSettings {
            model: var("FORGELINE_MODEL")
                .or(llm_file.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: llm_file.max_tokens.unwrap_or(4096),
            max_concurrent: llm_file.max_concurrent.unwrap_or(2).max(1),
        };

        let ideas_file = file.ideas.unwrap_or_default();
        let ideas = IdeasSettings {
            keywords: ideas_file.keywords.unwrap_or_else(|| {
                crate::sources::PAIN_KEYWORDS.iter().map(|k| k.to_string()).collect()
            }),
            time_range: ideas_file.time_range.unwrap_or_default(),
            max_posts: ideas_file.max_posts.unwrap_or(30),
            min_confidence: ideas_file.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
            build_count: ideas_file.build_count.unwrap_or(1).max(1),
        };

        let dropship_file = file.dropship.unwrap_or_default();
        let dropship = DropshipSettings {
            keywords: dropship_file
                .keywords
                .unwrap_or_else(|| vec!["winning product".to_string()]),
            subreddits: dropship_file.subreddits.unwrap_or_else(|| {
                crate::sources::TREND_SUBREDDITS.iter().map(|s| s.to_string()).collect()
            }),
            top_niches: dropship_file.top_niches.unwrap_or(5).max(1),
            min_margin: dropship_file.min_margin.unwrap_or(DEFAULT_MIN_MARGIN),
            min_confidence: dropship_file.min_confidence.unwrap_or(0),
        };

        let video_file = file.video.unwrap_or_default();
        let format = match var("VIDEO_FORMAT") {
            Some(raw) => raw.parse().map_err(anyhow::Error::msg)?,
            None => video_file.format.unwrap_or_default(),
        };
        let video = VideoSettings {
            format,
            gcp_project: var("GCP_PROJECT").or(video_file.gcp_project),
            gcp_location: var("GCP_LOCATION")
                .or(video_file.gcp_location)
                .unwrap_or_else(|| "us-central1".to_string()),
            voice_id: var("ELEVENLABS_VOICE_ID").or(video_file.voice_id),
            publish: match var("FORGELINE_PUBLISH") {
                Some(flag) => parse_flag(&flag),
                None => video_file.publish.unwrap_or(true),
            },
        };

        let credentials = Credentials {
            anthropic_api_key: var("ANTHROPIC_API_KEY"),
            elevenlabs_api_key: var("ELEVENLABS_API_KEY"),
            gcp_access_token: var("GCP_ACCESS_TOKEN"),
            cj_api_key: var("CJ_API_KEY"),
            telegram_bot_token: var("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: var("TELEGRAM_CHAT_ID"),
            build_webhook_url: var("FORGELINE_BUILD_WEBHOOK"),
        };

        Ok(Self {
            home,
            data_dir,
            runs_dir,
            config_file: config_path,
            llm,
            ideas,
            dropship,
            video,
            retry: file.retry.unwrap_or_default(),
            credentials,
        })
    }

    /// Store of accepted app ideas
    pub fn ideas_store(&self) -> PathBuf {
        self.data_dir.join("ideas.json")
    }

    /// Store of accepted product niches
    pub fn niches_store(&self) -> PathBuf {
        self.data_dir.join("niches.json")
    }

    /// Store of sourced supplier listings
    pub fn listings_store(&self) -> PathBuf {
        self.data_dir.join("products.json")
    }

    /// Default output directory for a pipeline run
    pub fn run_dir(&self, pipeline: &str) -> PathBuf {
        self.runs_dir.join(pipeline)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".forgeline").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_without_file() {
        let config = Config::from_sources(None, &env(&[("FORGELINE_HOME", "/tmp/fl")])).unwrap();

        assert_eq!(config.home, PathBuf::from("/tmp/fl"));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/fl/data"));
        assert_eq!(config.ideas_store(), PathBuf::from("/tmp/fl/data/ideas.json"));
        assert_eq!(config.ideas.min_confidence, 6);
        assert_eq!(config.dropship.min_confidence, 0);
        assert_eq!(config.ideas.keywords.len(), crate::sources::PAIN_KEYWORDS.len());
        assert_eq!(config.video.format, VideoFormat::Portrait);
        assert!(config.video.publish);
        assert!(config.credentials.anthropic_api_key.is_none());
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".forgeline");
        std::fs::create_dir_all(&dir).unwrap();

        let config_path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  data: ./data
llm:
  max_concurrent: 3
ideas:
  min_confidence: 8
  time_range: week
dropship:
  subreddits: [dropshipping]
  min_confidence: 7
video:
  format: landscape
retry:
  max_attempts: 5
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        let config = Config::from_sources(
            Some((config_path, parsed)),
            &env(&[("FORGELINE_HOME", "/tmp/fl")]),
        )
        .unwrap();

        assert_eq!(config.data_dir, temp.path().join("data"));
        assert_eq!(config.llm.max_concurrent, 3);
        assert_eq!(config.ideas.min_confidence, 8);
        assert_eq!(config.ideas.time_range, TimeRange::Week);
        assert_eq!(config.dropship.subreddits, vec!["dropshipping".to_string()]);
        assert_eq!(config.dropship.min_confidence, 7);
        assert_eq!(config.video.format, VideoFormat::Landscape);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = ConfigFile {
            video: Some(VideoConfig {
                format: Some(VideoFormat::Landscape),
                publish: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = Config::from_sources(
            Some((PathBuf::from("/proj/.forgeline/config.yaml"), file)),
            &env(&[
                ("FORGELINE_HOME", "/tmp/fl"),
                ("VIDEO_FORMAT", "portrait"),
                ("FORGELINE_PUBLISH", "off"),
                ("ANTHROPIC_API_KEY", "sk-test"),
                ("CJ_API_KEY", "   "),
            ]),
        )
        .unwrap();

        assert_eq!(config.video.format, VideoFormat::Portrait);
        assert!(!config.video.publish);
        assert_eq!(config.credentials.anthropic_api_key.as_deref(), Some("sk-test"));
        // Blank values count as unset
        assert!(config.credentials.cj_api_key.is_none());
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let credentials = Credentials {
            anthropic_api_key: Some("sk-secret".to_string()),
            ..Default::default()
        };
        let printed = format!("{:?}", credentials);
        assert!(!printed.contains("sk-secret"));
        assert!(printed.contains("<set>"));
        assert!(printed.contains("<missing>"));
    }

    #[test]
    fn test_video_format() {
        assert_eq!(VideoFormat::Portrait.scene_count(), 2);
        assert_eq!(VideoFormat::Landscape.aspect_ratio(), "16:9");
        assert_eq!("short".parse::<VideoFormat>().unwrap(), VideoFormat::Portrait);
        assert!("square".parse::<VideoFormat>().is_err());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
