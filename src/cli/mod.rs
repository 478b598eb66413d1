//! Command-line interface for forgeline.
//!
//! Every pipeline phase is a subcommand of its pipeline (`forgeline ideas
//! scrape`); `pipeline` runs all of them in order. Store queries and run
//! reports read state without taking any run lock.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::config::{Config, VideoFormat};
use crate::core::RunJournal;
use crate::domain::{Artifact, ArtifactStatus, RunReport};
use crate::pipelines::dropship::{self, DropshipOverrides};
use crate::pipelines::ideas::{self, IdeasOverrides};
use crate::pipelines::video::{self, VideoRequest};
use crate::pipelines::{dated_run_dir, execute, RunOptions};
use crate::sources::TimeRange;
use crate::store::{ArtifactStore, ListingStore};

/// forgeline - checkpointed, resumable content pipelines
#[derive(Parser, Debug)]
#[command(name = "forgeline")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// App idea pipeline and idea store
    Ideas {
        #[command(subcommand)]
        command: IdeasCommand,
    },

    /// Dropship pipeline and niche / listing stores
    Dropship {
        #[command(subcommand)]
        command: DropshipCommand,
    },

    /// Promo video pipeline
    Video {
        #[command(subcommand)]
        command: VideoCommand,
    },

    /// Show the last recorded run in an output directory
    Report {
        /// Run output directory
        dir: PathBuf,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Options shared by every pipeline run
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Output directory (defaults to the pipeline's run directory)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Preview side effects instead of performing them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct IdeasRunArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Only consider posts from this window: day, week, month, year
    #[arg(long)]
    pub time_range: Option<TimeRange>,

    /// Search keywords (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub keywords: Option<Vec<String>>,

    /// Minimum confidence for ideas sent to the builder
    #[arg(long)]
    pub min_confidence: Option<u8>,
}

#[derive(Subcommand, Debug)]
pub enum IdeasCommand {
    /// Run every phase: scrape, analyze, build
    Pipeline(IdeasRunArgs),
    /// Collect pain-point posts
    Scrape(IdeasRunArgs),
    /// Extract app ideas from collected posts
    Analyze(IdeasRunArgs),
    /// Send the best ideas to the build webhook
    Build(IdeasRunArgs),

    /// List the highest-confidence ideas
    Top {
        /// Number of ideas to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,

        /// Hide ideas below this confidence
        #[arg(long, default_value = "6")]
        min_confidence: u8,
    },

    /// Summarize the idea store
    Status,

    /// Change an idea's status
    SetStatus {
        /// Idea name (case-insensitive)
        name: String,

        /// new, investigating, validating, building or rejected
        status: ArtifactStatus,

        /// Note recorded with the change
        #[arg(long)]
        note: Option<String>,
    },
}

impl IdeasCommand {
    fn run_phase(&self) -> Option<(Option<&'static str>, &IdeasRunArgs)> {
        match self {
            Self::Pipeline(args) => Some((None, args)),
            Self::Scrape(args) => Some((Some("scrape"), args)),
            Self::Analyze(args) => Some((Some("analyze"), args)),
            Self::Build(args) => Some((Some("build"), args)),
            _ => None,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct DropshipRunArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Only consider posts from this window: day, week, month, year
    #[arg(long)]
    pub time_range: Option<TimeRange>,

    /// Search keywords (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub keywords: Option<Vec<String>>,

    /// Minimum confidence for niches sent to supplier sourcing
    #[arg(long)]
    pub min_confidence: Option<u8>,
}

#[derive(Subcommand, Debug)]
pub enum DropshipCommand {
    /// Run every phase: research, analyze, source, build-store
    Pipeline(DropshipRunArgs),
    /// Collect product trend discussions
    Research(DropshipRunArgs),
    /// Extract product niches
    Analyze(DropshipRunArgs),
    /// Find supplier listings for the top niches
    Source(DropshipRunArgs),
    /// Send a storefront build request for the top niche
    BuildStore(DropshipRunArgs),

    /// Summarize niches and sourced listings
    Status {
        /// Only count listings at or above this net margin (0-1)
        #[arg(long)]
        min_margin: Option<f64>,
    },
}

impl DropshipCommand {
    fn run_phase(&self) -> Option<(Option<&'static str>, &DropshipRunArgs)> {
        match self {
            Self::Pipeline(args) => Some((None, args)),
            Self::Research(args) => Some((Some("research"), args)),
            Self::Analyze(args) => Some((Some("analyze"), args)),
            Self::Source(args) => Some((Some("source"), args)),
            Self::BuildStore(args) => Some((Some("build-store"), args)),
            Self::Status { .. } => None,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct VideoArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// What the video promotes
    #[arg(long)]
    pub topic: String,

    /// portrait (short) or landscape (long); defaults to the configured format
    #[arg(long)]
    pub format: Option<VideoFormat>,

    /// Extra product context for the script writer
    #[arg(long)]
    pub brief: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum VideoCommand {
    /// Run every phase from script to publish
    Pipeline(VideoArgs),
    /// Write the script
    Script(VideoArgs),
    /// Synthesize narration
    Voice(VideoArgs),
    /// Generate the background music bed
    Music(VideoArgs),
    /// Generate scene clips
    Scenes(VideoArgs),
    /// Join clips, narration and music
    Assemble(VideoArgs),
    /// Generate a thumbnail
    Thumbnail(VideoArgs),
    /// Upload the finished video
    Publish(VideoArgs),
}

impl VideoCommand {
    fn split(self) -> (Option<&'static str>, VideoArgs) {
        match self {
            Self::Pipeline(args) => (None, args),
            Self::Script(args) => (Some("script"), args),
            Self::Voice(args) => (Some("voice"), args),
            Self::Music(args) => (Some("music"), args),
            Self::Scenes(args) => (Some("scenes"), args),
            Self::Assemble(args) => (Some("assemble"), args),
            Self::Thumbnail(args) => (Some("thumbnail"), args),
            Self::Publish(args) => (Some("publish"), args),
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Ideas { command } => execute_ideas(command).await,
            Commands::Dropship { command } => execute_dropship(command).await,
            Commands::Video { command } => execute_video(command).await,
            Commands::Report { dir } => show_report(&dir).await,
            Commands::Config => show_config(),
        }
    }
}

fn run_options(args: &RunArgs, default_dir: PathBuf, only: Option<&str>) -> RunOptions {
    RunOptions::new(args.output_dir.clone().unwrap_or(default_dir))
        .with_dry_run(args.dry_run)
        .with_only(only.map(str::to_string))
}

/// Print the report; a failed run exits non-zero
fn finish(report: &RunReport) -> Result<()> {
    println!("{}", report.render());
    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

async fn execute_ideas(command: IdeasCommand) -> Result<()> {
    let config = Config::load()?;

    if let Some((only, args)) = command.run_phase() {
        let overrides = IdeasOverrides {
            keywords: args.keywords.clone(),
            time_range: args.time_range,
            min_confidence: args.min_confidence,
        };
        let options = run_options(&args.run, dated_run_dir(&config, ideas::PIPELINE), only);
        let report = execute(ideas::PIPELINE, ideas::phases(&config, &overrides), &options).await?;
        return finish(&report);
    }

    match command {
        IdeasCommand::Top {
            limit,
            min_confidence,
        } => show_top_ideas(&config, limit, min_confidence).await,
        IdeasCommand::Status => show_idea_status(&config).await,
        IdeasCommand::SetStatus { name, status, note } => {
            let mut store = ArtifactStore::open(&config.ideas_store(), ideas::STORE_KIND).await?;
            store.update_status(&name, status, note.as_deref()).await?;
            println!("{} -> {}", name, status);
            Ok(())
        }
        _ => Ok(()),
    }
}

fn print_artifacts(items: &[&Artifact]) {
    println!("{:<6} {:<14} {:<50}", "CONF", "STATUS", "NAME");
    println!("{}", "-".repeat(72));
    for item in items {
        let confidence = item
            .confidence
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        let name = if item.name.chars().count() > 47 {
            format!("{}...", item.name.chars().take(47).collect::<String>())
        } else {
            item.name.clone()
        };
        println!("{:<6} {:<14} {:<50}", confidence, item.status.as_str(), name);
    }
}

async fn show_top_ideas(config: &Config, limit: usize, min_confidence: u8) -> Result<()> {
    let store = ArtifactStore::snapshot(&config.ideas_store(), ideas::STORE_KIND).await?;
    if store.is_empty() {
        println!("No ideas yet. Run 'forgeline ideas pipeline' to collect some.");
        return Ok(());
    }

    let top: Vec<&Artifact> = store
        .top(store.len())
        .into_iter()
        .filter(|a| a.confidence.unwrap_or(0) >= min_confidence)
        .take(limit)
        .collect();
    if top.is_empty() {
        println!("No ideas with confidence >= {}", min_confidence);
        return Ok(());
    }

    print_artifacts(&top);
    println!("\nShowing {} of {} ideas", top.len(), store.len());
    Ok(())
}

async fn show_idea_status(config: &Config) -> Result<()> {
    let store = ArtifactStore::snapshot(&config.ideas_store(), ideas::STORE_KIND).await?;
    let summary = store.summary();

    println!("Idea store: {}", store.path().display());
    println!("Total: {}", summary.total);
    for (status, count) in &summary.by_status {
        println!("  {:<14} {}", status, count);
    }
    if !summary.top_3.is_empty() {
        println!("\nTop ideas:");
        for (name, confidence) in &summary.top_3 {
            match confidence {
                Some(c) => println!("  [{}] {}", c, name),
                None => println!("  [-] {}", name),
            }
        }
    }
    Ok(())
}

async fn execute_dropship(command: DropshipCommand) -> Result<()> {
    let config = Config::load()?;

    if let Some((only, args)) = command.run_phase() {
        let overrides = DropshipOverrides {
            keywords: args.keywords.clone(),
            time_range: args.time_range,
            min_confidence: args.min_confidence,
        };
        let options = run_options(&args.run, dated_run_dir(&config, dropship::PIPELINE), only);
        let report =
            execute(dropship::PIPELINE, dropship::phases(&config, &overrides), &options).await?;
        return finish(&report);
    }

    if let DropshipCommand::Status { min_margin } = command {
        show_dropship_status(&config, min_margin.unwrap_or(config.dropship.min_margin)).await?;
    }
    Ok(())
}

async fn show_dropship_status(config: &Config, min_margin: f64) -> Result<()> {
    let niches = ArtifactStore::snapshot(&config.niches_store(), dropship::STORE_KIND).await?;
    let listings = ListingStore::snapshot(&config.listings_store()).await?;

    println!("Niches: {}", niches.len());
    let top = niches.top(5);
    if !top.is_empty() {
        print_artifacts(&top);
    }

    println!("\nListings: {}", listings.len());
    for (niche, count) in listings.by_niche() {
        println!("  {:<40} {}", niche, count);
    }

    let profitable = listings.profitable(min_margin);
    println!(
        "\nProfitable at >= {:.0}% net margin: {}",
        min_margin * 100.0,
        profitable.len()
    );
    println!("{:<9} {:<9} {:<9} {:<40}", "COST", "PRICE", "PROFIT", "NAME");
    println!("{}", "-".repeat(72));
    for listing in profitable.iter().take(10) {
        println!(
            "{:<9} {:<9} {:<9} {:<40}",
            format!("${:.2}", listing.cogs()),
            format!("${:.2}", listing.sell_price),
            format!("${:.2}", listing.net_profit()),
            listing.name.chars().take(40).collect::<String>()
        );
    }
    Ok(())
}

async fn execute_video(command: VideoCommand) -> Result<()> {
    let config = Config::load()?;
    let (only, args) = command.split();

    let request = VideoRequest::new(&args.topic, args.format.unwrap_or(config.video.format))
        .with_brief(args.brief.clone());
    let options = run_options(&args.run, video::run_dir(&config, &args.topic), only);
    let report = execute(video::PIPELINE, video::phases(&config, &request), &options).await?;
    finish(&report)
}

async fn show_report(dir: &Path) -> Result<()> {
    let journal = RunJournal::open(dir)
        .await
        .with_context(|| format!("Failed to open run journal in {}", dir.display()))?;

    match journal.last_report().await? {
        Some(report) => {
            println!("{}", report.render());
            Ok(())
        }
        None => {
            println!("No runs recorded in {}", dir.display());
            Ok(())
        }
    }
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = Config::load()?;

    println!("forgeline configuration");
    println!("{}", "=".repeat(60));
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Data:     {}", cfg.data_dir.display());
    println!("  Runs:     {}", cfg.runs_dir.display());
    println!("  Ideas:    {}", cfg.ideas_store().display());
    println!("  Niches:   {}", cfg.niches_store().display());
    println!("  Listings: {}", cfg.listings_store().display());
    println!();
    println!("LLM:");
    println!("  Model:          {}", cfg.llm.model);
    println!("  Max tokens:     {}", cfg.llm.max_tokens);
    println!("  Max concurrent: {}", cfg.llm.max_concurrent);
    println!();
    println!("Ideas:");
    println!("  Keywords:       {}", cfg.ideas.keywords.len());
    println!("  Time range:     {}", cfg.ideas.time_range);
    println!("  Max posts:      {}", cfg.ideas.max_posts);
    println!("  Min confidence: {}", cfg.ideas.min_confidence);
    println!();
    println!("Dropship:");
    println!("  Keywords:   {}", cfg.dropship.keywords.join(", "));
    println!("  Subreddits: {}", cfg.dropship.subreddits.join(", "));
    println!("  Top niches: {}", cfg.dropship.top_niches);
    println!("  Min margin: {:.0}%", cfg.dropship.min_margin * 100.0);
    println!("  Min confidence: {}", cfg.dropship.min_confidence);
    println!();
    println!("Video:");
    println!("  Format:   {:?}", cfg.video.format);
    println!(
        "  Project:  {}",
        cfg.video.gcp_project.as_deref().unwrap_or("(unset)")
    );
    println!("  Location: {}", cfg.video.gcp_location);
    println!("  Publish:  {}", cfg.video.publish);
    println!();
    println!("Retry: {} attempts", cfg.retry.max_attempts);
    println!("Credentials: {:?}", cfg.credentials);

    Ok(())
}
