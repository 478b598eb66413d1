//! forgeline - checkpointed, resumable content pipelines
//!
//! Multi-phase pipelines that turn public online signal into structured
//! artifacts (app ideas, product niches) and derived creative assets
//! (supplier listings, storefront and app build requests, promo videos).
//!
//! # Architecture
//!
//! Every phase writes exactly one checkpointed output:
//! - A phase whose checkpoint exists and is large enough is never re-executed
//! - Failed phases are retried under a per-phase policy; quota errors back off
//! - Optional phases fail or skip without halting the run
//! - Each run appends its events to a journal that `report` replays
//!
//! # Modules
//!
//! - `adapters`: External services (LLM, TTS, video/image generation, upload)
//! - `sources`: Public signal sources and the supplier catalog
//! - `normalize`: Recovery of structured items from free-form model output
//! - `core`: Engine, phases, checkpoints, retry, journal, locks
//! - `store`: Deduplicating artifact and listing stores
//! - `pipelines`: The ideas, dropship and video pipelines
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the whole idea pipeline (resumes today's run if interrupted)
//! forgeline ideas pipeline
//!
//! # Re-run one phase from existing checkpoints
//! forgeline ideas analyze --output-dir runs/ideas/20260101
//!
//! # Best ideas so far
//! forgeline ideas top --min-confidence 7
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod normalize;
pub mod pipelines;
pub mod sources;
pub mod store;

// Re-export main types at crate root for convenience
pub use config::Config;
pub use core::{Engine, Phase, PhaseContext, PhaseOutput, PhaseSpec, RetryPolicy};
pub use domain::{Artifact, ArtifactStatus, Listing, RunReport};
pub use error::PipelineError;
pub use normalize::{normalize, ExpectedShape, ParseError};
pub use store::{ArtifactStore, ListingStore, StoreError};
