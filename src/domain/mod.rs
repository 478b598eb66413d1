//! Domain types for forgeline.
//!
//! This module contains the core data structures:
//! - Artifact: Accepted ideas / niches and sourced listings
//! - Events: Run journal entries and phase states
//! - Run: Per-run report rebuilt from events

pub mod artifact;
pub mod events;
pub mod run;

// Re-export commonly used types
pub use artifact::{estimate_sell_price, Artifact, ArtifactStatus, Listing, StatusNote};
pub use events::{Event, EventType, PhaseState};
pub use run::{PhaseOutcome, RunReport, RunStatus};
