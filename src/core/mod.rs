//! Core execution machinery.
//!
//! This module contains:
//! - Engine: Phase sequencing, resumption and failure policy
//! - Phase: Phase trait, specs and execution context
//! - Retry: Retry policy, bounded retry state and sleepers
//! - Checkpoint: Storage of phase outputs
//! - Journal: Append-only run event log
//! - Lock: Advisory exclusive file locks

pub mod checkpoint;
pub mod engine;
pub mod journal;
pub mod lock;
pub mod phase;
pub mod retry;

// Re-export commonly used types
pub use checkpoint::{CheckpointStore, FsCheckpointStore, MemoryCheckpointStore};
pub use engine::Engine;
pub use journal::{generate_idempotency_key, hash_bytes, RunJournal};
pub use lock::FileLock;
pub use phase::{Phase, PhaseContext, PhaseOutput, PhaseSpec, Requirement};
pub use retry::{RecordingSleeper, RetryDecision, RetryPolicy, RetryState, Sleeper, TokioSleeper};
