//! Durable, deduplicating stores for accepted artifacts and sourced listings.
//!
//! Each store is one JSON document, fully rewritten on every mutation. A
//! writable store holds an exclusive advisory lock on its file for its whole
//! lifetime; snapshots are read-only and take no lock.

pub mod artifacts;
pub mod document;
pub mod listings;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use artifacts::{ArtifactStore, StoreSummary};
pub use listings::ListingStore;

/// Failure of a store operation
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("{path} is not a valid store document: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("store is locked by another writer: {0}")]
    Locked(String),

    #[error("store was opened read-only")]
    ReadOnly,

    #[error("no entry named '{0}'")]
    NotFound(String),
}

impl StoreError {
    pub(crate) fn io(path: &Path, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    pub(crate) fn corrupt(path: &Path, message: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

impl From<StoreError> for crate::error::PipelineError {
    fn from(err: StoreError) -> Self {
        Self::Io(err.to_string())
    }
}
