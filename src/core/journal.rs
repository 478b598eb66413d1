//! Append-only run journal with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL) in the run's output
//! directory, next to the checkpoints they describe.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;
use uuid::Uuid;

use crate::domain::{Event, RunReport};

/// Journal file name inside a run directory
pub const JOURNAL_FILE: &str = "events.jsonl";

/// JSONL journal for the runs of one output directory
pub struct RunJournal {
    /// Path to the events.jsonl file
    events_path: PathBuf,
}

impl RunJournal {
    /// Create or open the journal of a run directory
    pub async fn open(run_dir: &Path) -> Result<Self> {
        fs::create_dir_all(run_dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

        Ok(Self {
            events_path: run_dir.join(JOURNAL_FILE),
        })
    }

    /// Get the path to the events file
    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Append an event to the log
    pub async fn append(&self, event: &Event) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| {
                format!("Failed to open events file: {}", self.events_path.display())
            })?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Replay all events in order
    ///
    /// A torn final line (process killed mid-write) is skipped with a warning.
    pub async fn replay(&self) -> Result<Vec<Event>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path).await.with_context(|| {
            format!("Failed to open events file: {}", self.events_path.display())
        })?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(
                    path = %self.events_path.display(),
                    "Skipping unreadable journal line: {}",
                    e
                ),
            }
        }

        Ok(events)
    }

    /// Report of the most recent run recorded in this journal
    pub async fn last_report(&self) -> Result<Option<RunReport>> {
        let events = self.replay().await?;
        Ok(RunReport::from_events(&events))
    }
}

/// Generate an idempotency key for a phase
pub fn generate_idempotency_key(run_id: Uuid, phase: &str, input: &str) -> String {
    let input_hash = hash_input(input);
    format!("{}:{}:{}", run_id, phase, input_hash)
}

/// Hash input content (first 16 hex chars of SHA256)
fn hash_input(input: &str) -> String {
    hash_bytes(input.as_bytes())
}

/// Short content digest (first 8 bytes of SHA256, hex)
pub fn hash_bytes(data: &[u8]) -> String {
    let result = Sha256::digest(data);
    hex::encode(&result[..8])
}
