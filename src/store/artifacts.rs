//! Store of accepted artifacts (app ideas, product niches).

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use super::{document, StoreError};
use crate::core::lock::FileLock;
use crate::domain::{Artifact, ArtifactStatus, StatusNote};

/// Summary counts for display
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoreSummary {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub top_3: Vec<(String, Option<u8>)>,
}

/// Deduplicating artifact store backed by one JSON document
pub struct ArtifactStore {
    path: PathBuf,
    kind: String,
    items: Vec<Artifact>,
    /// `None` for read-only snapshots
    lock: Option<FileLock>,
}

impl ArtifactStore {
    /// Open for writing; fails if another writer holds the store
    pub async fn open(path: &Path, kind: &str) -> Result<Self, StoreError> {
        let lock = FileLock::for_store(path).map_err(|e| StoreError::Locked(format!("{:#}", e)))?;
        let items = document::load(path, kind).await?;
        debug!(path = %path.display(), count = items.len(), "Opened artifact store");

        Ok(Self {
            path: path.to_path_buf(),
            kind: kind.to_string(),
            items,
            lock: Some(lock),
        })
    }

    /// Load a read-only view without taking the writer lock
    pub async fn snapshot(path: &Path, kind: &str) -> Result<Self, StoreError> {
        Ok(Self {
            path: path.to_path_buf(),
            kind: kind.to_string(),
            items: document::load(path, kind).await?,
            lock: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self) -> Result<(), StoreError> {
        if self.lock.is_none() {
            return Err(StoreError::ReadOnly);
        }
        document::save(&self.path, &self.kind, &self.items).await
    }

    /// Add artifacts not already present (case-insensitive name); first seen wins
    pub async fn add(&mut self, artifacts: Vec<Artifact>) -> Result<usize, StoreError> {
        if self.lock.is_none() {
            return Err(StoreError::ReadOnly);
        }

        let mut seen: HashSet<String> = self.items.iter().map(Artifact::key).collect();
        let mut added = 0;

        for mut artifact in artifacts {
            let key = artifact.key();
            if key.is_empty() || !seen.insert(key) {
                continue;
            }
            artifact.status = ArtifactStatus::New;
            artifact.added_at = Utc::now();
            self.items.push(artifact);
            added += 1;
        }

        if added > 0 {
            self.save().await?;
        }
        Ok(added)
    }

    /// Move an artifact to a new status, optionally recording a note
    pub async fn update_status(
        &mut self,
        name: &str,
        status: ArtifactStatus,
        note: Option<&str>,
    ) -> Result<(), StoreError> {
        if self.lock.is_none() {
            return Err(StoreError::ReadOnly);
        }

        let key = name.trim().to_lowercase();
        let artifact = self
            .items
            .iter_mut()
            .find(|a| a.key() == key)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        artifact.status = status;
        if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
            artifact.notes.push(StatusNote {
                at: Utc::now(),
                status,
                note: note.to_string(),
            });
        }

        self.save().await
    }

    pub fn get(&self, name: &str) -> Option<&Artifact> {
        let key = name.trim().to_lowercase();
        self.items.iter().find(|a| a.key() == key)
    }

    pub fn by_status(&self, status: ArtifactStatus) -> Vec<&Artifact> {
        self.items.iter().filter(|a| a.status == status).collect()
    }

    /// Highest confidence first; ties keep insertion order; unscored excluded
    pub fn top(&self, n: usize) -> Vec<&Artifact> {
        let mut scored: Vec<&Artifact> =
            self.items.iter().filter(|a| a.confidence.is_some()).collect();
        // sort_by is stable
        scored.sort_by(|a, b| b.confidence.cmp(&a.confidence));
        scored.truncate(n);
        scored
    }

    pub fn summary(&self) -> StoreSummary {
        let mut by_status = BTreeMap::new();
        for artifact in &self.items {
            *by_status.entry(artifact.status.to_string()).or_insert(0) += 1;
        }

        StoreSummary {
            total: self.items.len(),
            by_status,
            top_3: self
                .top(3)
                .into_iter()
                .map(|a| (a.name.clone(), a.confidence))
                .collect(),
        }
    }

    pub fn all(&self) -> &[Artifact] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_update_status_with_note() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ideas.json");
        let mut store = ArtifactStore::open(&path, "ideas").await.unwrap();

        store.add(vec![Artifact::new("RentSplit")]).await.unwrap();
        store
            .update_status("rentsplit", ArtifactStatus::Validating, Some("posted survey"))
            .await
            .unwrap();

        let idea = store.get("RENTSPLIT").unwrap();
        assert_eq!(idea.status, ArtifactStatus::Validating);
        assert_eq!(idea.notes.len(), 1);
        assert_eq!(idea.notes[0].note, "posted survey");

        let missing = store
            .update_status("nope", ArtifactStatus::Rejected, None)
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_snapshot_is_read_only() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ideas.json");
        let mut snapshot = ArtifactStore::snapshot(&path, "ideas").await.unwrap();

        let result = snapshot.add(vec![Artifact::new("X")]).await;
        assert!(matches!(result, Err(StoreError::ReadOnly)));
    }

    #[tokio::test]
    async fn test_single_writer() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ideas.json");

        let first = ArtifactStore::open(&path, "ideas").await.unwrap();
        assert!(matches!(
            ArtifactStore::open(&path, "ideas").await,
            Err(StoreError::Locked(_))
        ));
        drop(first);
        assert!(ArtifactStore::open(&path, "ideas").await.is_ok());
    }

    #[tokio::test]
    async fn test_summary() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ideas.json");
        let mut store = ArtifactStore::open(&path, "ideas").await.unwrap();

        store
            .add(vec![
                Artifact::new("A").with_confidence(9),
                Artifact::new("B"),
                Artifact::new("C").with_confidence(4),
            ])
            .await
            .unwrap();
        store
            .update_status("B", ArtifactStatus::Rejected, None)
            .await
            .unwrap();

        let summary = store.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_status.get("new"), Some(&2));
        assert_eq!(summary.by_status.get("rejected"), Some(&1));
        assert_eq!(
            summary.top_3,
            vec![("A".to_string(), Some(9)), ("C".to_string(), Some(4))]
        );
    }
}
