//! Phase checkpoint storage.
//!
//! A checkpoint is a phase's output artifact, stored under a flat key. Its
//! presence with at least the phase's minimum size is what lets a restarted
//! run skip the phase.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;

/// Storage capability for phase outputs
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Size in bytes, or `None` if absent
    async fn size(&self, key: &str) -> Result<Option<u64>>;

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.size(key).await?.is_some())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Write atomically: readers never observe a partial artifact
    async fn write(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Remove if present
    async fn remove(&self, key: &str) -> Result<()>;
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains('/') || key.contains('\\') || key.starts_with('.') {
        anyhow::bail!("Invalid checkpoint key '{}'", key);
    }
    Ok(())
}

/// Checkpoints as named files in a run output directory
pub struct FsCheckpointStore {
    dir: PathBuf,
}

impl FsCheckpointStore {
    pub async fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Filesystem path of a key
    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

#[async_trait]
impl CheckpointStore for FsCheckpointStore {
    async fn size(&self, key: &str) -> Result<Option<u64>> {
        validate_key(key)?;
        match fs::metadata(self.path(key)).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to stat checkpoint '{}'", key)),
        }
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        fs::read(self.path(key))
            .await
            .with_context(|| format!("Failed to read checkpoint '{}'", key))
    }

    async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        validate_key(key)?;
        let final_path = self.path(key);
        let partial_path = self.dir.join(format!(".{}.partial", key));

        fs::write(&partial_path, data)
            .await
            .with_context(|| format!("Failed to write checkpoint '{}'", key))?;
        fs::rename(&partial_path, &final_path)
            .await
            .with_context(|| format!("Failed to commit checkpoint '{}'", key))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        match fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove checkpoint '{}'", key)),
        }
    }
}

/// In-memory checkpoints for tests and dry runs
#[derive(Default)]
pub struct MemoryCheckpointStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn size(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.entries.read().await.get(key).map(|v| v.len() as u64))
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.entries
            .read()
            .await
            .get(key)
            .cloned()
            .with_context(|| format!("Checkpoint '{}' not found", key))
    }

    async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.entries
            .write()
            .await
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fs_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = FsCheckpointStore::open(temp.path()).await.unwrap();

        assert!(!store.exists("script.json").await.unwrap());
        store.write("script.json", b"{\"title\": \"x\"}").await.unwrap();
        assert_eq!(store.size("script.json").await.unwrap(), Some(14));
        assert_eq!(store.read("script.json").await.unwrap(), b"{\"title\": \"x\"}");

        // No partial file left behind
        assert!(!temp.path().join(".script.json.partial").exists());

        store.remove("script.json").await.unwrap();
        assert!(!store.exists("script.json").await.unwrap());
        // Removing twice is fine
        store.remove("script.json").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_path_keys() {
        let temp = TempDir::new().unwrap();
        let store = FsCheckpointStore::open(temp.path()).await.unwrap();
        assert!(store.write("../escape.json", b"x").await.is_err());
        assert!(store.write("", b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryCheckpointStore::new();
        store.write("b.json", b"12").await.unwrap();
        store.write("a.json", b"1").await.unwrap();
        assert_eq!(store.keys().await, vec!["a.json", "b.json"]);
        assert_eq!(store.size("b.json").await.unwrap(), Some(2));
        assert!(store.read("missing").await.is_err());
    }
}
