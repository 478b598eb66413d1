//! Advisory exclusive locks on run directories and store files.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;

/// Lock file name inside a run output directory
pub const RUN_LOCK_FILE: &str = ".forgeline.lock";

/// Exclusive advisory lock, released on drop
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Take the lock or fail immediately if another process holds it
    pub fn try_acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

        file.try_lock_exclusive().with_context(|| {
            format!(
                "{} is locked by another forgeline process",
                path.parent().unwrap_or(path).display()
            )
        })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Exclusive ownership of a run output directory
    pub fn for_run_dir(run_dir: &Path) -> Result<Self> {
        Self::try_acquire(&run_dir.join(RUN_LOCK_FILE))
    }

    /// Single-writer lock for a store document (`<file>.lock` alongside it)
    pub fn for_store(store_path: &Path) -> Result<Self> {
        let mut lock_path = store_path.as_os_str().to_owned();
        lock_path.push(".lock");
        Self::try_acquire(Path::new(&lock_path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_lock_fails_until_release() {
        let temp = TempDir::new().unwrap();

        let first = FileLock::for_run_dir(temp.path()).unwrap();
        assert!(FileLock::for_run_dir(temp.path()).is_err());

        drop(first);
        assert!(FileLock::for_run_dir(temp.path()).is_ok());
    }

    #[test]
    fn test_store_lock_path() {
        let temp = TempDir::new().unwrap();
        let lock = FileLock::for_store(&temp.path().join("ideas.json")).unwrap();
        assert_eq!(lock.path(), temp.path().join("ideas.json.lock"));
    }
}
