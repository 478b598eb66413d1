//! JSON document files backing the stores.
//!
//! On disk a document is `{"updated_at", "total", "<kind>": [...]}`. A bare
//! top-level array is accepted on read. Writes go to a temp file in the same
//! directory and are renamed over the original.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::fs;

use super::StoreError;

/// Load the records of a document, or an empty list if the file is absent
pub async fn load<T: DeserializeOwned>(path: &Path, kind: &str) -> Result<Vec<T>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let value: Value =
        serde_json::from_str(&content).map_err(|e| StoreError::corrupt(path, e.to_string()))?;

    let records = match value {
        Value::Array(items) => Value::Array(items),
        Value::Object(mut map) => map.remove(kind).unwrap_or(Value::Array(Vec::new())),
        _ => {
            return Err(StoreError::corrupt(
                path,
                format!("expected an object with '{}' or an array", kind),
            ))
        }
    };

    serde_json::from_value(records).map_err(|e| StoreError::corrupt(path, e.to_string()))
}

/// Rewrite a document atomically
pub async fn save<T: Serialize>(path: &Path, kind: &str, records: &[T]) -> Result<(), StoreError> {
    let mut document = serde_json::Map::new();
    document.insert("updated_at".to_string(), Value::String(Utc::now().to_rfc3339()));
    document.insert("total".to_string(), Value::from(records.len()));
    document.insert(
        kind.to_string(),
        serde_json::to_value(records).map_err(|e| StoreError::corrupt(path, e.to_string()))?,
    );

    let body = serde_json::to_vec_pretty(&Value::Object(document))
        .map_err(|e| StoreError::corrupt(path, e.to_string()))?;

    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&path, &body))
        .await
        .map_err(|e| StoreError::Io {
            path: PathBuf::new(),
            message: format!("writer task failed: {}", e),
        })?
}

fn write_atomic(path: &Path, body: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    temp.write_all(body).map_err(|e| StoreError::io(path, e))?;
    temp.as_file().sync_all().map_err(|e| StoreError::io(path, e))?;
    temp.persist(path)
        .map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let records: Vec<Value> = load(&temp.path().join("ideas.json"), "ideas").await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_save_writes_envelope() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ideas.json");
        save(&path, "ideas", &[serde_json::json!({"name": "A"})])
            .await
            .unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["total"], 1);
        assert_eq!(raw["ideas"][0]["name"], "A");
        assert!(raw["updated_at"].is_string());
    }

    #[tokio::test]
    async fn test_bare_array_is_accepted() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("niches.json");
        std::fs::write(&path, r#"[{"name": "A"}, {"name": "B"}]"#).unwrap();

        let records: Vec<Value> = load(&path, "niches").await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_garbage_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ideas.json");
        std::fs::write(&path, "not json").unwrap();

        let result: Result<Vec<Value>, _> = load(&path, "ideas").await;
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }
}
