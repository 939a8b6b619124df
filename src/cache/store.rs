//! # Durable Key/Value Stores
//!
//! Per-origin string storage behind the durable tier. Every context on the
//! same origin shares one store.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::errors::{StatusError, StatusResult};

/// Trait for per-origin durable storage
pub trait DurableStore: Send + Sync + std::fmt::Debug {
    fn get(&self, key: &str) -> StatusResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StatusResult<()>;

    fn remove(&self, key: &str) -> StatusResult<()>;
}

/// In-memory store; wrap in an `Arc` to share it between contexts
#[derive(Debug, Default)]
pub struct MemoryDurableStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DurableStore for MemoryDurableStore {
    fn get(&self, key: &str) -> StatusResult<Option<String>> {
        let values = self
            .values
            .read()
            .map_err(|_| StatusError::Internal("Lock poisoned".into()))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StatusResult<()> {
        let mut values = self
            .values
            .write()
            .map_err(|_| StatusError::Internal("Lock poisoned".into()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StatusResult<()> {
        let mut values = self
            .values
            .write()
            .map_err(|_| StatusError::Internal("Lock poisoned".into()))?;
        values.remove(key);
        Ok(())
    }
}

/// One file per key under a directory
#[derive(Debug)]
pub struct FileDurableStore {
    dir: PathBuf,
}

impl FileDurableStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

impl DurableStore for FileDurableStore {
    fn get(&self, key: &str) -> StatusResult<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| StatusError::Storage(format!("Failed to read {}: {}", path.display(), e)))
    }

    fn set(&self, key: &str, value: &str) -> StatusResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            StatusError::Storage(format!("Failed to create durable directory: {}", e))
        })?;

        // Write then rename so readers never see a partial file
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)
            .map_err(|e| StatusError::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path)
            .map_err(|e| StatusError::Storage(format!("Failed to replace {}: {}", path.display(), e)))
    }

    fn remove(&self, key: &str) -> StatusResult<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StatusError::Storage(format!(
                "Failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store() {
        let store = MemoryDurableStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));

        store.remove("k").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        FileDurableStore::new(dir.path())
            .set("modgate:modules", "{\"data\":[]}")
            .unwrap();

        let reopened = FileDurableStore::new(dir.path());
        assert_eq!(
            reopened.get("modgate:modules").unwrap().as_deref(),
            Some("{\"data\":[]}")
        );
    }

    #[test]
    fn test_file_store_remove_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let store = FileDurableStore::new(dir.path());
        assert!(store.remove("never-written").is_ok());
    }

    #[test]
    fn test_file_store_sanitizes_keys() {
        let dir = TempDir::new().unwrap();
        let store = FileDurableStore::new(dir.path());
        store.set("../escape:key", "x").unwrap();
        assert!(dir.path().join("___escape_key.json").exists());
    }
}
