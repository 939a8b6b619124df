//! # JSON File Gateway
//!
//! Remote store backed by one JSON document on disk. Used by the CLI, where
//! each invocation is its own short-lived context.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{ChangeCallback, ChangeListeners, RemoteStateGateway};
use crate::errors::{StatusError, StatusResult};
use crate::model::{FeatureRecord, ModuleRecord, ModuleStatus};
use crate::sync::Subscription;

/// On-disk shape of the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub modules: Vec<ModuleRecord>,
    #[serde(default)]
    pub features: Vec<FeatureRecord>,
}

#[derive(Debug)]
pub struct JsonFileGateway {
    path: PathBuf,
    /// Serializes read-modify-write cycles from this process
    write_lock: Mutex<()>,
    listeners: Arc<ChangeListeners>,
}

impl JsonFileGateway {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
            listeners: Arc::new(ChangeListeners::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `document` unless a store already exists at the path.
    ///
    /// Returns whether it was written.
    pub async fn initialize(&self, document: &StoreDocument) -> StatusResult<bool> {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(false);
        }
        self.save(document).await?;
        Ok(true)
    }

    async fn load(&self) -> StatusResult<StoreDocument> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            StatusError::remote(format!("Failed to read store {}: {}", self.path.display(), e))
        })?;
        if content.trim().is_empty() {
            return Ok(StoreDocument::default());
        }
        serde_json::from_str(&content)
            .map_err(|e| StatusError::remote(format!("Failed to parse store: {}", e)))
    }

    async fn save(&self, document: &StoreDocument) -> StatusResult<()> {
        let content = serde_json::to_string_pretty(document)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    StatusError::remote(format!("Failed to create store directory: {}", e))
                })?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| StatusError::remote(format!("Failed to write store: {}", e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StatusError::remote(format!("Failed to replace store: {}", e)))
    }
}

#[async_trait]
impl RemoteStateGateway for JsonFileGateway {
    async fn fetch_all_modules(&self) -> StatusResult<Vec<ModuleRecord>> {
        Ok(self.load().await?.modules)
    }

    async fn fetch_all_features(&self) -> StatusResult<Vec<FeatureRecord>> {
        Ok(self.load().await?.features)
    }

    async fn update_module_status(&self, id: &str, status: ModuleStatus) -> StatusResult<()> {
        {
            let _guard = self.write_lock.lock().await;
            let mut document = self.load().await?;
            let module = document
                .modules
                .iter_mut()
                .find(|m| m.id == id)
                .ok_or_else(|| StatusError::not_found(format!("module id {}", id)))?;
            module.status = status;
            module.updated_at = Utc::now();
            self.save(&document).await?;
        }
        self.listeners.notify_modules();
        Ok(())
    }

    async fn update_feature_status(
        &self,
        module_code: &str,
        feature_code: &str,
        enabled: bool,
    ) -> StatusResult<()> {
        {
            let _guard = self.write_lock.lock().await;
            let mut document = self.load().await?;
            match document
                .features
                .iter_mut()
                .find(|f| f.module_code == module_code && f.feature_code == feature_code)
            {
                Some(feature) => {
                    feature.enabled = enabled;
                    feature.updated_at = Utc::now();
                }
                None => document
                    .features
                    .push(FeatureRecord::new(module_code, feature_code, enabled)),
            }
            self.save(&document).await?;
        }
        self.listeners.notify_features();
        Ok(())
    }

    fn subscribe_to_changes(
        &self,
        on_module_change: ChangeCallback,
        on_feature_change: ChangeCallback,
    ) -> Subscription {
        self.listeners.subscribe(on_module_change, on_feature_change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn document() -> StoreDocument {
        StoreDocument {
            modules: vec![ModuleRecord::new("m-1", "shop", ModuleStatus::Active)],
            features: vec![FeatureRecord::new("shop", "cart", true)],
        }
    }

    #[tokio::test]
    async fn test_initialize_then_update() {
        let dir = tempdir().unwrap();
        let gateway = JsonFileGateway::new(dir.path().join("store.json"));

        assert!(gateway.initialize(&document()).await.unwrap());
        assert!(!gateway.initialize(&StoreDocument::default()).await.unwrap());

        gateway
            .update_module_status("m-1", ModuleStatus::Inactive)
            .await
            .unwrap();
        gateway.update_feature_status("shop", "wishlist", false).await.unwrap();

        let reopened = JsonFileGateway::new(dir.path().join("store.json"));
        let modules = reopened.fetch_all_modules().await.unwrap();
        let features = reopened.fetch_all_features().await.unwrap();
        assert_eq!(modules[0].status, ModuleStatus::Inactive);
        assert_eq!(features.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let dir = tempdir().unwrap();
        let gateway = JsonFileGateway::new(dir.path().join("absent.json"));

        let err = gateway.fetch_all_modules().await.unwrap_err();
        assert!(matches!(err, StatusError::RemoteUnavailable(_)));
    }
}
