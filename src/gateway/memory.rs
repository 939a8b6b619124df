//! In-process remote store.
//!
//! Behaves like the remote service (accepts any write, notifies listeners)
//! and adds failure injection, latency and call counters for tests.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{ChangeCallback, ChangeListeners, RemoteStateGateway};
use crate::errors::{StatusError, StatusResult};
use crate::model::{FeatureRecord, ModuleRecord, ModuleStatus};
use crate::sync::Subscription;

#[derive(Default)]
struct Calls {
    module_fetches: AtomicU64,
    feature_fetches: AtomicU64,
    module_updates: AtomicU64,
    feature_updates: AtomicU64,
}

/// Remote store held in memory
pub struct InMemoryGateway {
    modules: RwLock<Vec<ModuleRecord>>,
    features: RwLock<Vec<FeatureRecord>>,
    available: AtomicBool,
    latency: RwLock<Option<Duration>>,
    calls: Calls,
    listeners: Arc<ChangeListeners>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

impl InMemoryGateway {
    pub fn new(modules: Vec<ModuleRecord>, features: Vec<FeatureRecord>) -> Self {
        Self {
            modules: RwLock::new(modules),
            features: RwLock::new(features),
            available: AtomicBool::new(true),
            latency: RwLock::new(None),
            calls: Calls::default(),
            listeners: Arc::new(ChangeListeners::default()),
        }
    }

    /// Simulate the network going down or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut l) = self.latency.write() {
            *l = latency;
        }
    }

    /// Change a module behind the engine's back and notify listeners
    pub fn upsert_module(&self, record: ModuleRecord) {
        if let Ok(mut modules) = self.modules.write() {
            match modules.iter_mut().find(|m| m.code == record.code) {
                Some(existing) => *existing = record,
                None => modules.push(record),
            }
        }
        self.listeners.notify_modules();
    }

    /// Change a feature behind the engine's back and notify listeners
    pub fn upsert_feature(&self, record: FeatureRecord) {
        if let Ok(mut features) = self.features.write() {
            match features
                .iter_mut()
                .find(|f| f.module_code == record.module_code && f.feature_code == record.feature_code)
            {
                Some(existing) => *existing = record,
                None => features.push(record),
            }
        }
        self.listeners.notify_features();
    }

    pub fn module_fetches(&self) -> u64 {
        self.calls.module_fetches.load(Ordering::SeqCst)
    }

    pub fn feature_fetches(&self) -> u64 {
        self.calls.feature_fetches.load(Ordering::SeqCst)
    }

    /// Writes that reached the store, accepted or not
    pub fn update_calls(&self) -> u64 {
        self.calls.module_updates.load(Ordering::SeqCst)
            + self.calls.feature_updates.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    async fn round_trip(&self) -> StatusResult<()> {
        let latency = self.latency.read().ok().and_then(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(StatusError::remote("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStateGateway for InMemoryGateway {
    async fn fetch_all_modules(&self) -> StatusResult<Vec<ModuleRecord>> {
        self.calls.module_fetches.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await?;
        self.modules
            .read()
            .map(|m| m.clone())
            .map_err(|_| StatusError::Internal("Lock poisoned".into()))
    }

    async fn fetch_all_features(&self) -> StatusResult<Vec<FeatureRecord>> {
        self.calls.feature_fetches.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await?;
        self.features
            .read()
            .map(|f| f.clone())
            .map_err(|_| StatusError::Internal("Lock poisoned".into()))
    }

    async fn update_module_status(&self, id: &str, status: ModuleStatus) -> StatusResult<()> {
        self.calls.module_updates.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await?;
        {
            let mut modules = self
                .modules
                .write()
                .map_err(|_| StatusError::Internal("Lock poisoned".into()))?;
            let module = modules
                .iter_mut()
                .find(|m| m.id == id)
                .ok_or_else(|| StatusError::not_found(format!("module id {}", id)))?;
            module.status = status;
            module.updated_at = Utc::now();
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
        self.calls.feature_updates.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await?;
        {
            let mut features = self
                .features
                .write()
                .map_err(|_| StatusError::Internal("Lock poisoned".into()))?;
            match features
                .iter_mut()
                .find(|f| f.module_code == module_code && f.feature_code == feature_code)
            {
                Some(feature) => {
                    feature.enabled = enabled;
                    feature.updated_at = Utc::now();
                }
                None => features.push(FeatureRecord::new(module_code, feature_code, enabled)),
            }
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

impl fmt::Debug for InMemoryGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryGateway")
            .field("available", &self.available.load(Ordering::SeqCst))
            .field("listeners", &self.listeners)
            .finish()
    }
}
