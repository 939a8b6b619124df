//! # Remote State Gateway
//!
//! Boundary to the authoritative remote store. The engine treats every error
//! or timeout from it the same way: the remote is unavailable.

mod file;
mod memory;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

pub use file::{JsonFileGateway, StoreDocument};
pub use memory::InMemoryGateway;

use crate::errors::StatusResult;
use crate::model::{FeatureRecord, ModuleRecord, ModuleStatus};
use crate::sync::Subscription;

/// Change-notification callback
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Authoritative, network-accessed module/feature store
#[async_trait]
pub trait RemoteStateGateway: Send + Sync + fmt::Debug {
    async fn fetch_all_modules(&self) -> StatusResult<Vec<ModuleRecord>>;

    async fn fetch_all_features(&self) -> StatusResult<Vec<FeatureRecord>>;

    /// Set a module's status by storage id
    async fn update_module_status(&self, id: &str, status: ModuleStatus) -> StatusResult<()>;

    async fn update_feature_status(
        &self,
        module_code: &str,
        feature_code: &str,
        enabled: bool,
    ) -> StatusResult<()>;

    /// Register for change notifications; drop the handle to stop them
    fn subscribe_to_changes(
        &self,
        on_module_change: ChangeCallback,
        on_feature_change: ChangeCallback,
    ) -> Subscription;
}

#[derive(Clone)]
struct Listener {
    on_module_change: ChangeCallback,
    on_feature_change: ChangeCallback,
}

/// Registered change listeners of a gateway
#[derive(Default)]
pub(crate) struct ChangeListeners {
    next_id: AtomicU64,
    listeners: RwLock<HashMap<u64, Listener>>,
}

impl ChangeListeners {
    pub(crate) fn subscribe(
        self: &Arc<Self>,
        on_module_change: ChangeCallback,
        on_feature_change: ChangeCallback,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.insert(
                id,
                Listener {
                    on_module_change,
                    on_feature_change,
                },
            );
        }

        let weak = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(this) = weak.upgrade() {
                if let Ok(mut listeners) = this.listeners.write() {
                    listeners.remove(&id);
                }
            }
        })
    }

    /// Snapshot first so callbacks run without the lock held
    fn snapshot(&self) -> Vec<Listener> {
        self.listeners
            .read()
            .map(|l| l.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn notify_modules(&self) {
        for listener in self.snapshot() {
            (listener.on_module_change)();
        }
    }

    pub(crate) fn notify_features(&self) {
        for listener in self.snapshot() {
            (listener.on_feature_change)();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }
}

impl fmt::Debug for ChangeListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeListeners")
            .field("count", &self.len())
            .finish()
    }
}
