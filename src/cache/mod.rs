//! # Cache Tiers
//!
//! - **Memory**: process-local records, short TTL
//! - **Durable**: per-origin persisted records, longer TTL, survives restart
//! - **Checks**: resolved booleans, shortest TTL
//!
//! [`CacheTiers`] is built once and handed to the resolver, the mutation
//! coordinator and the refresh scheduler.

pub mod checks;
pub mod durable;
pub mod entry;
pub mod memory;
pub mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use checks::{CheckKey, StatusChecks};
pub use durable::{DurableKeys, DurableTier, Envelope, StatusIndex, StatusIndexEntry};
pub use entry::CacheEntry;
pub use memory::{MemoryTier, Tier};
pub use store::{DurableStore, FileDurableStore, MemoryDurableStore};

use crate::errors::StatusResult;
use crate::model::{FeatureKey, FeatureRecord, ModuleRecord};
use crate::observability::MetricsRegistry;

/// The memory, durable, and verification caches of one context
#[derive(Debug)]
pub struct CacheTiers {
    pub memory: MemoryTier,
    pub durable: DurableTier,
    pub checks: StatusChecks,
    metrics: Arc<MetricsRegistry>,
}

impl CacheTiers {
    pub fn new(durable: DurableTier, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            memory: MemoryTier::new(),
            durable,
            checks: StatusChecks::new(),
            metrics,
        }
    }

    /// Drop cached state for one module so the next query re-resolves it.
    ///
    /// Durable data is shared with sibling contexts and is left alone.
    pub fn invalidate_module(&self, code: &str) {
        self.memory.modules.remove_where(|k| k == code);
        self.checks.invalidate_module(code);
        self.metrics.increment_invalidations();
    }

    pub fn invalidate_feature(&self, key: &FeatureKey) {
        self.memory.features.remove_where(|k| k == key);
        self.checks.invalidate_feature(key);
        self.metrics.increment_invalidations();
    }

    /// Write-through of an accepted module change to both record tiers
    pub fn apply_module(&self, record: &ModuleRecord, now: DateTime<Utc>) -> StatusResult<()> {
        self.memory.put_module(record.clone(), now);
        self.checks.invalidate_module(&record.code);
        self.durable.put_module(record, now)
    }

    /// Write-through of an accepted feature change to both record tiers
    pub fn apply_feature(&self, record: &FeatureRecord, now: DateTime<Utc>) -> StatusResult<()> {
        self.memory.put_feature(record.clone(), now);
        self.checks.invalidate_feature(&record.key());
        self.durable.put_feature(record, now)
    }

    /// Full replace of the module tiers from a refresh
    pub fn replace_modules(&self, records: &[ModuleRecord], now: DateTime<Utc>) -> StatusResult<()> {
        self.memory.replace_modules(records, now);
        self.checks.clear();
        self.durable.store_modules(records, now)
    }

    /// Full replace of the feature tiers from a refresh
    pub fn replace_features(
        &self,
        records: &[FeatureRecord],
        now: DateTime<Utc>,
    ) -> StatusResult<()> {
        self.memory.replace_features(records, now);
        self.checks.clear();
        self.durable.store_features(records, now)
    }

    /// Drop everything, durable keys included
    pub fn clear(&self) -> StatusResult<()> {
        self.memory.clear();
        self.checks.clear();
        self.durable.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CheckKey;
    use crate::model::ModuleStatus;

    fn tiers() -> CacheTiers {
        let metrics = Arc::new(MetricsRegistry::new());
        let durable = DurableTier::new(
            Arc::new(MemoryDurableStore::new()),
            "modgate",
            1 << 20,
            Arc::clone(&metrics),
        );
        CacheTiers::new(durable, metrics)
    }

    #[test]
    fn test_invalidate_keeps_durable() {
        let tiers = tiers();
        let now = Utc::now();
        tiers
            .replace_modules(&[ModuleRecord::new("1", "shop", ModuleStatus::Active)], now)
            .unwrap();
        tiers.checks.put(CheckKey::ModuleActive("shop".into()), true, now);

        tiers.invalidate_module("shop");

        assert!(tiers.memory.module("shop").is_none());
        assert!(tiers.checks.is_empty());
        assert!(tiers.durable.module("shop").is_some());
    }

    #[test]
    fn test_apply_module_updates_both_tiers() {
        let tiers = tiers();
        let now = Utc::now();
        tiers
            .replace_modules(&[ModuleRecord::new("1", "shop", ModuleStatus::Active)], now)
            .unwrap();

        tiers
            .apply_module(&ModuleRecord::new("1", "shop", ModuleStatus::Inactive), now)
            .unwrap();

        assert_eq!(tiers.memory.module("shop").unwrap().value.status, ModuleStatus::Inactive);
        assert_eq!(tiers.durable.module("shop").unwrap().value.status, ModuleStatus::Inactive);
    }

    #[test]
    fn test_clear_empties_everything() {
        let tiers = tiers();
        let now = Utc::now();
        tiers
            .replace_features(&[FeatureRecord::new("shop", "cart", true)], now)
            .unwrap();

        tiers.clear().unwrap();
        assert!(tiers.memory.features.is_empty());
        assert!(!tiers.memory.features.is_loaded());
        assert!(tiers.durable.load_features().is_none());
    }
}
