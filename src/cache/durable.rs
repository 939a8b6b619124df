//! # Durable Tier
//!
//! Typed view over a [`DurableStore`]. Values are JSON `{data, timestamp}`
//! envelopes under three well-known keys: the module collection, the feature
//! collection, and a compact module-status index.
//!
//! A payload that fails to parse is discarded and reported as a miss.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::entry::CacheEntry;
use super::store::DurableStore;
use crate::errors::{StatusError, StatusResult};
use crate::model::{FeatureKey, FeatureRecord, ModuleRecord, ModuleStatus};
use crate::observability::{log_event, Event, MetricsRegistry};

/// Persisted `{data, timestamp}` wrapper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

/// One row of the compact status index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusIndexEntry {
    pub status: ModuleStatus,
    #[serde(default)]
    pub is_admin: bool,
    pub timestamp: DateTime<Utc>,
}

pub type StatusIndex = BTreeMap<String, StatusIndexEntry>;

/// Well-known durable keys
#[derive(Debug, Clone)]
pub struct DurableKeys {
    pub modules: String,
    pub features: String,
    pub status_index: String,
}

impl DurableKeys {
    pub fn new(prefix: &str) -> Self {
        Self {
            modules: format!("{}:modules", prefix),
            features: format!("{}:features", prefix),
            status_index: format!("{}:module_status", prefix),
        }
    }

    fn all(&self) -> [&str; 3] {
        [&self.modules, &self.features, &self.status_index]
    }
}

#[derive(Debug)]
pub struct DurableTier {
    store: Arc<dyn DurableStore>,
    keys: DurableKeys,
    max_bytes: usize,
    metrics: Arc<MetricsRegistry>,
}

impl DurableTier {
    pub fn new(
        store: Arc<dyn DurableStore>,
        key_prefix: &str,
        max_bytes: usize,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            store,
            keys: DurableKeys::new(key_prefix),
            max_bytes,
            metrics,
        }
    }

    pub fn keys(&self) -> &DurableKeys {
        &self.keys
    }

    // ==================
    // Reads
    // ==================

    pub fn load_modules(&self) -> Option<Envelope<Vec<ModuleRecord>>> {
        self.read(&self.keys.modules)
    }

    pub fn load_features(&self) -> Option<Envelope<Vec<FeatureRecord>>> {
        self.read(&self.keys.features)
    }

    pub fn load_status_index(&self) -> Option<Envelope<StatusIndex>> {
        self.read(&self.keys.status_index)
    }

    /// Module record, stamped with its collection's timestamp
    pub fn module(&self, code: &str) -> Option<CacheEntry<ModuleRecord>> {
        let envelope = self.load_modules()?;
        let record = envelope.data.into_iter().find(|m| m.code == code)?;
        Some(CacheEntry::new(record, envelope.timestamp))
    }

    pub fn module_by_id(&self, id: &str) -> Option<CacheEntry<ModuleRecord>> {
        let envelope = self.load_modules()?;
        let record = envelope.data.into_iter().find(|m| m.id == id)?;
        Some(CacheEntry::new(record, envelope.timestamp))
    }

    /// Status from the compact index, stamped per row
    pub fn module_status(&self, code: &str) -> Option<CacheEntry<StatusIndexEntry>> {
        let index = self.load_status_index()?;
        let row = index.data.get(code)?.clone();
        let at = row.timestamp;
        Some(CacheEntry::new(row, at))
    }

    pub fn feature(&self, key: &FeatureKey) -> Option<CacheEntry<FeatureRecord>> {
        let envelope = self.load_features()?;
        let record = envelope
            .data
            .into_iter()
            .find(|f| f.module_code == key.module_code && f.feature_code == key.feature_code)?;
        Some(CacheEntry::new(record, envelope.timestamp))
    }

    // ==================
    // Writes
    // ==================

    /// Replace the module collection and rebuild the status index
    pub fn store_modules(&self, records: &[ModuleRecord], now: DateTime<Utc>) -> StatusResult<()> {
        self.write(
            &self.keys.modules,
            &Envelope {
                data: records,
                timestamp: now,
            },
        )?;

        let index: StatusIndex = records
            .iter()
            .map(|r| {
                (
                    r.code.clone(),
                    StatusIndexEntry {
                        status: r.status,
                        is_admin: r.is_admin,
                        timestamp: now,
                    },
                )
            })
            .collect();
        self.write(
            &self.keys.status_index,
            &Envelope {
                data: index,
                timestamp: now,
            },
        )
    }

    /// Replace the feature collection
    pub fn store_features(&self, records: &[FeatureRecord], now: DateTime<Utc>) -> StatusResult<()> {
        self.write(
            &self.keys.features,
            &Envelope {
                data: records,
                timestamp: now,
            },
        )
    }

    /// Overwrite one module in place.
    ///
    /// The collection is only rewritten when it already exists, so a partial
    /// collection is never persisted. The status index row is always written.
    pub fn put_module(&self, record: &ModuleRecord, now: DateTime<Utc>) -> StatusResult<()> {
        if let Some(mut envelope) = self.load_modules() {
            match envelope.data.iter_mut().find(|m| m.code == record.code) {
                Some(existing) => *existing = record.clone(),
                None => envelope.data.push(record.clone()),
            }
            envelope.timestamp = now;
            self.write(&self.keys.modules, &envelope)?;
        }

        let mut index = self.load_status_index().unwrap_or(Envelope {
            data: StatusIndex::new(),
            timestamp: now,
        });
        index.data.insert(
            record.code.clone(),
            StatusIndexEntry {
                status: record.status,
                is_admin: record.is_admin,
                timestamp: now,
            },
        );
        self.write(&self.keys.status_index, &index)
    }

    /// Overwrite one feature in place; no-op when the collection is absent
    pub fn put_feature(&self, record: &FeatureRecord, now: DateTime<Utc>) -> StatusResult<()> {
        let Some(mut envelope) = self.load_features() else {
            return Ok(());
        };
        match envelope
            .data
            .iter_mut()
            .find(|f| f.module_code == record.module_code && f.feature_code == record.feature_code)
        {
            Some(existing) => *existing = record.clone(),
            None => envelope.data.push(record.clone()),
        }
        envelope.timestamp = now;
        self.write(&self.keys.features, &envelope)
    }

    /// Remove every engine key (logout / origin clear)
    pub fn clear(&self) -> StatusResult<()> {
        for key in self.keys.all() {
            self.store.remove(key)?;
        }
        Ok(())
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                log_event(
                    Event::DurableCorrupt,
                    &[("key", key), ("error", &e.to_string())],
                );
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                self.metrics.increment_durable_corruptions();
                log_event(
                    Event::DurableCorrupt,
                    &[("key", key), ("error", &e.to_string())],
                );
                let _ = self.store.remove(key);
                None
            }
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> StatusResult<()> {
        let raw = serde_json::to_string(value)?;
        if raw.len() > self.max_bytes {
            let err = StatusError::StorageQuota {
                key: key.to_string(),
                bytes: raw.len(),
                limit: self.max_bytes,
            };
            log_event(
                Event::DurableWriteFailed,
                &[("key", key), ("error", &err.to_string())],
            );
            return Err(err);
        }
        self.store.set(key, &raw).map_err(|e| {
            log_event(
                Event::DurableWriteFailed,
                &[("key", key), ("error", &e.to_string())],
            );
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryDurableStore;

    fn tier(store: Arc<MemoryDurableStore>) -> DurableTier {
        DurableTier::new(store, "modgate", 64 * 1024, Arc::new(MetricsRegistry::new()))
    }

    #[test]
    fn test_store_and_read_modules() {
        let store = Arc::new(MemoryDurableStore::new());
        let tier = tier(store);
        let now = Utc::now();

        tier.store_modules(&[ModuleRecord::new("1", "shop", ModuleStatus::Degraded)], now)
            .unwrap();

        let entry = tier.module("shop").unwrap();
        assert_eq!(entry.value.status, ModuleStatus::Degraded);
        assert_eq!(entry.timestamp, now);

        let row = tier.module_status("shop").unwrap();
        assert_eq!(row.value.status, ModuleStatus::Degraded);
        assert!(tier.module("wardrobe").is_none());
    }

    #[test]
    fn test_corrupt_payload_is_discarded() {
        let store = Arc::new(MemoryDurableStore::new());
        store.set("modgate:modules", "{definitely not json").unwrap();
        let tier = tier(Arc::clone(&store));

        assert!(tier.load_modules().is_none());
        // Discarded, not left to fail again
        assert_eq!(store.get("modgate:modules").unwrap(), None);
        assert_eq!(tier.metrics.snapshot().durable_corruptions, 1);
    }

    #[test]
    fn test_put_module_without_collection_only_touches_index() {
        let store = Arc::new(MemoryDurableStore::new());
        let tier = tier(Arc::clone(&store));

        tier.put_module(&ModuleRecord::new("1", "shop", ModuleStatus::Inactive), Utc::now())
            .unwrap();

        assert!(tier.load_modules().is_none());
        assert_eq!(
            tier.module_status("shop").unwrap().value.status,
            ModuleStatus::Inactive
        );
    }

    #[test]
    fn test_put_module_rewrites_collection() {
        let store = Arc::new(MemoryDurableStore::new());
        let tier = tier(store);
        let t0 = Utc::now();
        tier.store_modules(
            &[
                ModuleRecord::new("1", "shop", ModuleStatus::Active),
                ModuleRecord::new("2", "wardrobe", ModuleStatus::Active),
            ],
            t0,
        )
        .unwrap();

        let t1 = t0 + chrono::Duration::seconds(3);
        tier.put_module(&ModuleRecord::new("1", "shop", ModuleStatus::Inactive), t1)
            .unwrap();

        let envelope = tier.load_modules().unwrap();
        assert_eq!(envelope.timestamp, t1);
        assert_eq!(envelope.data.len(), 2);
        assert_eq!(tier.module("shop").unwrap().value.status, ModuleStatus::Inactive);
    }

    #[test]
    fn test_size_bound_enforced() {
        let store = Arc::new(MemoryDurableStore::new());
        let tier = DurableTier::new(store, "modgate", 16, Arc::new(MetricsRegistry::new()));

        let err = tier
            .store_features(&[FeatureRecord::new("shop", "cart", true)], Utc::now())
            .unwrap_err();
        assert!(matches!(err, StatusError::StorageQuota { limit: 16, .. }));
        assert!(tier.load_features().is_none());
    }

    #[test]
    fn test_clear_removes_all_keys() {
        let store = Arc::new(MemoryDurableStore::new());
        let tier = tier(Arc::clone(&store));
        let now = Utc::now();
        tier.store_modules(&[ModuleRecord::new("1", "shop", ModuleStatus::Active)], now)
            .unwrap();
        tier.store_features(&[FeatureRecord::new("shop", "cart", true)], now)
            .unwrap();
        assert_eq!(store.len(), 3);

        tier.clear().unwrap();
        assert!(store.is_empty());
    }
}
