//! # Memory Tier
//!
//! Process-local maps of module and feature records.
//!
//! Every mutation publishes a whole new map through an `ArcSwap`, so a
//! concurrent reader sees either the old map or the new one, never a
//! half-updated structure.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};

use super::entry::CacheEntry;
use crate::model::{FeatureKey, FeatureRecord, ModuleRecord};

/// One keyed table plus the instant it was last loaded in full
#[derive(Debug, Clone)]
struct Table<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    /// Set by a full replace; absent until the first refresh or boot load
    loaded_at: Option<DateTime<Utc>>,
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            loaded_at: None,
        }
    }
}

/// A snapshot-swapped table
#[derive(Debug)]
pub struct Tier<K, V> {
    table: ArcSwap<Table<K, V>>,
}

impl<K, V> Default for Tier<K, V> {
    fn default() -> Self {
        Self {
            table: ArcSwap::from_pointee(Table::default()),
        }
    }
}

impl<K, V> Tier<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn get(&self, key: &K) -> Option<CacheEntry<V>> {
        self.table.load().entries.get(key).cloned()
    }

    /// Whether a full load has ever populated this table
    pub fn is_loaded(&self) -> bool {
        self.table.load().loaded_at.is_some()
    }

    /// Whether the last full load is younger than `ttl`
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match self.table.load().loaded_at {
            Some(at) => CacheEntry::new((), at).is_fresh(now, ttl),
            None => false,
        }
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.table.load().loaded_at
    }

    pub fn values(&self) -> Vec<V> {
        self.table
            .load()
            .entries
            .values()
            .map(|e| e.value.clone())
            .collect()
    }

    pub fn find(&self, pred: impl Fn(&V) -> bool) -> Option<CacheEntry<V>> {
        self.table
            .load()
            .entries
            .values()
            .find(|e| pred(&e.value))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.table.load().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full replace; every entry gets `loaded_at` as its timestamp
    pub fn replace(&self, items: impl IntoIterator<Item = (K, V)>, loaded_at: DateTime<Utc>) {
        let entries = items
            .into_iter()
            .map(|(k, v)| (k, CacheEntry::new(v, loaded_at)))
            .collect();
        self.table.store(Arc::new(Table {
            entries,
            loaded_at: Some(loaded_at),
        }));
    }

    /// Insert or overwrite one entry
    pub fn put(&self, key: K, value: V, at: DateTime<Utc>) {
        let entry = CacheEntry::new(value, at);
        self.table.rcu(|current| {
            let mut next = (**current).clone();
            next.entries.insert(key.clone(), entry.clone());
            next
        });
    }

    /// Insert an entry that was read from a slower tier, keeping its timestamp.
    ///
    /// Does not overwrite an entry already present.
    pub fn promote(&self, key: K, entry: CacheEntry<V>) {
        self.table.rcu(|current| {
            let mut next = (**current).clone();
            next.entries.entry(key.clone()).or_insert_with(|| entry.clone());
            next
        });
    }

    /// Remove entries matching `pred`; returns whether anything was removed
    pub fn remove_where(&self, pred: impl Fn(&K) -> bool) -> bool {
        let previous = self.table.rcu(|current| {
            let mut next = (**current).clone();
            next.entries.retain(|k, _| !pred(k));
            next
        });
        previous.entries.keys().any(|k| pred(k))
    }

    pub fn clear(&self) {
        self.table.store(Arc::new(Table::default()));
    }
}

/// Module and feature records held in memory
#[derive(Debug, Default)]
pub struct MemoryTier {
    pub modules: Tier<String, ModuleRecord>,
    pub features: Tier<FeatureKey, FeatureRecord>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(&self, code: &str) -> Option<CacheEntry<ModuleRecord>> {
        self.modules.get(&code.to_string())
    }

    pub fn module_by_id(&self, id: &str) -> Option<CacheEntry<ModuleRecord>> {
        self.modules.find(|m| m.id == id)
    }

    pub fn feature(&self, key: &FeatureKey) -> Option<CacheEntry<FeatureRecord>> {
        self.features.get(key)
    }

    pub fn replace_modules(&self, records: &[ModuleRecord], now: DateTime<Utc>) {
        self.modules
            .replace(records.iter().map(|r| (r.code.clone(), r.clone())), now);
    }

    pub fn replace_features(&self, records: &[FeatureRecord], now: DateTime<Utc>) {
        self.features
            .replace(records.iter().map(|r| (r.key(), r.clone())), now);
    }

    pub fn put_module(&self, record: ModuleRecord, now: DateTime<Utc>) {
        self.modules.put(record.code.clone(), record, now);
    }

    pub fn put_feature(&self, record: FeatureRecord, now: DateTime<Utc>) {
        self.features.put(record.key(), record, now);
    }

    pub fn clear(&self) {
        self.modules.clear();
        self.features.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModuleStatus;

    #[test]
    fn test_replace_is_wholesale() {
        let tier = MemoryTier::new();
        let now = Utc::now();
        tier.replace_modules(
            &[
                ModuleRecord::new("1", "shop", ModuleStatus::Active),
                ModuleRecord::new("2", "wardrobe", ModuleStatus::Active),
            ],
            now,
        );
        tier.replace_modules(&[ModuleRecord::new("1", "shop", ModuleStatus::Inactive)], now);

        assert!(tier.module("wardrobe").is_none());
        assert_eq!(tier.module("shop").unwrap().value.status, ModuleStatus::Inactive);
        assert_eq!(tier.modules.len(), 1);
    }

    #[test]
    fn test_loaded_and_freshness() {
        let tier = MemoryTier::new();
        let now = Utc::now();
        assert!(!tier.modules.is_loaded());

        tier.replace_modules(&[], now);
        assert!(tier.modules.is_loaded());
        assert!(tier.modules.is_fresh(now, Duration::seconds(45)));
        assert!(!tier.modules.is_fresh(now + Duration::seconds(45), Duration::seconds(45)));
    }

    #[test]
    fn test_put_does_not_mark_loaded() {
        let tier = MemoryTier::new();
        tier.put_module(ModuleRecord::new("9", "shop", ModuleStatus::Active), Utc::now());
        assert!(tier.module("shop").is_some());
        assert!(!tier.modules.is_loaded());
    }

    #[test]
    fn test_promote_keeps_existing() {
        let tier = MemoryTier::new();
        let now = Utc::now();
        tier.put_module(ModuleRecord::new("1", "shop", ModuleStatus::Inactive), now);
        tier.modules.promote(
            "shop".to_string(),
            CacheEntry::new(ModuleRecord::new("1", "shop", ModuleStatus::Active), now),
        );
        assert_eq!(tier.module("shop").unwrap().value.status, ModuleStatus::Inactive);
    }

    #[test]
    fn test_remove_where() {
        let tier = MemoryTier::new();
        let now = Utc::now();
        tier.replace_features(
            &[
                FeatureRecord::new("shop", "cart", true),
                FeatureRecord::new("shop", "wishlist", true),
                FeatureRecord::new("messaging", "inbox", true),
            ],
            now,
        );

        assert!(tier.features.remove_where(|k| k.module_code == "shop"));
        assert_eq!(tier.features.len(), 1);
        assert!(!tier.features.remove_where(|k| k.module_code == "shop"));
        // Invalidation keeps the table marked loaded
        assert!(tier.features.is_loaded());
    }

    #[test]
    fn test_module_by_id() {
        let tier = MemoryTier::new();
        tier.replace_modules(&[ModuleRecord::new("id-7", "shop", ModuleStatus::Active)], Utc::now());
        assert_eq!(tier.module_by_id("id-7").unwrap().value.code, "shop");
        assert!(tier.module_by_id("id-8").is_none());
    }
}
