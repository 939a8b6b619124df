//! Verification-result cache.
//!
//! Short-lived resolved booleans, so a hot query is derived from records at
//! most once per TTL window. Expired entries are never served.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};

use super::entry::CacheEntry;
use crate::model::FeatureKey;

/// The query a cached boolean answers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CheckKey {
    ModuleActive(String),
    ModuleDegraded(String),
    FeatureEnabled(FeatureKey),
}

impl CheckKey {
    fn module_code(&self) -> &str {
        match self {
            CheckKey::ModuleActive(code) | CheckKey::ModuleDegraded(code) => code,
            CheckKey::FeatureEnabled(key) => &key.module_code,
        }
    }
}

#[derive(Debug, Default)]
pub struct StatusChecks {
    results: ArcSwap<HashMap<CheckKey, CacheEntry<bool>>>,
}

impl StatusChecks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached result if younger than `ttl`
    pub fn get(&self, key: &CheckKey, now: DateTime<Utc>, ttl: Duration) -> Option<bool> {
        self.results
            .load()
            .get(key)
            .filter(|e| e.is_fresh(now, ttl))
            .map(|e| e.value)
    }

    pub fn put(&self, key: CheckKey, value: bool, now: DateTime<Utc>) {
        let entry = CacheEntry::new(value, now);
        self.results.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(key.clone(), entry.clone());
            next
        });
    }

    /// Drop every result derived from `code`, including its features
    pub fn invalidate_module(&self, code: &str) {
        self.results.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.retain(|k, _| k.module_code() != code);
            next
        });
    }

    pub fn invalidate_feature(&self, key: &FeatureKey) {
        self.results.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.retain(|k, _| !matches!(k, CheckKey::FeatureEnabled(f) if f == key));
            next
        });
    }

    pub fn clear(&self) {
        self.results.store(Arc::new(HashMap::new()));
    }

    pub fn len(&self) -> usize {
        self.results.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_result_not_served() {
        let checks = StatusChecks::new();
        let t0 = Utc::now();
        let ttl = Duration::seconds(5);
        let key = CheckKey::ModuleActive("shop".into());

        checks.put(key.clone(), true, t0);
        assert_eq!(checks.get(&key, t0 + Duration::seconds(4), ttl), Some(true));
        assert_eq!(checks.get(&key, t0 + Duration::seconds(5), ttl), None);
    }

    #[test]
    fn test_invalidate_module_drops_its_features() {
        let checks = StatusChecks::new();
        let now = Utc::now();
        checks.put(CheckKey::ModuleActive("shop".into()), true, now);
        checks.put(CheckKey::ModuleDegraded("shop".into()), false, now);
        checks.put(CheckKey::FeatureEnabled(FeatureKey::new("shop", "cart")), true, now);
        checks.put(CheckKey::ModuleActive("messaging".into()), true, now);

        checks.invalidate_module("shop");
        assert_eq!(checks.len(), 1);
    }

    #[test]
    fn test_invalidate_single_feature() {
        let checks = StatusChecks::new();
        let now = Utc::now();
        let cart = FeatureKey::new("shop", "cart");
        checks.put(CheckKey::FeatureEnabled(cart.clone()), true, now);
        checks.put(CheckKey::FeatureEnabled(FeatureKey::new("shop", "wishlist")), true, now);

        checks.invalidate_feature(&cart);
        assert_eq!(checks.len(), 1);
    }
}
