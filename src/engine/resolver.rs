//! # Status Resolver
//!
//! Cache-only answers to "is this module active / degraded / is this
//! feature enabled". Synchronous queries never block and never fail.
//!
//! Resolution order:
//! 1. Invariant guard (protected codes are always on)
//! 2. Verification-result cache (fresh entries only)
//! 3. Memory tier, stale entries included
//! 4. Durable tier (status index, then the collection), stale included
//! 5. Configured default
//!
//! Anything stale or missing schedules a background refresh. Results from
//! steps 3 to 5 are written back to the verification cache.

use std::sync::Arc;

use serde::Serialize;

use super::context::EngineContext;
use super::refresh::{RecordKind, RefreshScheduler};
use crate::cache::{CacheEntry, CheckKey};
use crate::model::{FeatureKey, ModuleStatus};
use crate::observability::{log_event, Event, ResolutionSource};

/// A module status answer with its provenance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// Status after guard enforcement; `None` when nothing is cached
    pub status: Option<ModuleStatus>,
    pub active: bool,
    pub degraded: bool,
    pub source: ResolutionSource,
    /// Served past its tier's TTL
    pub stale: bool,
    /// Served stale while the remote store is unreachable
    pub degraded_trust: bool,
}

/// A record found in one of the record tiers
struct Found<T> {
    value: T,
    source: ResolutionSource,
    stale: bool,
}

#[derive(Debug, Clone)]
pub struct StatusResolver {
    ctx: Arc<EngineContext>,
    scheduler: RefreshScheduler,
}

impl StatusResolver {
    pub fn new(ctx: Arc<EngineContext>, scheduler: RefreshScheduler) -> Self {
        Self { ctx, scheduler }
    }

    // ==================
    // Synchronous queries
    // ==================

    pub fn is_module_active(&self, code: &str) -> bool {
        if self.ctx.guard.is_protected(code) {
            self.ctx.metrics.record_resolution(ResolutionSource::Guard);
            return true;
        }
        self.checked(CheckKey::ModuleActive(code.to_string()), || {
            self.resolve_module(code).active
        })
    }

    /// Whether a module is running in reduced capacity
    pub fn is_module_degraded(&self, code: &str) -> bool {
        if self.ctx.guard.is_protected(code) {
            self.ctx.metrics.record_resolution(ResolutionSource::Guard);
            return false;
        }
        self.checked(CheckKey::ModuleDegraded(code.to_string()), || {
            self.resolve_module(code).degraded
        })
    }

    /// A feature is on when its module is protected, or when its module is
    /// active and the feature itself is enabled.
    pub fn is_feature_enabled(&self, module_code: &str, feature_code: &str) -> bool {
        if self.ctx.guard.is_protected(module_code) {
            self.ctx.metrics.record_resolution(ResolutionSource::Guard);
            return true;
        }
        let key = FeatureKey::new(module_code, feature_code);
        self.checked(CheckKey::FeatureEnabled(key.clone()), || {
            self.resolve_feature(&key)
        })
    }

    /// Full module answer, bypassing the verification cache
    pub fn resolve_module(&self, code: &str) -> Resolution {
        if self.ctx.guard.is_protected(code) {
            self.ctx.metrics.record_resolution(ResolutionSource::Guard);
            return Resolution {
                status: Some(ModuleStatus::Active),
                active: true,
                degraded: false,
                source: ResolutionSource::Guard,
                stale: false,
                degraded_trust: false,
            };
        }

        match self.find_module(code) {
            Some(found) => {
                let (status, is_admin) = found.value;
                let status = if is_admin { ModuleStatus::Active } else { status };
                let degraded_trust = self.note_stale(code, found.stale);
                self.ctx.metrics.record_resolution(found.source);
                Resolution {
                    status: Some(status),
                    active: status.is_usable(),
                    degraded: status == ModuleStatus::Degraded,
                    source: found.source,
                    stale: found.stale,
                    degraded_trust,
                }
            }
            None => {
                self.miss(RecordKind::Modules, code);
                self.ctx.metrics.record_resolution(ResolutionSource::Default);
                Resolution {
                    status: None,
                    active: self.ctx.config.unknown_default,
                    degraded: false,
                    source: ResolutionSource::Default,
                    stale: false,
                    degraded_trust: false,
                }
            }
        }
    }

    fn resolve_feature(&self, key: &FeatureKey) -> bool {
        let module = self.resolve_module(&key.module_code);
        if module.status.is_some() && self.ctx.is_module_protected(&key.module_code) {
            return true;
        }
        if !module.active {
            return false;
        }

        match self.find_feature(key) {
            Some(found) => {
                self.note_stale(&key.to_string(), found.stale);
                self.ctx.metrics.record_resolution(found.source);
                found.value
            }
            None => {
                self.miss(RecordKind::Features, &key.to_string());
                self.ctx.metrics.record_resolution(ResolutionSource::Default);
                self.ctx.config.unknown_default
            }
        }
    }

    fn checked(&self, key: CheckKey, resolve: impl FnOnce() -> bool) -> bool {
        let now = self.ctx.now();
        let ttl = self.ctx.config.status_check_ttl();
        if let Some(value) = self.ctx.tiers.checks.get(&key, now, ttl) {
            self.ctx.metrics.record_resolution(ResolutionSource::CheckCache);
            return value;
        }
        let value = resolve();
        self.ctx.tiers.checks.put(key, value, now);
        value
    }

    // ==================
    // Tier lookups
    // ==================

    /// `(status, is_admin)` of a module from memory, else durable
    fn find_module(&self, code: &str) -> Option<Found<(ModuleStatus, bool)>> {
        let now = self.ctx.now();
        let tiers = &self.ctx.tiers;

        if let Some(entry) = tiers.memory.module(code) {
            let stale = !entry.is_fresh(now, self.ctx.config.memory_ttl());
            if stale {
                self.scheduler.schedule_modules();
            }
            return Some(Found {
                value: (entry.value.status, entry.value.is_admin),
                source: ResolutionSource::Memory,
                stale,
            });
        }

        let durable_ttl = self.ctx.config.durable_ttl();
        let from_index = tiers
            .durable
            .module_status(code)
            .map(|row| CacheEntry::new((row.value.status, row.value.is_admin), row.timestamp));
        let from_collection = tiers.durable.module(code);

        if let Some(record) = &from_collection {
            tiers.memory.modules.promote(code.to_string(), record.clone());
        }

        let entry = from_index.or_else(|| {
            from_collection.map(|e| e.map(|r| (r.status, r.is_admin)))
        })?;
        let stale = !entry.is_fresh(now, durable_ttl);
        if stale {
            self.scheduler.schedule_modules();
        }
        Some(Found {
            value: entry.value,
            source: ResolutionSource::Durable,
            stale,
        })
    }

    fn find_feature(&self, key: &FeatureKey) -> Option<Found<bool>> {
        let now = self.ctx.now();
        let tiers = &self.ctx.tiers;

        if let Some(entry) = tiers.memory.feature(key) {
            let stale = !entry.is_fresh(now, self.ctx.config.memory_ttl());
            if stale {
                self.scheduler.schedule_features();
            }
            return Some(Found {
                value: entry.value.enabled,
                source: ResolutionSource::Memory,
                stale,
            });
        }

        let entry = tiers.durable.feature(key)?;
        tiers.memory.features.promote(key.clone(), entry.clone());
        let stale = !entry.is_fresh(now, self.ctx.config.durable_ttl());
        if stale {
            self.scheduler.schedule_features();
        }
        Some(Found {
            value: entry.value.enabled,
            source: ResolutionSource::Durable,
            stale,
        })
    }

    /// Count and flag a stale serve; returns whether it is degraded-trust
    fn note_stale(&self, key: &str, stale: bool) -> bool {
        if !stale {
            return false;
        }
        self.ctx.metrics.increment_stale_serves();
        let degraded_trust = self.ctx.state.is_degraded();
        if degraded_trust {
            log_event(Event::DegradedTrustRead, &[("key", key)]);
        }
        degraded_trust
    }

    /// Nothing cached for `key`.
    ///
    /// A loaded table without the code means the remote store does not know
    /// it either, so no refresh is worth starting.
    fn miss(&self, kind: RecordKind, key: &str) {
        let loaded = match kind {
            RecordKind::Modules => self.ctx.tiers.memory.modules.is_loaded(),
            RecordKind::Features => self.ctx.tiers.memory.features.is_loaded(),
        };
        if loaded {
            log_event(Event::UnknownCode, &[("kind", kind.as_str()), ("key", key)]);
            return;
        }
        match kind {
            RecordKind::Modules => self.scheduler.schedule_modules(),
            RecordKind::Features => self.scheduler.schedule_features(),
        };
    }

    // ==================
    // Async queries
    // ==================

    pub async fn is_module_active_async(&self, code: &str) -> bool {
        self.ensure_loaded(RecordKind::Modules, code).await;
        self.is_module_active(code)
    }

    pub async fn is_module_degraded_async(&self, code: &str) -> bool {
        self.ensure_loaded(RecordKind::Modules, code).await;
        self.is_module_degraded(code)
    }

    pub async fn is_feature_enabled_async(&self, module_code: &str, feature_code: &str) -> bool {
        self.ensure_loaded(RecordKind::Modules, module_code).await;
        let key = FeatureKey::new(module_code, feature_code);
        self.ensure_loaded(RecordKind::Features, &key.to_string()).await;
        self.is_feature_enabled(module_code, feature_code)
    }

    /// Await a refresh only when nothing at all is cached for `key`
    async fn ensure_loaded(&self, kind: RecordKind, key: &str) {
        if self.ctx.guard.is_protected(key) || self.has_any_entry(kind, key) {
            return;
        }
        let result = match kind {
            RecordKind::Modules => self.scheduler.refresh_modules(false).await.map(|_| ()),
            RecordKind::Features => self.scheduler.refresh_features(false).await.map(|_| ()),
        };
        // Failure is already logged; the sync path falls back to the default
        let _ = result;
    }

    fn has_any_entry(&self, kind: RecordKind, key: &str) -> bool {
        let tiers = &self.ctx.tiers;
        match kind {
            RecordKind::Modules => {
                tiers.memory.modules.is_loaded()
                    || tiers.memory.module(key).is_some()
                    || tiers.durable.module_status(key).is_some()
                    || tiers.durable.module(key).is_some()
            }
            RecordKind::Features => {
                let Some(key) = FeatureKey::parse(key) else {
                    return true;
                };
                tiers.memory.features.is_loaded()
                    || tiers.memory.feature(&key).is_some()
                    || tiers.durable.feature(&key).is_some()
            }
        }
    }
}
