//! # Status Engine
//!
//! One engine per execution context. Contexts of the same origin share a
//! durable store and a broadcast hub; each keeps its own memory tier and
//! verification cache.
//!
//! ## Boot
//! The durable tier is tried first. A snapshot younger than
//! `max_boot_age` is loaded into memory with its original timestamps and
//! the engine is `Ready` at once, refreshing in the background. Otherwise
//! the engine loads from the remote store.

mod backoff;
mod context;
mod mutation;
mod refresh;
mod resolver;
mod state;

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use backoff::Backoff;
pub use context::EngineContext;
pub use mutation::MutationCoordinator;
pub use refresh::{RecordKind, RefreshScheduler};
pub use resolver::{Resolution, StatusResolver};
pub use state::{EngineState, EngineStateCell, LoadSource};

use crate::cache::{CacheTiers, DurableStore, DurableTier};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::errors::StatusResult;
use crate::gateway::RemoteStateGateway;
use crate::guard::InvariantGuard;
use crate::model::{FeaturesByModule, ModuleRecord, ModuleStatus, SyncKind, SyncMessage};
use crate::observability::{log_event, Event, Logger, MetricsRegistry, MetricsSnapshot};
use crate::sync::{BroadcastTransport, Broadcaster, Subscription};

/// Point-in-time view of an engine
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub origin: String,
    pub state: EngineState,
    pub modules_loaded_at: Option<DateTime<Utc>>,
    pub features_loaded_at: Option<DateTime<Utc>>,
    pub cached_modules: usize,
    pub cached_features: usize,
    pub cached_checks: usize,
    pub metrics: MetricsSnapshot,
}

pub struct StatusEngine {
    ctx: Arc<EngineContext>,
    scheduler: RefreshScheduler,
    resolver: StatusResolver,
    mutations: MutationCoordinator,
    broadcaster: Broadcaster,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl StatusEngine {
    pub fn new(
        config: EngineConfig,
        gateway: Arc<dyn RemoteStateGateway>,
        store: Arc<dyn DurableStore>,
        transport: Arc<dyn BroadcastTransport>,
    ) -> StatusResult<Self> {
        Self::with_clock(config, gateway, store, transport, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: EngineConfig,
        gateway: Arc<dyn RemoteStateGateway>,
        store: Arc<dyn DurableStore>,
        transport: Arc<dyn BroadcastTransport>,
        clock: Arc<dyn Clock>,
    ) -> StatusResult<Self> {
        config.validate()?;
        Logger::set_min_severity(config.severity()?);

        let metrics = Arc::new(MetricsRegistry::new());
        let durable = DurableTier::new(
            store,
            &config.key_prefix,
            config.durable_max_bytes,
            Arc::clone(&metrics),
        );
        let ctx = Arc::new(EngineContext {
            guard: InvariantGuard::from_config(&config),
            tiers: CacheTiers::new(durable, Arc::clone(&metrics)),
            state: EngineStateCell::new(),
            config,
            clock,
            gateway,
            metrics: Arc::clone(&metrics),
        });

        let scheduler = RefreshScheduler::new(Arc::clone(&ctx));
        let broadcaster = Broadcaster::new(transport, metrics);
        let resolver = StatusResolver::new(Arc::clone(&ctx), scheduler.clone());
        let mutations =
            MutationCoordinator::new(Arc::clone(&ctx), scheduler.clone(), broadcaster.clone());

        Ok(Self {
            ctx,
            scheduler,
            resolver,
            mutations,
            broadcaster,
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    // ==================
    // Lifecycle
    // ==================

    /// Boot from the durable tier (or the remote store), then listen for
    /// remote changes and sibling broadcasts and start the periodic tick.
    ///
    /// Never waits on the network.
    pub fn start(&self) -> StatusResult<()> {
        log_event(Event::BootStart, &[("origin", &self.ctx.config.origin)]);
        self.ctx
            .state
            .transition(EngineState::Loading(LoadSource::Cache), "boot");

        let source = if self.load_durable() {
            self.ctx.state.recover("loaded from durable cache");
            LoadSource::Cache
        } else {
            self.ctx
                .state
                .transition(EngineState::Loading(LoadSource::Remote), "no usable durable snapshot");
            LoadSource::Remote
        };
        self.scheduler.schedule_modules();
        self.scheduler.schedule_features();

        let remote = self.subscribe_remote();
        let siblings = self.subscribe_siblings();
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            subscriptions.push(remote);
            subscriptions.push(siblings);
        }
        self.scheduler.start_periodic()?;

        log_event(
            Event::BootComplete,
            &[
                ("source", if source == LoadSource::Cache { "cache" } else { "remote" }),
                ("state", self.ctx.state.get().as_str()),
            ],
        );
        Ok(())
    }

    /// Boot and wait until the first remote refresh has finished
    pub async fn start_and_settle(&self) -> StatusResult<()> {
        self.start()?;
        self.scheduler.settle(RecordKind::Modules).await;
        self.scheduler.settle(RecordKind::Features).await;
        Ok(())
    }

    /// Load a young-enough durable snapshot into memory
    fn load_durable(&self) -> bool {
        let now = self.ctx.now();
        let max_age = self.ctx.config.max_boot_age();
        let tiers = &self.ctx.tiers;

        let Some(modules) = tiers.durable.load_modules() else {
            return false;
        };
        if now - modules.timestamp > max_age {
            return false;
        }
        let records: Vec<ModuleRecord> = modules
            .data
            .into_iter()
            .map(|r| self.ctx.guard.enforce_module(r))
            .collect();
        tiers.memory.replace_modules(&records, modules.timestamp);

        if let Some(features) = tiers.durable.load_features() {
            if now - features.timestamp <= max_age {
                let records: Vec<_> = features
                    .data
                    .into_iter()
                    .map(|r| {
                        let owner_protected = self.ctx.is_module_protected(&r.module_code);
                        self.ctx.guard.enforce_feature(r, owner_protected)
                    })
                    .collect();
                tiers.memory.replace_features(&records, features.timestamp);
            }
        }
        true
    }

    fn subscribe_remote(&self) -> Subscription {
        let modules = self.scheduler.clone();
        let features = self.scheduler.clone();
        self.ctx.gateway.subscribe_to_changes(
            Arc::new(move || {
                log_event(Event::RemoteChange, &[("kind", "modules")]);
                modules.schedule_modules();
            }),
            Arc::new(move || {
                log_event(Event::RemoteChange, &[("kind", "features")]);
                features.schedule_features();
            }),
        )
    }

    /// Sibling changes invalidate; the next query re-resolves from the
    /// shared durable tier without contacting the remote store
    fn subscribe_siblings(&self) -> Subscription {
        let ctx = Arc::clone(&self.ctx);
        self.broadcaster.subscribe(move |message: SyncMessage| match message.kind {
            SyncKind::ModuleStatusChange => ctx.tiers.invalidate_module(&message.payload.key),
            SyncKind::FeatureStatusChange => match message.feature_key() {
                Some(key) => ctx.tiers.invalidate_feature(&key),
                None => log_event(
                    Event::BroadcastDropped,
                    &[("key", &message.payload.key), ("error", "malformed feature key")],
                ),
            },
        })
    }

    /// Stop listening and cancel background work. Caches are kept.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            subscriptions.clear();
        }
        self.broadcaster.close();
        log_event(Event::Shutdown, &[("origin", &self.ctx.config.origin)]);
    }

    /// Drop every tier, durable keys included (logout)
    pub fn clear(&self) -> StatusResult<()> {
        self.ctx.tiers.clear()?;
        log_event(Event::CacheCleared, &[("origin", &self.ctx.config.origin)]);
        Ok(())
    }

    // ==================
    // Queries
    // ==================

    pub fn is_module_active(&self, code: &str) -> bool {
        self.resolver.is_module_active(code)
    }

    pub fn is_module_degraded(&self, code: &str) -> bool {
        self.resolver.is_module_degraded(code)
    }

    pub fn is_feature_enabled(&self, module_code: &str, feature_code: &str) -> bool {
        self.resolver.is_feature_enabled(module_code, feature_code)
    }

    pub async fn is_module_active_async(&self, code: &str) -> bool {
        self.resolver.is_module_active_async(code).await
    }

    pub async fn is_module_degraded_async(&self, code: &str) -> bool {
        self.resolver.is_module_degraded_async(code).await
    }

    pub async fn is_feature_enabled_async(&self, module_code: &str, feature_code: &str) -> bool {
        self.resolver
            .is_feature_enabled_async(module_code, feature_code)
            .await
    }

    pub fn resolve_module(&self, code: &str) -> Resolution {
        self.resolver.resolve_module(code)
    }

    /// Cached modules in display order
    pub fn modules(&self) -> Vec<ModuleRecord> {
        self.scheduler.cached_modules()
    }

    // ==================
    // Writes and refresh
    // ==================

    pub async fn set_module_status(&self, id: &str, status: ModuleStatus) -> bool {
        self.mutations.set_module_status(id, status).await
    }

    pub async fn set_feature_enabled(
        &self,
        module_code: &str,
        feature_code: &str,
        enabled: bool,
    ) -> bool {
        self.mutations
            .set_feature_enabled(module_code, feature_code, enabled)
            .await
    }

    pub async fn try_set_module_status(&self, id: &str, status: ModuleStatus) -> StatusResult<()> {
        self.mutations.try_set_module_status(id, status).await
    }

    pub async fn try_set_feature_enabled(
        &self,
        module_code: &str,
        feature_code: &str,
        enabled: bool,
    ) -> StatusResult<()> {
        self.mutations
            .try_set_feature_enabled(module_code, feature_code, enabled)
            .await
    }

    pub async fn refresh_modules(&self, force: bool) -> StatusResult<Vec<ModuleRecord>> {
        self.scheduler.refresh_modules(force).await
    }

    pub async fn refresh_features(&self, force: bool) -> StatusResult<FeaturesByModule> {
        self.scheduler.refresh_features(force).await
    }

    // ==================
    // Accessors
    // ==================

    pub fn state(&self) -> EngineState {
        self.ctx.state.get()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn guard(&self) -> &InvariantGuard {
        &self.ctx.guard
    }

    pub fn tiers(&self) -> &CacheTiers {
        &self.ctx.tiers
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let tiers = &self.ctx.tiers;
        Diagnostics {
            origin: self.ctx.config.origin.clone(),
            state: self.state(),
            modules_loaded_at: tiers.memory.modules.loaded_at(),
            features_loaded_at: tiers.memory.features.loaded_at(),
            cached_modules: tiers.memory.modules.len(),
            cached_features: tiers.memory.features.len(),
            cached_checks: tiers.checks.len(),
            metrics: self.metrics(),
        }
    }
}

impl Drop for StatusEngine {
    fn drop(&mut self) {
        self.scheduler.shutdown();
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            subscriptions.clear();
        }
    }
}

impl fmt::Debug for StatusEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusEngine")
            .field("origin", &self.ctx.config.origin)
            .field("state", &self.state())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::cache::MemoryDurableStore;
    use crate::clock::ManualClock;

    pub fn module(id: &str, code: &str, status: ModuleStatus) -> ModuleRecord {
        ModuleRecord::new(id, code, status)
    }

    /// Config with retry delays short enough for tests
    pub fn test_config() -> EngineConfig {
        EngineConfig {
            retry_base_ms: 5,
            retry_max_ms: 20,
            ..EngineConfig::default()
        }
    }

    pub fn context(gateway: Arc<dyn RemoteStateGateway>) -> (Arc<EngineContext>, Arc<ManualClock>) {
        context_with(test_config(), gateway)
    }

    pub fn context_with(
        config: EngineConfig,
        gateway: Arc<dyn RemoteStateGateway>,
    ) -> (Arc<EngineContext>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let metrics = Arc::new(MetricsRegistry::new());
        let durable = DurableTier::new(
            Arc::new(MemoryDurableStore::new()),
            &config.key_prefix,
            config.durable_max_bytes,
            Arc::clone(&metrics),
        );
        let ctx = Arc::new(EngineContext {
            guard: InvariantGuard::from_config(&config),
            tiers: CacheTiers::new(durable, Arc::clone(&metrics)),
            state: EngineStateCell::new(),
            config,
            clock: clock.clone(),
            gateway,
            metrics,
        });
        (ctx, clock)
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::{module, test_config};
    use super::*;
    use crate::cache::MemoryDurableStore;
    use crate::clock::ManualClock;
    use crate::gateway::InMemoryGateway;
    use crate::model::FeatureRecord;
    use crate::sync::LocalBroadcastHub;
    use chrono::Duration;

    fn engine(
        gateway: Arc<InMemoryGateway>,
        store: Arc<MemoryDurableStore>,
        clock: Arc<ManualClock>,
    ) -> StatusEngine {
        StatusEngine::with_clock(
            test_config(),
            gateway,
            store,
            Arc::new(LocalBroadcastHub::new().open("app")),
            clock,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_boot_from_remote() {
        let gateway = Arc::new(InMemoryGateway::new(
            vec![module("1", "shop", ModuleStatus::Active)],
            vec![FeatureRecord::new("shop", "cart", true)],
        ));
        let engine = engine(
            gateway,
            Arc::new(MemoryDurableStore::new()),
            Arc::new(ManualClock::starting_now()),
        );

        engine.start_and_settle().await.unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
        assert!(engine.is_feature_enabled("shop", "cart"));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_boot_from_durable_while_remote_down() {
        let store = Arc::new(MemoryDurableStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let gateway = Arc::new(InMemoryGateway::new(
            vec![module("1", "shop", ModuleStatus::Inactive)],
            vec![],
        ));

        let first = engine(gateway.clone(), Arc::clone(&store), clock.clone());
        first.start_and_settle().await.unwrap();
        first.shutdown();

        gateway.set_available(false);
        clock.advance(Duration::hours(1));
        let second = engine(gateway, store, clock);
        second.start().unwrap();

        assert!(!second.is_module_active("shop"));
        assert_eq!(second.resolve_module("shop").source, crate::observability::ResolutionSource::Memory);
        second.shutdown();
    }

    #[tokio::test]
    async fn test_old_durable_snapshot_ignored_at_boot() {
        let store = Arc::new(MemoryDurableStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let gateway = Arc::new(InMemoryGateway::new(
            vec![module("1", "shop", ModuleStatus::Active)],
            vec![],
        ));

        let first = engine(gateway.clone(), Arc::clone(&store), clock.clone());
        first.start_and_settle().await.unwrap();
        first.shutdown();

        gateway.set_available(false);
        clock.advance(Duration::hours(25));
        let second = engine(gateway, store, clock);
        second.start().unwrap();

        assert!(!second.tiers().memory.modules.is_loaded());
        second.shutdown();
    }

    #[tokio::test]
    async fn test_clear_drops_durable_keys() {
        let store = Arc::new(MemoryDurableStore::new());
        let gateway = Arc::new(InMemoryGateway::new(
            vec![module("1", "shop", ModuleStatus::Active)],
            vec![],
        ));
        let engine = engine(gateway, Arc::clone(&store), Arc::new(ManualClock::starting_now()));
        engine.start_and_settle().await.unwrap();
        assert!(!store.is_empty());

        engine.clear().unwrap();
        assert!(store.is_empty());
        assert_eq!(engine.diagnostics().cached_modules, 0);
        engine.shutdown();
    }
}
