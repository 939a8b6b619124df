//! # Refresh Scheduler
//!
//! Pulls full record sets from the remote store and replaces both cache
//! tiers wholesale.
//!
//! ## Concurrency
//! At most one refresh per record type is in flight. The in-flight flag is
//! taken before the remote call starts and released by a drop guard, so a
//! failed or cancelled refresh never locks the slot. Triggers that arrive
//! while a refresh is running are coalesced into it.
//!
//! ## Failure
//! Previous cache contents are kept, the error goes back to the caller, the
//! engine enters `Degraded`, and a backoff retry is scheduled. While that
//! retry is pending, background triggers do not reach the remote store.
//! The engine returns to `Ready` once no record type is failing.
//!
//! ## Ordering
//! Feature protection depends on the owning module's `is_admin` flag, so a
//! feature refresh waits for the module table first.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::backoff::Backoff;
use super::context::EngineContext;
use crate::errors::{StatusError, StatusResult};
use crate::model::{group_features, FeatureRecord, FeaturesByModule, ModuleRecord};
use crate::observability::{log_event, Event};

/// Record type a refresh covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Modules,
    Features,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Modules => "modules",
            RecordKind::Features => "features",
        }
    }
}

/// Result of the most recent finished refresh of one slot
#[derive(Debug, Clone, Default)]
struct Outcome {
    generation: u64,
    error: Option<StatusError>,
}

#[derive(Debug)]
struct RefreshSlot {
    in_flight: AtomicBool,
    outcome: watch::Sender<Outcome>,
}

impl RefreshSlot {
    fn new() -> Arc<Self> {
        let (outcome, _) = watch::channel(Outcome::default());
        Arc::new(Self {
            in_flight: AtomicBool::new(false),
            outcome,
        })
    }

    fn try_acquire(self: &Arc<Self>) -> Option<InFlight> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight {
                slot: Arc::clone(self),
                error: Some(StatusError::Internal("refresh abandoned".into())),
            })
    }

    fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Wait for the running refresh, if any, and return its outcome
    async fn wait(&self) -> Outcome {
        let mut rx = self.outcome.subscribe();
        if self.is_in_flight() && rx.changed().await.is_err() {
            return Outcome::default();
        }
        let outcome = rx.borrow().clone();
        outcome
    }
}

/// Holds a slot's in-flight flag; releasing it publishes the outcome
struct InFlight {
    slot: Arc<RefreshSlot>,
    error: Option<StatusError>,
}

impl InFlight {
    fn finish<T>(mut self, result: &StatusResult<T>) {
        self.error = result.as_ref().err().cloned();
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.slot.in_flight.store(false, Ordering::Release);
        let error = self.error.take();
        self.slot.outcome.send_modify(|outcome| {
            outcome.generation += 1;
            outcome.error = error;
        });
    }
}

struct SchedulerInner {
    modules: Arc<RefreshSlot>,
    features: Arc<RefreshSlot>,
    backoff: Backoff,
    retry_attempt: AtomicU32,
    retry_pending: AtomicBool,
    modules_failing: AtomicBool,
    features_failing: AtomicBool,
    closed: AtomicBool,
    retry_task: Mutex<Option<JoinHandle<()>>>,
    periodic_task: Mutex<Option<JoinHandle<()>>>,
}

/// Refresh entry point; cheap to clone
#[derive(Clone)]
pub struct RefreshScheduler {
    ctx: Arc<EngineContext>,
    inner: Arc<SchedulerInner>,
}

impl RefreshScheduler {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        let backoff = Backoff::new(
            Duration::from_millis(ctx.config.retry_base_ms),
            Duration::from_millis(ctx.config.retry_max_ms),
        );
        Self {
            ctx,
            inner: Arc::new(SchedulerInner {
                modules: RefreshSlot::new(),
                features: RefreshSlot::new(),
                backoff,
                retry_attempt: AtomicU32::new(0),
                retry_pending: AtomicBool::new(false),
                modules_failing: AtomicBool::new(false),
                features_failing: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                retry_task: Mutex::new(None),
                periodic_task: Mutex::new(None),
            }),
        }
    }

    fn slot(&self, kind: RecordKind) -> &Arc<RefreshSlot> {
        match kind {
            RecordKind::Modules => &self.inner.modules,
            RecordKind::Features => &self.inner.features,
        }
    }

    pub fn is_in_flight(&self, kind: RecordKind) -> bool {
        self.slot(kind).is_in_flight()
    }

    fn failing(&self, kind: RecordKind) -> &AtomicBool {
        match kind {
            RecordKind::Modules => &self.inner.modules_failing,
            RecordKind::Features => &self.inner.features_failing,
        }
    }

    // ==================
    // Explicit refresh
    // ==================

    /// Full module list from the remote store.
    ///
    /// Without `force`, a fresh memory table is returned as is. A call made
    /// while a refresh is running waits for that refresh instead of starting
    /// another.
    pub async fn refresh_modules(&self, force: bool) -> StatusResult<Vec<ModuleRecord>> {
        let now = self.ctx.now();
        if !force && self.ctx.tiers.memory.modules.is_fresh(now, self.ctx.config.memory_ttl()) {
            return Ok(self.cached_modules());
        }

        match self.inner.modules.try_acquire() {
            Some(flight) => self.run_modules(flight).await,
            None => {
                self.coalesced(RecordKind::Modules);
                match self.inner.modules.wait().await.error {
                    Some(e) => Err(e),
                    None => Ok(self.cached_modules()),
                }
            }
        }
    }

    /// Full feature list from the remote store, grouped by module code
    pub async fn refresh_features(&self, force: bool) -> StatusResult<FeaturesByModule> {
        let now = self.ctx.now();
        if !force && self.ctx.tiers.memory.features.is_fresh(now, self.ctx.config.memory_ttl()) {
            return Ok(group_features(self.ctx.tiers.memory.features.values()));
        }

        match self.inner.features.try_acquire() {
            Some(flight) => self.run_features(flight).await.map(group_features),
            None => {
                self.coalesced(RecordKind::Features);
                match self.inner.features.wait().await.error {
                    Some(e) => Err(e),
                    None => Ok(group_features(self.ctx.tiers.memory.features.values())),
                }
            }
        }
    }

    /// Memory-tier modules in display order
    pub fn cached_modules(&self) -> Vec<ModuleRecord> {
        let mut modules = self.ctx.tiers.memory.modules.values();
        modules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.code.cmp(&b.code)));
        modules
    }

    /// Wait for a running refresh of `kind`; returns immediately if none is
    pub async fn settle(&self, kind: RecordKind) {
        self.slot(kind).wait().await;
    }

    // ==================
    // Background triggers
    // ==================

    /// Start a background module refresh unless one is already running.
    ///
    /// Returns whether a refresh was spawned. Callable from synchronous code.
    pub fn schedule_modules(&self) -> bool {
        self.schedule(RecordKind::Modules)
    }

    pub fn schedule_features(&self) -> bool {
        self.schedule(RecordKind::Features)
    }

    fn schedule(&self, kind: RecordKind) -> bool {
        if self.inner.closed.load(Ordering::SeqCst) {
            return false;
        }
        // The pending retry owns the next remote attempt
        if self.ctx.state.is_degraded() && self.inner.retry_pending.load(Ordering::SeqCst) {
            self.coalesced(kind);
            return false;
        }
        let Some(flight) = self.slot(kind).try_acquire() else {
            self.coalesced(kind);
            return false;
        };
        let Ok(runtime) = Handle::try_current() else {
            log_event(
                Event::RefreshSkipped,
                &[("kind", kind.as_str()), ("reason", "no async runtime")],
            );
            return false;
        };

        let this = self.clone();
        runtime.spawn(async move {
            match kind {
                RecordKind::Modules => {
                    let _ = this.run_modules(flight).await;
                }
                RecordKind::Features => {
                    let _ = this.run_features(flight).await;
                }
            }
        });
        true
    }

    fn coalesced(&self, kind: RecordKind) {
        self.ctx.metrics.increment_refreshes_coalesced();
        log_event(Event::RefreshCoalesced, &[("kind", kind.as_str())]);
    }

    /// Spawn the fixed-interval tick. Replaces a previously started tick.
    pub fn start_periodic(&self) -> StatusResult<()> {
        let runtime = Handle::try_current()
            .map_err(|_| StatusError::Internal("no async runtime for periodic refresh".into()))?;
        let period = self.ctx.config.refresh_interval();

        let this = self.clone();
        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; boot already refreshed
            interval.tick().await;
            loop {
                interval.tick().await;
                this.schedule_modules();
                this.schedule_features();
            }
        });

        if let Ok(mut task) = self.inner.periodic_task.lock() {
            if let Some(previous) = task.replace(handle) {
                previous.abort();
            }
        }
        Ok(())
    }

    /// Stop the tick and any pending retry; later triggers are ignored
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        for task in [&self.inner.periodic_task, &self.inner.retry_task] {
            if let Ok(mut task) = task.lock() {
                if let Some(handle) = task.take() {
                    handle.abort();
                }
            }
        }
    }

    // ==================
    // Refresh bodies
    // ==================

    async fn run_modules(&self, flight: InFlight) -> StatusResult<Vec<ModuleRecord>> {
        self.started(RecordKind::Modules);
        let result = match self.ctx.gateway.fetch_all_modules().await {
            Ok(records) => {
                let records: Vec<ModuleRecord> = records
                    .into_iter()
                    .map(|r| self.ctx.guard.enforce_module(r))
                    .collect();
                // Durable failures are logged by the tier; memory is already current
                let _ = self.ctx.tiers.replace_modules(&records, self.ctx.now());
                self.reenforce_cached_features();
                self.succeeded(RecordKind::Modules, records.len());
                Ok(records)
            }
            Err(e) => Err(self.failed(RecordKind::Modules, e)),
        };
        flight.finish(&result);
        result
    }

    async fn run_features(&self, flight: InFlight) -> StatusResult<Vec<FeatureRecord>> {
        self.await_module_table().await;
        self.started(RecordKind::Features);
        let result = match self.ctx.gateway.fetch_all_features().await {
            Ok(records) => {
                let records: Vec<FeatureRecord> = records
                    .into_iter()
                    .map(|r| {
                        let owner_protected = self.ctx.is_module_protected(&r.module_code);
                        self.ctx.guard.enforce_feature(r, owner_protected)
                    })
                    .collect();
                let _ = self.ctx.tiers.replace_features(&records, self.ctx.now());
                self.succeeded(RecordKind::Features, records.len());
                Ok(records)
            }
            Err(e) => Err(self.failed(RecordKind::Features, e)),
        };
        flight.finish(&result);
        result
    }

    /// Make sure `is_admin` flags are known before features are enforced
    async fn await_module_table(&self) {
        if self.is_in_flight(RecordKind::Modules) {
            self.settle(RecordKind::Modules).await;
        } else if !self.ctx.tiers.memory.modules.is_loaded() {
            // On failure the guard's reserved codes still apply
            let _ = self.refresh_modules(false).await;
        }
    }

    /// Force cached features of newly protected modules back on
    fn reenforce_cached_features(&self) {
        let features = &self.ctx.tiers.memory.features;
        let Some(loaded_at) = features.loaded_at() else {
            return;
        };
        let mut changed = false;
        let records: Vec<FeatureRecord> = features
            .values()
            .into_iter()
            .map(|r| {
                let owner_protected = self.ctx.is_module_protected(&r.module_code);
                let enforced = self.ctx.guard.enforce_feature(r.clone(), owner_protected);
                changed |= enforced != r;
                enforced
            })
            .collect();
        if changed {
            let _ = self.ctx.tiers.replace_features(&records, loaded_at);
        }
    }

    fn started(&self, kind: RecordKind) {
        self.ctx.metrics.increment_refreshes_started();
        log_event(Event::RefreshStart, &[("kind", kind.as_str())]);
    }

    fn succeeded(&self, kind: RecordKind, count: usize) {
        self.ctx.metrics.increment_refreshes_succeeded();
        log_event(
            Event::RefreshComplete,
            &[("kind", kind.as_str()), ("count", &count.to_string())],
        );
        self.failing(kind).store(false, Ordering::SeqCst);
        if self.inner.modules_failing.load(Ordering::SeqCst)
            || self.inner.features_failing.load(Ordering::SeqCst)
        {
            return;
        }
        self.inner.retry_attempt.store(0, Ordering::SeqCst);
        self.ctx.state.recover("refresh succeeded");
    }

    fn failed(&self, kind: RecordKind, error: StatusError) -> StatusError {
        self.ctx.metrics.increment_refreshes_failed();
        log_event(
            Event::RefreshFailed,
            &[("kind", kind.as_str()), ("error", &error.to_string())],
        );
        self.failing(kind).store(true, Ordering::SeqCst);
        self.on_remote_failure(&error);
        error
    }

    // ==================
    // Degraded-mode retry
    // ==================

    /// Enter `Degraded` and make sure a retry is pending
    pub fn on_remote_failure(&self, error: &StatusError) {
        self.ctx.state.degrade(&error.to_string());
        self.schedule_retry();
    }

    fn schedule_retry(&self) {
        if self.inner.closed.load(Ordering::SeqCst)
            || self.inner.retry_pending.swap(true, Ordering::SeqCst)
        {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            self.inner.retry_pending.store(false, Ordering::SeqCst);
            log_event(
                Event::RefreshSkipped,
                &[("kind", "retry"), ("reason", "no async runtime")],
            );
            return;
        };

        let attempt = self.inner.retry_attempt.fetch_add(1, Ordering::SeqCst);
        let delay = self.inner.backoff.delay(attempt);
        log_event(
            Event::RetryScheduled,
            &[
                ("attempt", &(attempt + 1).to_string()),
                ("delay_ms", &delay.as_millis().to_string()),
            ],
        );

        let this = self.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            this.inner.retry_pending.store(false, Ordering::SeqCst);
            if !this.ctx.state.is_degraded() {
                return;
            }
            if this.refresh_modules(true).await.is_ok() {
                let _ = this.refresh_features(true).await;
            }
        });

        if let Ok(mut task) = self.inner.retry_task.lock() {
            // A finished retry's handle is simply replaced
            *task = Some(handle);
        }
    }
}

impl fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("modules_in_flight", &self.inner.modules.is_in_flight())
            .field("features_in_flight", &self.inner.features.is_in_flight())
            .field("retry_pending", &self.inner.retry_pending.load(Ordering::SeqCst))
            .finish()
    }
}
