//! Engine counters
//!
//! Counters only, monotonic, reset on process start.
//! Relaxed ordering; exactness across threads is not required.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Where a resolution was answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// Protected code short-circuit
    Guard,
    /// Verification-result cache
    CheckCache,
    /// Memory tier
    Memory,
    /// Durable tier
    Durable,
    /// Documented default
    Default,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::Guard => "guard",
            ResolutionSource::CheckCache => "check_cache",
            ResolutionSource::Memory => "memory",
            ResolutionSource::Durable => "durable",
            ResolutionSource::Default => "default",
        }
    }
}

/// Atomic counters for the engine
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    resolved_guard: AtomicU64,
    resolved_check_cache: AtomicU64,
    resolved_memory: AtomicU64,
    resolved_durable: AtomicU64,
    resolved_default: AtomicU64,
    stale_serves: AtomicU64,
    refreshes_started: AtomicU64,
    refreshes_succeeded: AtomicU64,
    refreshes_failed: AtomicU64,
    refreshes_coalesced: AtomicU64,
    mutations_accepted: AtomicU64,
    mutations_rejected: AtomicU64,
    mutations_failed: AtomicU64,
    broadcasts_published: AtomicU64,
    broadcasts_received: AtomicU64,
    invalidations: AtomicU64,
    durable_corruptions: AtomicU64,
}

impl MetricsRegistry {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a resolution by source
    pub fn record_resolution(&self, source: ResolutionSource) {
        let counter = match source {
            ResolutionSource::Guard => &self.resolved_guard,
            ResolutionSource::CheckCache => &self.resolved_check_cache,
            ResolutionSource::Memory => &self.resolved_memory,
            ResolutionSource::Durable => &self.resolved_durable,
            ResolutionSource::Default => &self.resolved_default,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_stale_serves(&self) {
        self.stale_serves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_refreshes_started(&self) {
        self.refreshes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_refreshes_succeeded(&self) {
        self.refreshes_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_refreshes_failed(&self) {
        self.refreshes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_refreshes_coalesced(&self) {
        self.refreshes_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_mutations_accepted(&self) {
        self.mutations_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_mutations_rejected(&self) {
        self.mutations_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_mutations_failed(&self) {
        self.mutations_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_broadcasts_published(&self) {
        self.broadcasts_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_broadcasts_received(&self) {
        self.broadcasts_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_invalidations(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_durable_corruptions(&self) {
        self.durable_corruptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of refreshes that actually reached the remote store
    pub fn refreshes_started(&self) -> u64 {
        self.refreshes_started.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            resolved_guard: load(&self.resolved_guard),
            resolved_check_cache: load(&self.resolved_check_cache),
            resolved_memory: load(&self.resolved_memory),
            resolved_durable: load(&self.resolved_durable),
            resolved_default: load(&self.resolved_default),
            stale_serves: load(&self.stale_serves),
            refreshes_started: load(&self.refreshes_started),
            refreshes_succeeded: load(&self.refreshes_succeeded),
            refreshes_failed: load(&self.refreshes_failed),
            refreshes_coalesced: load(&self.refreshes_coalesced),
            mutations_accepted: load(&self.mutations_accepted),
            mutations_rejected: load(&self.mutations_rejected),
            mutations_failed: load(&self.mutations_failed),
            broadcasts_published: load(&self.broadcasts_published),
            broadcasts_received: load(&self.broadcasts_received),
            invalidations: load(&self.invalidations),
            durable_corruptions: load(&self.durable_corruptions),
        }
    }
}

/// Serializable copy of [`MetricsRegistry`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub resolved_guard: u64,
    pub resolved_check_cache: u64,
    pub resolved_memory: u64,
    pub resolved_durable: u64,
    pub resolved_default: u64,
    pub stale_serves: u64,
    pub refreshes_started: u64,
    pub refreshes_succeeded: u64,
    pub refreshes_failed: u64,
    pub refreshes_coalesced: u64,
    pub mutations_accepted: u64,
    pub mutations_rejected: u64,
    pub mutations_failed: u64,
    pub broadcasts_published: u64,
    pub broadcasts_received: u64,
    pub invalidations: u64,
    pub durable_corruptions: u64,
}
