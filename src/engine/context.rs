//! State shared by the resolver, the refresh scheduler and the mutation
//! coordinator of one execution context.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::state::EngineStateCell;
use crate::cache::CacheTiers;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::gateway::RemoteStateGateway;
use crate::guard::InvariantGuard;
use crate::model::ModuleRecord;
use crate::observability::MetricsRegistry;

#[derive(Debug)]
pub struct EngineContext {
    pub config: EngineConfig,
    pub clock: Arc<dyn Clock>,
    pub guard: InvariantGuard,
    pub tiers: CacheTiers,
    pub gateway: Arc<dyn RemoteStateGateway>,
    pub state: EngineStateCell,
    pub metrics: Arc<MetricsRegistry>,
}

impl EngineContext {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Whether `code` is protected by reservation or by its cached `is_admin` flag
    pub fn is_module_protected(&self, code: &str) -> bool {
        if self.guard.is_protected(code) {
            return true;
        }
        if let Some(entry) = self.tiers.memory.module(code) {
            return entry.value.is_admin;
        }
        self.tiers
            .durable
            .module_status(code)
            .map(|row| row.value.is_admin)
            .unwrap_or(false)
    }

    /// Module record by storage id, memory first
    pub fn module_by_id(&self, id: &str) -> Option<ModuleRecord> {
        self.tiers
            .memory
            .module_by_id(id)
            .or_else(|| self.tiers.durable.module_by_id(id))
            .map(|entry| entry.value)
    }
}
