//! # Mutation Coordinator
//!
//! The write path:
//! 1. Guard validation (rejection does no I/O)
//! 2. Refusal while degraded
//! 3. Remote write
//! 4. On success, write-through to both record tiers and a broadcast
//!
//! A failed remote write leaves every cache untouched. There is no offline
//! write mode.

use std::sync::Arc;

use super::context::EngineContext;
use super::refresh::RefreshScheduler;
use crate::errors::{StatusError, StatusResult};
use crate::guard::RequestedValue;
use crate::model::{FeatureKey, FeatureRecord, ModuleStatus, SyncMessage};
use crate::observability::{log_event, Event};
use crate::sync::Broadcaster;

#[derive(Debug, Clone)]
pub struct MutationCoordinator {
    ctx: Arc<EngineContext>,
    scheduler: RefreshScheduler,
    broadcaster: Broadcaster,
}

impl MutationCoordinator {
    pub fn new(
        ctx: Arc<EngineContext>,
        scheduler: RefreshScheduler,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            ctx,
            scheduler,
            broadcaster,
        }
    }

    /// Set a module's status by storage id; `true` when accepted
    pub async fn set_module_status(&self, id: &str, status: ModuleStatus) -> bool {
        self.try_set_module_status(id, status).await.is_ok()
    }

    /// Set a feature flag; `true` when accepted
    pub async fn set_feature_enabled(
        &self,
        module_code: &str,
        feature_code: &str,
        enabled: bool,
    ) -> bool {
        self.try_set_feature_enabled(module_code, feature_code, enabled)
            .await
            .is_ok()
    }

    pub async fn try_set_module_status(&self, id: &str, status: ModuleStatus) -> StatusResult<()> {
        let target = id.to_string();
        let Some(record) = self.ctx.module_by_id(id) else {
            return Err(self.rejected(&target, StatusError::not_found(format!("module id {}", id))));
        };

        let protected = self.ctx.guard.is_protected_record(&record);
        self.ctx
            .guard
            .validate_write(&record.code, protected, RequestedValue::Status(status))
            .map_err(|e| self.rejected(&record.code, e))?;
        self.ensure_writable(&record.code)?;

        if let Err(e) = self.ctx.gateway.update_module_status(id, status).await {
            return Err(self.remote_failed(&record.code, e));
        }

        let now = self.ctx.now();
        let mut updated = record;
        updated.status = status;
        updated.updated_at = now;
        let _ = self.ctx.tiers.apply_module(&updated, now);

        self.accepted(&updated.code, status.as_str());
        self.broadcaster
            .publish(&SyncMessage::module_status(&updated.code, status, now));
        Ok(())
    }

    pub async fn try_set_feature_enabled(
        &self,
        module_code: &str,
        feature_code: &str,
        enabled: bool,
    ) -> StatusResult<()> {
        let key = FeatureKey::new(module_code, feature_code);
        let target = key.to_string();

        let owner_protected = self.ctx.is_module_protected(module_code);
        self.ctx
            .guard
            .validate_write(module_code, owner_protected, RequestedValue::Enabled(enabled))
            .map_err(|e| self.rejected(&target, e))?;
        self.ensure_writable(&target)?;

        if let Err(e) = self
            .ctx
            .gateway
            .update_feature_status(module_code, feature_code, enabled)
            .await
        {
            return Err(self.remote_failed(&target, e));
        }

        let now = self.ctx.now();
        let mut record = self
            .ctx
            .tiers
            .memory
            .feature(&key)
            .map(|e| e.value)
            .unwrap_or_else(|| FeatureRecord::new(module_code, feature_code, enabled));
        record.enabled = enabled;
        record.updated_at = now;
        let _ = self.ctx.tiers.apply_feature(&record, now);

        self.accepted(&target, if enabled { "enabled" } else { "disabled" });
        self.broadcaster
            .publish(&SyncMessage::feature_enabled(&key, enabled, now));
        Ok(())
    }

    fn ensure_writable(&self, target: &str) -> StatusResult<()> {
        if self.ctx.state.is_degraded() {
            self.ctx.metrics.increment_mutations_failed();
            log_event(
                Event::MutationFailed,
                &[("target", target), ("error", &StatusError::Degraded.to_string())],
            );
            return Err(StatusError::Degraded);
        }
        Ok(())
    }

    fn rejected(&self, target: &str, error: StatusError) -> StatusError {
        self.ctx.metrics.increment_mutations_rejected();
        log_event(
            Event::MutationRejected,
            &[("target", target), ("code", error.code()), ("error", &error.to_string())],
        );
        error
    }

    fn remote_failed(&self, target: &str, error: StatusError) -> StatusError {
        self.ctx.metrics.increment_mutations_failed();
        log_event(
            Event::MutationFailed,
            &[("target", target), ("error", &error.to_string())],
        );
        // A record the store no longer has is not a connectivity problem
        if error.is_retryable() {
            self.scheduler.on_remote_failure(&error);
        }
        error
    }

    fn accepted(&self, target: &str, value: &str) {
        self.ctx.metrics.increment_mutations_accepted();
        log_event(Event::MutationAccepted, &[("target", target), ("value", value)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests_support::{context, module};
    use crate::gateway::InMemoryGateway;
    use crate::sync::LocalBroadcastHub;

    async fn coordinator(gateway: Arc<InMemoryGateway>) -> (MutationCoordinator, Arc<EngineContext>) {
        let (ctx, _clock) = context(gateway);
        let scheduler = RefreshScheduler::new(Arc::clone(&ctx));
        scheduler.refresh_modules(true).await.unwrap();
        scheduler.refresh_features(true).await.unwrap();
        let broadcaster = Broadcaster::new(
            Arc::new(LocalBroadcastHub::new().open("app")),
            Arc::clone(&ctx.metrics),
        );
        (
            MutationCoordinator::new(Arc::clone(&ctx), scheduler, broadcaster),
            ctx,
        )
    }

    fn gateway() -> Arc<InMemoryGateway> {
        Arc::new(InMemoryGateway::new(
            vec![
                module("1", "shop", ModuleStatus::Active),
                module("9", "admin", ModuleStatus::Active),
            ],
            vec![FeatureRecord::new("shop", "cart", true)],
        ))
    }

    #[tokio::test]
    async fn test_accepted_write_updates_both_tiers() {
        let gateway = gateway();
        let (coordinator, ctx) = coordinator(gateway.clone()).await;

        assert!(coordinator.set_module_status("1", ModuleStatus::Maintenance).await);
        assert_eq!(
            ctx.tiers.memory.module("shop").unwrap().value.status,
            ModuleStatus::Maintenance
        );
        assert_eq!(
            ctx.tiers.durable.module_status("shop").unwrap().value.status,
            ModuleStatus::Maintenance
        );
        assert_eq!(ctx.metrics.snapshot().mutations_accepted, 1);
    }

    #[tokio::test]
    async fn test_protected_write_rejected_without_io() {
        let gateway = gateway();
        let (coordinator, _ctx) = coordinator(gateway.clone()).await;

        let err = coordinator
            .try_set_module_status("9", ModuleStatus::Inactive)
            .await
            .unwrap_err();
        assert!(matches!(err, StatusError::InvariantViolation { .. }));
        assert!(
            !coordinator
                .set_feature_enabled("admin", "users_management", false)
                .await
        );
        assert_eq!(gateway.update_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_id_rejected_without_io() {
        let gateway = gateway();
        let (coordinator, _ctx) = coordinator(gateway.clone()).await;

        assert!(!coordinator.set_module_status("404", ModuleStatus::Active).await);
        assert_eq!(gateway.update_calls(), 0);
    }

    #[tokio::test]
    async fn test_remote_failure_leaves_cache_and_degrades() {
        let gateway = gateway();
        let (coordinator, ctx) = coordinator(gateway.clone()).await;
        gateway.set_available(false);

        assert!(!coordinator.set_feature_enabled("shop", "cart", false).await);
        assert!(ctx.tiers.memory.feature(&FeatureKey::new("shop", "cart")).unwrap().value.enabled);
        assert!(ctx.state.is_degraded());

        // Degraded: refused before any I/O
        let calls = gateway.update_calls();
        let err = coordinator
            .try_set_feature_enabled("shop", "cart", false)
            .await
            .unwrap_err();
        assert_eq!(err, StatusError::Degraded);
        assert_eq!(gateway.update_calls(), calls);
        coordinator.scheduler.shutdown();
    }
}
