//! # Invariant Guard
//!
//! Pure policy checks for protected modules. No I/O.
//!
//! ## Invariants
//! - A protected module always resolves `active`.
//! - Every feature of a protected module always resolves enabled.
//! - No write may disable a protected module or feature.
//!
//! The same guard instance is applied on the read path, on refresh, and on
//! the write path.

use std::collections::HashSet;

use crate::config::EngineConfig;
use crate::errors::{StatusError, StatusResult};
use crate::model::{FeatureRecord, ModuleRecord, ModuleStatus};

/// Value a caller asks to write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedValue {
    /// New module status
    Status(ModuleStatus),
    /// New feature flag
    Enabled(bool),
}

impl RequestedValue {
    fn disables(&self) -> bool {
        match self {
            RequestedValue::Status(status) => *status != ModuleStatus::Active,
            RequestedValue::Enabled(enabled) => !enabled,
        }
    }
}

/// Protected-module policy
#[derive(Debug, Clone)]
pub struct InvariantGuard {
    /// Reserved codes (lowercased)
    codes: HashSet<String>,
    /// Reserved namespace prefixes (lowercased)
    prefixes: Vec<String>,
}

impl InvariantGuard {
    pub fn new<C, P>(codes: C, prefixes: P) -> Self
    where
        C: IntoIterator,
        C::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        Self {
            codes: codes
                .into_iter()
                .map(|c| c.as_ref().to_ascii_lowercase())
                .collect(),
            prefixes: prefixes
                .into_iter()
                .map(|p| p.as_ref().to_ascii_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.protected_codes, &config.protected_prefixes)
    }

    /// Whether a module code is reserved, by exact match or namespace prefix
    pub fn is_protected(&self, code: &str) -> bool {
        let code = code.to_ascii_lowercase();
        self.codes.contains(&code) || self.prefixes.iter().any(|p| code.starts_with(p.as_str()))
    }

    /// Whether a record is protected, by flag or by code
    pub fn is_protected_record(&self, record: &ModuleRecord) -> bool {
        record.is_admin || self.is_protected(&record.code)
    }

    /// Pin a protected module to `active`
    pub fn enforce_module(&self, mut record: ModuleRecord) -> ModuleRecord {
        if self.is_protected_record(&record) {
            record.status = ModuleStatus::Active;
        }
        record
    }

    /// Pin a feature of a protected module to enabled.
    ///
    /// `owner_protected` covers owners protected only by their `is_admin` flag.
    pub fn enforce_feature(&self, mut record: FeatureRecord, owner_protected: bool) -> FeatureRecord {
        if owner_protected || self.is_protected(&record.module_code) {
            record.enabled = true;
        }
        record
    }

    /// Reject any write that would disable a protected unit.
    ///
    /// `code` is the module code (the owning module for feature writes).
    pub fn validate_write(
        &self,
        code: &str,
        owner_protected: bool,
        requested: RequestedValue,
    ) -> StatusResult<()> {
        let protected = owner_protected || self.is_protected(code);
        if protected && requested.disables() {
            let reason = match requested {
                RequestedValue::Status(status) => {
                    format!("protected module cannot be set to '{}'", status)
                }
                RequestedValue::Enabled(_) => {
                    "features of a protected module cannot be disabled".to_string()
                }
            };
            return Err(StatusError::violation(code, reason));
        }
        Ok(())
    }
}

impl Default for InvariantGuard {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> InvariantGuard {
        InvariantGuard::default()
    }

    #[test]
    fn test_reserved_code_and_prefix() {
        let guard = guard();
        assert!(guard.is_protected("admin"));
        assert!(guard.is_protected("ADMIN"));
        assert!(guard.is_protected("admin_users"));
        assert!(guard.is_protected("admin.audit"));
        assert!(!guard.is_protected("administrator"));
        assert!(!guard.is_protected("shop"));
    }

    #[test]
    fn test_enforce_module_by_code() {
        let record = ModuleRecord::new("1", "admin", ModuleStatus::Inactive);
        assert_eq!(guard().enforce_module(record).status, ModuleStatus::Active);
    }

    #[test]
    fn test_enforce_module_by_flag() {
        let record = ModuleRecord::new("2", "backoffice", ModuleStatus::Maintenance).admin();
        assert_eq!(guard().enforce_module(record).status, ModuleStatus::Active);
    }

    #[test]
    fn test_enforce_leaves_unprotected_alone() {
        let record = ModuleRecord::new("3", "shop", ModuleStatus::Inactive);
        assert_eq!(guard().enforce_module(record).status, ModuleStatus::Inactive);
    }

    #[test]
    fn test_enforce_feature() {
        let guard = guard();
        let f = FeatureRecord::new("admin", "users_management", false);
        assert!(guard.enforce_feature(f, false).enabled);

        let f = FeatureRecord::new("backoffice", "reports", false);
        assert!(guard.enforce_feature(f.clone(), true).enabled);
        assert!(!guard.enforce_feature(f, false).enabled);
    }

    #[test]
    fn test_validate_rejects_disable_of_protected() {
        let guard = guard();
        let err = guard
            .validate_write("admin", false, RequestedValue::Status(ModuleStatus::Inactive))
            .unwrap_err();
        assert!(matches!(err, StatusError::InvariantViolation { .. }));

        assert!(guard
            .validate_write("admin", false, RequestedValue::Enabled(false))
            .is_err());
        assert!(guard
            .validate_write("backoffice", true, RequestedValue::Status(ModuleStatus::Degraded))
            .is_err());
    }

    #[test]
    fn test_validate_accepts_enable_and_unprotected() {
        let guard = guard();
        assert!(guard
            .validate_write("admin", false, RequestedValue::Status(ModuleStatus::Active))
            .is_ok());
        assert!(guard
            .validate_write("admin", false, RequestedValue::Enabled(true))
            .is_ok());
        assert!(guard
            .validate_write("shop", false, RequestedValue::Status(ModuleStatus::Inactive))
            .is_ok());
    }
}
