//! # Module Records

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::StatusError;

/// Operational status of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    /// Fully available
    Active,
    /// Switched off
    Inactive,
    /// Available with reduced capability
    Degraded,
    /// Temporarily switched off for maintenance
    Maintenance,
}

impl ModuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleStatus::Active => "active",
            ModuleStatus::Inactive => "inactive",
            ModuleStatus::Degraded => "degraded",
            ModuleStatus::Maintenance => "maintenance",
        }
    }

    /// Whether callers may use the module.
    ///
    /// Degraded modules stay usable; their reduced state is reported
    /// separately through `is_module_degraded`.
    pub fn is_usable(&self) -> bool {
        matches!(self, ModuleStatus::Active | ModuleStatus::Degraded)
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ModuleStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(ModuleStatus::Active),
            "inactive" => Ok(ModuleStatus::Inactive),
            "degraded" => Ok(ModuleStatus::Degraded),
            "maintenance" => Ok(ModuleStatus::Maintenance),
            other => Err(StatusError::Serialization(format!(
                "unknown module status '{}'",
                other
            ))),
        }
    }
}

/// A module as stored by the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    /// Storage-layer identifier, used only for writes
    pub id: String,

    /// Stable lookup key
    pub code: String,

    /// Display name
    pub name: String,

    pub status: ModuleStatus,

    /// Part of the application core
    #[serde(default)]
    pub is_core: bool,

    /// Administrative module; always resolves active
    #[serde(default)]
    pub is_admin: bool,

    #[serde(default)]
    pub version: String,

    /// Ordering hint for menus
    #[serde(default)]
    pub priority: i32,

    pub updated_at: DateTime<Utc>,
}

impl ModuleRecord {
    /// Create a record with defaults for the optional fields
    pub fn new(id: impl Into<String>, code: impl Into<String>, status: ModuleStatus) -> Self {
        let code = code.into();
        Self {
            id: id.into(),
            name: code.clone(),
            code,
            status,
            is_core: false,
            is_admin: false,
            version: "1.0.0".to_string(),
            priority: 0,
            updated_at: Utc::now(),
        }
    }

    /// Mark the record administrative
    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serde_lowercase() {
        let json = serde_json::to_string(&ModuleStatus::Maintenance).unwrap();
        assert_eq!(json, "\"maintenance\"");

        let status: ModuleStatus = serde_json::from_str("\"degraded\"").unwrap();
        assert_eq!(status, ModuleStatus::Degraded);
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("Active".parse::<ModuleStatus>().unwrap(), ModuleStatus::Active);
        assert!("enabled".parse::<ModuleStatus>().is_err());
    }

    #[test]
    fn test_usable_statuses() {
        assert!(ModuleStatus::Active.is_usable());
        assert!(ModuleStatus::Degraded.is_usable());
        assert!(!ModuleStatus::Inactive.is_usable());
        assert!(!ModuleStatus::Maintenance.is_usable());
    }

    #[test]
    fn test_record_optional_fields_default() {
        let json = r#"{
            "id": "7f1c",
            "code": "shop",
            "name": "Shop",
            "status": "active",
            "updated_at": "2025-01-01T00:00:00Z"
        }"#;
        let record: ModuleRecord = serde_json::from_str(json).unwrap();
        assert!(!record.is_admin);
        assert_eq!(record.priority, 0);
    }
}
