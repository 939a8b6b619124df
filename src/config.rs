//! Engine configuration.
//!
//! Loaded from a JSON file (all fields optional) or built in code from
//! [`EngineConfig::default`].

use std::fs;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{StatusError, StatusResult};
use crate::observability::Severity;

/// Status engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scope shared by contexts that see the same durable store and broadcasts
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Namespace for durable keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// TTL of resolved booleans (verification cache)
    #[serde(default = "default_status_check_ttl_ms")]
    pub status_check_ttl_ms: u64,

    /// TTL of records held in memory
    #[serde(default = "default_memory_ttl_ms")]
    pub memory_ttl_ms: u64,

    /// TTL of records held in durable storage
    #[serde(default = "default_durable_ttl_ms")]
    pub durable_ttl_ms: u64,

    /// Durable snapshots older than this are ignored at boot
    #[serde(default = "default_max_boot_age_ms")]
    pub max_boot_age_ms: u64,

    /// Background refresh period
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// First retry delay while degraded
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Retry delay cap while degraded
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    /// Size bound for a single durable value
    #[serde(default = "default_durable_max_bytes")]
    pub durable_max_bytes: usize,

    /// Module codes that always resolve active
    #[serde(default = "default_protected_codes")]
    pub protected_codes: Vec<String>,

    /// Namespace prefixes that always resolve active
    #[serde(default = "default_protected_prefixes")]
    pub protected_prefixes: Vec<String>,

    /// Value reported for codes that are not loaded yet or unknown
    #[serde(default = "default_unknown_default")]
    pub unknown_default: bool,

    /// Minimum log severity ("trace", "info", "warn", "error")
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_origin() -> String {
    "default".to_string()
}
fn default_key_prefix() -> String {
    "modgate".to_string()
}
fn default_status_check_ttl_ms() -> u64 {
    5_000
}
fn default_memory_ttl_ms() -> u64 {
    45_000
}
fn default_durable_ttl_ms() -> u64 {
    600_000
} // 10 minutes
fn default_max_boot_age_ms() -> u64 {
    86_400_000
} // 24 hours
fn default_refresh_interval_ms() -> u64 {
    300_000
} // 5 minutes
fn default_retry_base_ms() -> u64 {
    1_000
}
fn default_retry_max_ms() -> u64 {
    60_000
}
fn default_durable_max_bytes() -> usize {
    5 * 1024 * 1024
}
fn default_protected_codes() -> Vec<String> {
    vec!["admin".to_string()]
}
fn default_protected_prefixes() -> Vec<String> {
    vec!["admin_".to_string(), "admin.".to_string()]
}
fn default_unknown_default() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            key_prefix: default_key_prefix(),
            status_check_ttl_ms: default_status_check_ttl_ms(),
            memory_ttl_ms: default_memory_ttl_ms(),
            durable_ttl_ms: default_durable_ttl_ms(),
            max_boot_age_ms: default_max_boot_age_ms(),
            refresh_interval_ms: default_refresh_interval_ms(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
            durable_max_bytes: default_durable_max_bytes(),
            protected_codes: default_protected_codes(),
            protected_prefixes: default_protected_prefixes(),
            unknown_default: default_unknown_default(),
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> StatusResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| StatusError::Config(format!("Failed to read config: {}", e)))?;

        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| StatusError::Config(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Check TTL ordering and policy fields
    pub fn validate(&self) -> StatusResult<()> {
        if self.status_check_ttl_ms == 0 || self.memory_ttl_ms == 0 || self.durable_ttl_ms == 0 {
            return Err(StatusError::Config("TTLs must be > 0".into()));
        }

        if self.status_check_ttl_ms > self.memory_ttl_ms {
            return Err(StatusError::Config(
                "status_check_ttl_ms must not exceed memory_ttl_ms".into(),
            ));
        }

        if self.memory_ttl_ms > self.durable_ttl_ms {
            return Err(StatusError::Config(
                "memory_ttl_ms must not exceed durable_ttl_ms".into(),
            ));
        }

        if self.retry_base_ms == 0 || self.retry_base_ms > self.retry_max_ms {
            return Err(StatusError::Config(
                "retry_base_ms must be > 0 and not exceed retry_max_ms".into(),
            ));
        }

        if self.refresh_interval_ms == 0 {
            return Err(StatusError::Config("refresh_interval_ms must be > 0".into()));
        }

        if self.protected_prefixes.iter().any(|p| p.is_empty()) {
            return Err(StatusError::Config(
                "protected_prefixes must not contain an empty prefix".into(),
            ));
        }

        if self.origin.is_empty() || self.key_prefix.is_empty() {
            return Err(StatusError::Config(
                "origin and key_prefix must not be empty".into(),
            ));
        }

        self.severity()?;

        Ok(())
    }

    /// Parsed minimum log severity
    pub fn severity(&self) -> StatusResult<Severity> {
        Severity::parse(&self.log_level).ok_or_else(|| {
            StatusError::Config(format!("Invalid log_level: '{}'", self.log_level))
        })
    }

    pub fn status_check_ttl(&self) -> Duration {
        Duration::milliseconds(self.status_check_ttl_ms as i64)
    }

    pub fn memory_ttl(&self) -> Duration {
        Duration::milliseconds(self.memory_ttl_ms as i64)
    }

    pub fn durable_ttl(&self) -> Duration {
        Duration::milliseconds(self.durable_ttl_ms as i64)
    }

    pub fn max_boot_age(&self) -> Duration {
        Duration::milliseconds(self.max_boot_age_ms as i64)
    }

    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.refresh_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.unknown_default);
        assert_eq!(config.protected_codes, vec!["admin"]);
    }

    #[test]
    fn test_ttl_ordering_enforced() {
        let config = EngineConfig {
            status_check_ttl_ms: 90_000,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(StatusError::Config(_))));

        let config = EngineConfig {
            memory_ttl_ms: 900_000,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let config = EngineConfig {
            protected_prefixes: vec![String::new()],
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let config = EngineConfig {
            log_level: "loud".into(),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("modgate.json");
        fs::write(&path, r#"{"origin": "app.example", "memory_ttl_ms": 30000}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.origin, "app.example");
        assert_eq!(config.memory_ttl_ms, 30_000);
        assert_eq!(config.durable_ttl_ms, 600_000);
    }

    #[test]
    fn test_load_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("modgate.json");
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(EngineConfig::load(&path), Err(StatusError::Config(_))));
    }
}
