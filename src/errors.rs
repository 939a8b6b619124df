//! # Status Errors
//!
//! Error types for the status engine.
//!
//! No error here is fatal: read paths degrade to stale or default data,
//! write paths report the failure to their caller.

use thiserror::Error;

/// Result type for status engine operations
pub type StatusResult<T> = Result<T, StatusError>;

/// Status engine errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    // ==================
    // Remote Errors
    // ==================
    /// Remote store unreachable, timed out, or refused the operation
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    /// Write refused locally because the engine is running on stale cache
    #[error("Engine is degraded; writes are refused until the remote store recovers")]
    Degraded,

    // ==================
    // Policy Errors
    // ==================
    /// Attempted to disable a protected module or feature
    #[error("Invariant violation on '{code}': {reason}")]
    InvariantViolation { code: String, reason: String },

    // ==================
    // Lookup Errors
    // ==================
    /// Unknown module or feature
    #[error("Not found: {0}")]
    NotFound(String),

    // ==================
    // Storage Errors
    // ==================
    /// Corrupt or unserializable payload
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Durable value exceeds the per-key size bound
    #[error("Durable value for '{key}' is {bytes} bytes (limit: {limit})")]
    StorageQuota { key: String, bytes: usize, limit: usize },

    /// Durable store I/O failure
    #[error("Storage error: {0}")]
    Storage(String),

    // ==================
    // Internal Errors
    // ==================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StatusError {
    /// Create a remote failure
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::RemoteUnavailable(msg.into())
    }

    /// Create an invariant violation
    pub fn violation(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvariantViolation {
            code: code.into(),
            reason: reason.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::RemoteUnavailable(_) => "MODGATE_REMOTE_UNAVAILABLE",
            Self::Degraded => "MODGATE_DEGRADED",
            Self::InvariantViolation { .. } => "MODGATE_INVARIANT_VIOLATION",
            Self::NotFound(_) => "MODGATE_NOT_FOUND",
            Self::Serialization(_) => "MODGATE_SERIALIZATION",
            Self::StorageQuota { .. } => "MODGATE_STORAGE_QUOTA",
            Self::Storage(_) => "MODGATE_STORAGE",
            Self::Config(_) => "MODGATE_CONFIG",
            Self::Internal(_) => "MODGATE_INTERNAL",
        }
    }

    /// Whether a later attempt may succeed.
    ///
    /// Invariant violations are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteUnavailable(_) | Self::Degraded)
    }
}

impl From<serde_json::Error> for StatusError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for StatusError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            StatusError::remote("timeout").code(),
            "MODGATE_REMOTE_UNAVAILABLE"
        );
        assert_eq!(
            StatusError::violation("admin", "protected").code(),
            "MODGATE_INVARIANT_VIOLATION"
        );
        assert_eq!(StatusError::Degraded.code(), "MODGATE_DEGRADED");
    }

    #[test]
    fn test_invariant_violation_not_retryable() {
        assert!(!StatusError::violation("admin", "protected").is_retryable());
        assert!(StatusError::remote("down").is_retryable());
        assert!(!StatusError::not_found("shop").is_retryable());
    }

    #[test]
    fn test_json_error_converts_to_serialization() {
        let err: StatusError = serde_json::from_str::<u32>("{").unwrap_err().into();
        assert!(matches!(err, StatusError::Serialization(_)));
    }
}
