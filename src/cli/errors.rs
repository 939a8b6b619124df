//! CLI-specific error types

use std::fmt;
use std::io;

use crate::errors::StatusError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// I/O error (stdout, data directory)
    IoError,
    /// Already initialized
    AlreadyInitialized,
    /// Not initialized
    NotInitialized,
    /// Engine refused or failed the operation
    EngineError,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "MODGATE_CLI_CONFIG_ERROR",
            Self::IoError => "MODGATE_CLI_IO_ERROR",
            Self::AlreadyInitialized => "MODGATE_CLI_ALREADY_INITIALIZED",
            Self::NotInitialized => "MODGATE_CLI_NOT_INITIALIZED",
            Self::EngineError => "MODGATE_CLI_ENGINE_ERROR",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
    /// Engine error code, when the failure came from the engine
    engine_code: Option<&'static str>,
}

impl CliError {
    /// Create a new CLI error
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            engine_code: None,
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn already_initialized() -> Self {
        Self::new(
            CliErrorCode::AlreadyInitialized,
            "Data directory already initialized",
        )
    }

    pub fn not_initialized() -> Self {
        Self::new(
            CliErrorCode::NotInitialized,
            "Data directory not initialized. Run 'modgate init' first.",
        )
    }

    /// Get the error code
    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    /// Engine code if present, else the CLI code
    pub fn code_str(&self) -> &'static str {
        self.engine_code.unwrap_or_else(|| self.code.code())
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<StatusError> for CliError {
    fn from(e: StatusError) -> Self {
        let code = match e {
            StatusError::Config(_) => CliErrorCode::ConfigError,
            _ => CliErrorCode::EngineError,
        };
        Self {
            code,
            message: e.to_string(),
            engine_code: Some(e.code()),
        }
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_code_preferred() {
        let err = CliError::from(StatusError::Degraded);
        assert_eq!(err.code(), &CliErrorCode::EngineError);
        assert_eq!(err.code_str(), StatusError::Degraded.code());
        assert!(err.to_string().starts_with("MODGATE_"));
    }

    #[test]
    fn test_plain_cli_error() {
        let err = CliError::not_initialized();
        assert_eq!(err.code_str(), "MODGATE_CLI_NOT_INITIALIZED");
    }
}
