//! Error Handling Infrastructure
//!
//! This module defines the error types used throughout pgsession.
//! Every error maps to a stable error code for JSON output and for the
//! last-error side channel read by UI collaborators.
//!
//! # Error Categories
//! - `CredentialsUnavailable`: No layer and no persisted settings to resolve credentials from
//! - `IncompleteCredentials`: One of host/port/database/user/password is missing
//! - `UiConnectionFailed`: The UI-bound handle could not be opened
//! - `DriverConnectionFailed`: The query handle could not be opened
//! - `QueryError`: A query returned nothing and the driver reported an error
//! - `StaleConnection`: The transport was silently closed and could not be recovered
//! - `ConfigError`: Configuration or settings file errors
//! - `InvalidInput`: Malformed input (descriptor strings, parameters)

use thiserror::Error;

/// Main error type for pgsession operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Neither a layer nor a settings profile could provide credentials
    #[error("Credentials unavailable: {0}")]
    CredentialsUnavailable(String),

    /// Required connection parameters are missing
    #[error("Incomplete credentials: {0}")]
    IncompleteCredentials(String),

    /// The UI-bound (table model) connection failed to open
    #[error("UI connection failed: {0}")]
    UiConnectionFailed(String),

    /// The query connection failed to open
    #[error("Driver connection failed: {0}")]
    DriverConnectionFailed(String),

    /// Query returned no rows and the driver reported an error
    #[error("Query error: {0}")]
    QueryError(String),

    /// Transport was closed and reconnecting failed
    #[error("Stale connection: {0}")]
    StaleConnection(String),

    /// Configuration error (file not found, invalid JSON, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SessionError {
    /// Convert error to error code string for JSON output
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::CredentialsUnavailable(_) => "CREDENTIALS_UNAVAILABLE",
            Self::IncompleteCredentials(_) => "INCOMPLETE_CREDENTIALS",
            Self::UiConnectionFailed(_) => "UI_CONNECTION_FAILED",
            Self::DriverConnectionFailed(_) => "DRIVER_CONNECTION_FAILED",
            Self::QueryError(_) => "QUERY_ERROR",
            Self::StaleConnection(_) => "STALE_CONNECTION",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::InvalidInput(_) => "INVALID_INPUT",
        }
    }

    /// Message without the category prefix, as stored in the last-error side channel
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::CredentialsUnavailable(m)
            | Self::IncompleteCredentials(m)
            | Self::UiConnectionFailed(m)
            | Self::DriverConnectionFailed(m)
            | Self::QueryError(m)
            | Self::StaleConnection(m)
            | Self::ConfigError(m)
            | Self::InvalidInput(m) => m,
        }
    }

    /// Get human-readable error message
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn credentials_unavailable(message: impl Into<String>) -> Self {
        Self::CredentialsUnavailable(message.into())
    }

    pub fn incomplete_credentials(message: impl Into<String>) -> Self {
        Self::IncompleteCredentials(message.into())
    }

    pub fn ui_connection_failed(message: impl Into<String>) -> Self {
        Self::UiConnectionFailed(message.into())
    }

    pub fn driver_connection_failed(message: impl Into<String>) -> Self {
        Self::DriverConnectionFailed(message.into())
    }

    pub fn query_error(message: impl Into<String>) -> Self {
        Self::QueryError(message.into())
    }

    pub fn stale_connection(message: impl Into<String>) -> Self {
        Self::StaleConnection(message.into())
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

/// Error reported by a database driver (the "database text" of the failure)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DriverError {
    pub message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Result type alias for pgsession operations
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SessionError::credentials_unavailable("x").error_code(), "CREDENTIALS_UNAVAILABLE");
        assert_eq!(SessionError::incomplete_credentials("x").error_code(), "INCOMPLETE_CREDENTIALS");
        assert_eq!(SessionError::ui_connection_failed("x").error_code(), "UI_CONNECTION_FAILED");
        assert_eq!(
            SessionError::driver_connection_failed("x").error_code(),
            "DRIVER_CONNECTION_FAILED"
        );
        assert_eq!(SessionError::query_error("x").error_code(), "QUERY_ERROR");
        assert_eq!(SessionError::stale_connection("x").error_code(), "STALE_CONNECTION");
        assert_eq!(SessionError::config_error("x").error_code(), "CONFIG_ERROR");
        assert_eq!(SessionError::invalid_input("x").error_code(), "INVALID_INPUT");
    }

    #[test]
    fn test_detail_strips_category() {
        let err = SessionError::credentials_unavailable("Layer not found: 'v_edit_node'");
        assert_eq!(err.detail(), "Layer not found: 'v_edit_node'");
        assert!(err.message().starts_with("Credentials unavailable"));
    }

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::new("relation \"foo\" does not exist");
        assert_eq!(err.to_string(), "relation \"foo\" does not exist");
    }
}
