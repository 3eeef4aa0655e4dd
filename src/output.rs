//! CLI envelopes
//!
//! Every CLI command prints exactly one envelope on stdout:
//! - Success: `{"ok": true, "command": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "command": "...", "error": {"code": "...", "message": "..."}}`
//!
//! Passwords never appear in envelopes.

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Envelope of a command that succeeded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// `true`
    pub ok: bool,

    /// Command that was executed (resolve, connect, query, service)
    pub command: String,

    /// Command-specific data
    pub data: T,

    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(command: impl Into<String>, data: T, meta: Metadata) -> Self {
        Self { ok: true, command: command.into(), data, meta }
    }
}

/// Error envelope for command failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// `false`
    pub ok: bool,

    pub command: String,

    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(command: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, command: command.into(), error }
    }

    /// Create error envelope from a [`SessionError`]
    pub fn from_error(command: impl Into<String>, err: &SessionError) -> Self {
        Self::new(
            command,
            ErrorInfo { code: err.error_code().to_string(), message: err.message() },
        )
    }
}

/// Code and message of a failed command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "CREDENTIALS_UNAVAILABLE")
    pub code: String,

    /// Human-readable error message, without credentials
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

/// Timing and connection details attached to every success
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Wall time of the whole command, including connecting
    pub execution_ms: u64,

    /// Number of rows returned (query results only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_returned: Option<usize>,

    /// Backend process id of the query connection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
}

impl Metadata {
    #[must_use]
    pub const fn new(execution_ms: u64) -> Self {
        Self { execution_ms, rows_returned: None, pid: None }
    }

    #[must_use]
    pub const fn with_rows(mut self, rows_returned: usize) -> Self {
        self.rows_returned = Some(rows_returned);
        self
    }

    #[must_use]
    pub const fn with_pid(mut self, pid: Option<i32>) -> Self {
        self.pid = pid;
        self
    }
}
