//! Error Reporting Seam
//!
//! Query-phase failures are surfaced to the user through an [`ErrorReporter`].
//! A GUI host shows a dialog; the CLI and tests use [`TracingReporter`], which
//! only logs.
//!
//! Some driver errors are transport noise that users cannot act on
//! ([`should_show_exception`]); they are still logged and recorded.

use tracing::{info, warn};

/// Title used for database error reports
pub const DB_ERROR_TITLE: &str = "Database error";

/// Fragments of driver errors that are never shown to the user
const NOISE_ERRORS: &[&str] = &[
    "unknown error",
    "server closed the connection unexpectedly",
    "message contents do not agree with length in message",
    "unexpected field count in",
];

/// Receiver of user-facing error and warning messages
pub trait ErrorReporter: Send + Sync {
    /// Show a formatted database error
    fn show_db_exception(&self, title: &str, message: &str);

    /// Show a non-fatal warning
    fn show_warning(&self, message: &str);

    /// Show an informational message
    fn show_info(&self, message: &str) {
        info!(message, "info message");
    }
}

/// Reporter that writes everything to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn show_db_exception(&self, title: &str, message: &str) {
        warn!(title, "{message}");
    }

    fn show_warning(&self, message: &str) {
        warn!("{message}");
    }
}

/// Whether a driver error description should reach the user
#[must_use]
pub fn should_show_exception(description: &str) -> bool {
    if description.is_empty() {
        return true;
    }
    if NOISE_ERRORS.iter().any(|noise| description.contains(noise)) {
        return false;
    }
    !(description.contains("server sent data")
        && description.contains("without prior row description"))
}

/// Context of a failed query, rendered by [`build_exception_message`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ExceptionContext<'a> {
    /// Façade operation that failed (`get_row`, `execute`, ...)
    pub function: &'a str,
    pub description: Option<&'a str>,
    /// SQL script the statement was read from
    pub filepath: Option<&'a str>,
    pub sql: Option<&'a str>,
    pub schema_name: Option<&'a str>,
}

/// Format the message stored in `last_error_msg` and shown to the user
#[must_use]
pub fn build_exception_message(ctx: &ExceptionContext<'_>) -> String {
    let mut msg = format!("Function name: {}\n", ctx.function);
    if let Some(description) = ctx.description {
        msg.push_str(&format!("Description:\n{description}\n"));
    }
    if let Some(filepath) = ctx.filepath {
        msg.push_str(&format!("SQL File:\n{filepath}\n\n"));
    }
    if let Some(sql) = ctx.sql {
        msg.push_str(&format!("SQL:\n {sql}\n\n"));
    }
    msg.push_str(&format!("Schema name: {}", ctx.schema_name.unwrap_or("None")));
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_noise_errors_hidden() {
        assert!(!should_show_exception("server closed the connection unexpectedly\n\tThis probably means"));
        assert!(!should_show_exception("unexpected field count in \"D\" message"));
        assert!(!should_show_exception("server sent data (\"D\" message) without prior row description"));
        assert!(should_show_exception("server sent data"));
        assert!(should_show_exception("relation \"ws.node\" does not exist"));
        assert!(should_show_exception(""));
    }

    #[test]
    fn test_build_exception_message() {
        let msg = build_exception_message(&ExceptionContext {
            function: "get_row",
            description: Some("syntax error at or near \"SELEC\""),
            filepath: None,
            sql: Some("SELEC 1"),
            schema_name: Some("ws"),
        });
        assert_eq!(
            msg,
            "Function name: get_row\nDescription:\nsyntax error at or near \"SELEC\"\nSQL:\n SELEC 1\n\nSchema name: ws"
        );
    }

    #[test]
    fn test_build_exception_message_with_file() {
        let msg = build_exception_message(&ExceptionContext {
            function: "execute",
            filepath: Some("ddl/01_schema.sql"),
            ..ExceptionContext::default()
        });
        assert!(msg.contains("SQL File:\nddl/01_schema.sql\n\n"));
        assert!(msg.ends_with("Schema name: None"));
    }
}
