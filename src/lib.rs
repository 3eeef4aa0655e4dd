//! pgsession - PostgreSQL connection lifecycle for GIS desktop plugins
//!
//! pgsession resolves database credentials from a project layer, persisted
//! connection settings or `pg_service.conf`, and keeps two handles to the
//! database consistent: a UI-bound handle backing table views and a query
//! handle for direct SQL.
//!
//! # Core Principles
//! - One owner for both handles ([`ConnectionSession`]); no process-global state
//! - Connection errors are returned, and mirrored into the session's `last_error`
//! - Query errors go through a side channel and an injected [`ErrorReporter`]
//! - Stale transports are detected before every query and reported as a typed
//!   [`ReconnectStatus`]
//!
//! # Module Organization
//! - [`error`] - Error types and handling
//! - [`output`] - JSON output envelope types for the CLI
//! - [`credentials`] - Credential sources and resolution
//! - [`config`] - Session configuration and persisted connection settings
//! - [`engine`] - Driver seams and the PostgreSQL driver
//! - [`session`] - Connection orchestrator, query façade and catalog helpers
//! - [`report`] - Error reporting seam

pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod output;
pub mod report;
pub mod session;

// Re-export commonly used types for convenience
pub use config::SessionConfig;
pub use credentials::resolve::{resolve_credentials, CredentialOrigin, ResolvedCredentials};
pub use credentials::{Credentials, CredentialsProvider, Login, SslMode};
pub use engine::{ConnectParams, QueryBackend, QueryConnection, Row, SqlParam, TableModel, UiRegistry};
pub use error::{DriverError, Result, SessionError};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use report::{ErrorReporter, TracingReporter};
pub use session::{ConnectOutcome, ConnectionSession, QueryOptions, ReconnectStatus, SessionState};
