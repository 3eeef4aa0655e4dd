//! Database Driver Seams and Core Types
//!
//! A connection session drives two independent handles to the same database:
//! - a UI-bound handle, registered by name in a [`UiRegistry`] and used to back table views
//! - a query handle, opened through a [`QueryBackend`] and used for direct SQL
//!
//! Both are traits so the orchestrator can be exercised without a server.
//! The `postgres` module implements them on `tokio-postgres`.

use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::credentials::layer::quote_value;
use crate::credentials::{Credentials, SslMode};
use crate::error::{DriverError, Result, SessionError};

#[cfg(feature = "postgres")]
pub mod postgres;

/// One result row, each column converted to JSON
pub type Row = Vec<serde_json::Value>;

/// How a handle reaches the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectParams {
    /// Explicit host/port parameters
    Host {
        host: String,
        port: u16,
        dbname: String,
        user: String,
        /// WARNING: Sensitive data, do not log or include in error messages
        password: String,
        sslmode: Option<SslMode>,
    },
    /// Raw libpq-style option string (`service='name' sslmode=require`)
    Options(String),
}

impl ConnectParams {
    /// Host parameters from complete credentials
    pub fn from_credentials(credentials: &Credentials) -> Result<Self> {
        let missing = credentials.missing_fields();
        if !missing.is_empty() {
            return Err(SessionError::incomplete_credentials(format!(
                "Database connection error. Please check your connection parameters (missing: {})",
                missing.join(", ")
            )));
        }

        match credentials {
            Credentials {
                host: Some(host),
                port: Some(port),
                db: Some(dbname),
                user: Some(user),
                password: Some(password),
                sslmode,
                ..
            } => Ok(Self::Host {
                host: host.clone(),
                port: *port,
                dbname: dbname.clone(),
                user: user.clone(),
                password: password.clone(),
                sslmode: *sslmode,
            }),
            _ => Err(SessionError::incomplete_credentials(
                "Database connection error. Please check your connection parameters",
            )),
        }
    }

    /// Option string naming a service
    #[must_use]
    pub fn service(service: &str, sslmode: Option<SslMode>) -> Self {
        let mut options = format!("service='{service}'");
        if let Some(mode) = sslmode {
            options.push_str(&format!(" sslmode={mode}"));
        }
        Self::Options(options)
    }

    /// libpq keyword/value form
    #[must_use]
    pub fn to_conninfo(&self) -> String {
        match self {
            Self::Host { host, port, dbname, user, password, sslmode } => {
                let mut parts = vec![
                    format!("host={}", quote_value(host)),
                    format!("port={port}"),
                    format!("dbname={}", quote_value(dbname)),
                    format!("user={}", quote_value(user)),
                    format!("password={}", quote_value(password)),
                ];
                if let Some(mode) = sslmode {
                    parts.push(format!("sslmode={mode}"));
                }
                parts.join(" ")
            }
            Self::Options(options) => options.clone(),
        }
    }
}

/// A query parameter rendered into SQL by [`render_params`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlParam {
    /// SQL literal for this value
    #[must_use]
    pub fn to_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) if f.is_finite() => f.to_string(),
            Self::Float(f) => format!("'{f}'::float8"),
            Self::Text(s) => quote_literal(s),
        }
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for SqlParam {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for SqlParam {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for SqlParam {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Quote a string as a SQL literal
///
/// Strings containing backslashes use the `E''` form so the result is safe
/// whatever `standard_conforming_strings` is set to.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    if escaped.contains('\\') {
        format!("E'{}'", escaped.replace('\\', "\\\\"))
    } else {
        format!("'{escaped}'")
    }
}

/// Substitute `%s` placeholders with quoted literals
///
/// `%%` renders a literal `%`. The number of placeholders must match `params`.
pub fn render_params(sql: &str, params: &[SqlParam]) -> std::result::Result<String, DriverError> {
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut params_iter = params.iter();
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('s') => {
                let param = params_iter.next().ok_or_else(|| {
                    DriverError::new("not enough parameters for SQL placeholders")
                })?;
                out.push_str(&param.to_literal());
            }
            Some('%') => out.push('%'),
            Some(other) => {
                return Err(DriverError::new(format!("unsupported placeholder '%{other}'")));
            }
            None => return Err(DriverError::new("incomplete placeholder at end of SQL")),
        }
    }

    if params_iter.next().is_some() {
        return Err(DriverError::new("not all parameters were used in the SQL statement"));
    }

    Ok(out)
}

/// Result of a query run on the UI-bound handle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableModel {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Driver error text, if the query failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Named registry of UI-bound connections
///
/// Registering a name that already exists is rejected; callers remove the
/// old entry first.
pub trait UiRegistry {
    /// Register `name` with connection parameters, without opening it
    fn add_database(
        &mut self,
        name: &str,
        params: ConnectParams,
    ) -> std::result::Result<(), DriverError>;

    /// Drop `name` and close its connection
    fn remove_database(&mut self, name: &str);

    fn contains(&self, name: &str) -> bool;

    /// Open the connection registered as `name`
    fn open(
        &mut self,
        name: &str,
    ) -> impl Future<Output = std::result::Result<(), DriverError>> + Send;

    /// Whether `name` has a live connection
    fn is_open(&self, name: &str) -> bool;

    /// Run `sql` on `name` and collect a table model
    fn query_model(&mut self, name: &str, sql: &str) -> impl Future<Output = TableModel> + Send;
}

/// Factory for query connections
pub trait QueryBackend {
    type Connection: QueryConnection;

    fn connect(
        &self,
        params: &ConnectParams,
    ) -> impl Future<Output = std::result::Result<Self::Connection, DriverError>> + Send;
}

/// Direct SQL execution on one server process
pub trait QueryConnection: Send {
    /// Backend process id, for diagnostics and cancellation
    fn pid(&self) -> Option<i32>;

    /// Reconnect if the transport was closed; returns whether it had been closed
    fn check_connection(
        &mut self,
    ) -> impl Future<Output = std::result::Result<bool, DriverError>> + Send;

    fn get_row(
        &mut self,
        sql: &str,
    ) -> impl Future<Output = std::result::Result<Option<Row>, DriverError>> + Send;

    fn get_rows(
        &mut self,
        sql: &str,
    ) -> impl Future<Output = std::result::Result<Vec<Row>, DriverError>> + Send;

    /// Execute a statement, returning affected rows
    fn execute(
        &mut self,
        sql: &str,
    ) -> impl Future<Output = std::result::Result<u64, DriverError>> + Send;

    /// Execute a statement with `RETURNING`, yielding its first row
    fn execute_returning(
        &mut self,
        sql: &str,
    ) -> impl Future<Output = std::result::Result<Option<Row>, DriverError>> + Send;

    /// Cancel the backend running as `pid`
    fn cancel_backend(
        &mut self,
        pid: i32,
    ) -> impl Future<Output = std::result::Result<bool, DriverError>> + Send;

    /// Render parameters into `sql`
    fn mogrify(&self, sql: &str, params: &[SqlParam]) -> std::result::Result<String, DriverError> {
        render_params(sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_params_quotes_values() {
        let sql = render_params(
            "SELECT * FROM pg_tables WHERE schemaname = %s AND tablename = %s",
            &["ws".into(), "it's".into()],
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM pg_tables WHERE schemaname = 'ws' AND tablename = 'it''s'");
    }

    #[test]
    fn test_render_params_percent_escape_and_types() {
        let sql = render_params(
            "SELECT %s, %s, %s WHERE name LIKE 'a%%'",
            &[SqlParam::Null, 7.into(), true.into()],
        )
        .unwrap();
        assert_eq!(sql, "SELECT NULL, 7, true WHERE name LIKE 'a%'");
    }

    #[test]
    fn test_render_params_count_mismatch() {
        assert!(render_params("SELECT %s", &[]).is_err());
        assert!(render_params("SELECT 1", &["x".into()]).is_err());
        assert!(render_params("SELECT 1 %", &[]).is_err());
        assert!(render_params("SELECT %d", &[1.into()]).is_err());
    }

    #[test]
    fn test_quote_literal_backslash() {
        assert_eq!(quote_literal(r"a\b"), r"E'a\\b'");
        assert_eq!(quote_literal("plain"), "'plain'");
    }

    #[test]
    fn test_connect_params_from_incomplete_credentials() {
        let creds = Credentials { host: Some("h".into()), ..Default::default() };
        let err = ConnectParams::from_credentials(&creds).unwrap_err();
        assert_eq!(err.error_code(), "INCOMPLETE_CREDENTIALS");
    }

    #[test]
    fn test_connect_params_conninfo() {
        let mut creds = Credentials::new("db1", 5432, "gis water", "u", "p");
        creds.sslmode = Some(SslMode::Require);
        let params = ConnectParams::from_credentials(&creds).unwrap();
        assert_eq!(
            params.to_conninfo(),
            "host=db1 port=5432 dbname='gis water' user=u password=p sslmode=require"
        );
    }

    #[test]
    fn test_service_params() {
        assert_eq!(
            ConnectParams::service("gw", Some(SslMode::Disable)),
            ConnectParams::Options("service='gw' sslmode=disable".into())
        );
        assert_eq!(ConnectParams::service("gw", None).to_conninfo(), "service='gw'");
    }
}
