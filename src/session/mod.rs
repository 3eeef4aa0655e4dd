//! Connection Session
//!
//! [`ConnectionSession`] is the single owner of everything a plugin needs to
//! talk to its database:
//! - the UI-bound handle, registered under `plugin_name` in a [`UiRegistry`]
//! - the query handle, opened through a [`QueryBackend`]
//! - the credentials used for the last successful connection, for resets
//! - the [`SessionState`] read by UI collaborators
//!
//! Both handles are opened, reset and closed together. Connection failures
//! are returned as [`SessionError`]s and mirrored into `last_error`.
//!
//! The query façade lives in [`query`], catalog helpers in [`catalog`].

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::settings::SettingsStore;
use crate::config::SessionConfig;
use crate::credentials::layer::Project;
use crate::credentials::resolve::{resolve_credentials, CredentialOrigin, CredentialSources};
use crate::credentials::service_file::ServiceFileLocator;
use crate::credentials::uri::DataSourceUri;
use crate::credentials::{Credentials, CredentialsProvider, MemoryCredentials};
use crate::engine::{ConnectParams, QueryBackend, QueryConnection, Row, SqlParam, TableModel, UiRegistry};
use crate::error::{DriverError, Result, SessionError};
use crate::report::{ErrorReporter, TracingReporter};

pub mod catalog;
pub mod query;
pub mod state;

pub use query::QueryOptions;
pub use state::SessionState;

const BROKEN_CONNECTION: &str = "The connection to the database is broken.";

/// Outcome of [`ConnectionSession::check_connection`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum ReconnectStatus {
    /// Transport was open; nothing was touched
    StillOpen,
    /// Transport had been closed; both handles were reopened
    Reconnected,
    /// No usable handle, or reopening failed
    ReconnectFailed(String),
}

/// Result of [`ConnectionSession::set_database_connection`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectOutcome {
    pub logged: bool,
    /// Credentials came from settings, so no project version is known
    pub not_version: bool,
    pub credentials: Credentials,
}

/// Query connection plus the error of its last operation
pub struct QueryHandle<C> {
    conn: C,
    last_error: Option<String>,
    pid: Option<i32>,
    /// `SET search_path` statement replayed after a reconnect
    search_path: Option<String>,
}

impl<C: QueryConnection> QueryHandle<C> {
    fn new(conn: C) -> Self {
        let pid = conn.pid();
        Self { conn, last_error: None, pid, search_path: None }
    }

    #[must_use]
    pub const fn pid(&self) -> Option<i32> {
        self.pid
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[must_use]
    pub const fn connection(&self) -> &C {
        &self.conn
    }

    fn record<T>(&mut self, result: std::result::Result<T, DriverError>) -> Option<T> {
        match result {
            Ok(value) => {
                self.last_error = None;
                Some(value)
            }
            Err(e) => {
                self.last_error = Some(e.message);
                None
            }
        }
    }

    fn mogrify(&mut self, sql: &str, params: &[SqlParam]) -> Option<String> {
        let result = self.conn.mogrify(sql, params);
        self.record(result)
    }

    async fn get_row(&mut self, sql: &str) -> Option<Row> {
        let result = self.conn.get_row(sql).await;
        self.record(result).flatten()
    }

    async fn get_rows(&mut self, sql: &str) -> Option<Vec<Row>> {
        let result = self.conn.get_rows(sql).await;
        self.record(result)
    }

    async fn execute(&mut self, sql: &str) -> bool {
        let result = self.conn.execute(sql).await;
        self.record(result).is_some()
    }

    async fn execute_returning(&mut self, sql: &str) -> Option<Row> {
        let result = self.conn.execute_returning(sql).await;
        self.record(result).flatten()
    }

    async fn cancel(&mut self, pid: i32) -> bool {
        let result = self.conn.cancel_backend(pid).await;
        self.record(result).unwrap_or(false)
    }
}

/// Owner of both database handles and the session state
pub struct ConnectionSession<U, B: QueryBackend> {
    config: SessionConfig,
    ui: U,
    backend: B,
    query: Option<QueryHandle<B::Connection>>,
    /// Parameters of the last successful connection
    last_params: Option<ConnectParams>,
    /// Credentials of the last successful connection
    credentials: Option<Credentials>,
    state: SessionState,
    services: ServiceFileLocator,
    provider: Box<dyn CredentialsProvider + Send>,
    reporter: Arc<dyn ErrorReporter>,
}

impl<U: UiRegistry, B: QueryBackend> ConnectionSession<U, B> {
    /// New disconnected session
    ///
    /// Service files come from the environment, logins from an empty
    /// in-memory provider and reports go to tracing until replaced.
    pub fn new(config: SessionConfig, ui: U, backend: B) -> Self {
        Self {
            config,
            ui,
            backend,
            query: None,
            last_params: None,
            credentials: None,
            state: SessionState::default(),
            services: ServiceFileLocator::from_env(),
            provider: Box::new(MemoryCredentials::new()),
            reporter: Arc::new(TracingReporter),
        }
    }

    #[must_use]
    pub fn with_services(mut self, services: ServiceFileLocator) -> Self {
        self.services = services;
        self
    }

    #[must_use]
    pub fn with_provider(mut self, provider: impl CredentialsProvider + Send + 'static) -> Self {
        self.provider = Box::new(provider);
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub const fn ui(&self) -> &U {
        &self.ui
    }

    pub fn ui_mut(&mut self) -> &mut U {
        &mut self.ui
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    pub const fn query_handle(&self) -> Option<&QueryHandle<B::Connection>> {
        self.query.as_ref()
    }

    pub const fn services(&self) -> &ServiceFileLocator {
        &self.services
    }

    /// Credentials of the last successful connection
    pub const fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Whether both handles are open
    pub fn is_connected(&self) -> bool {
        self.query.is_some() && self.ui.is_open(&self.config.plugin_name)
    }

    /// Layer descriptor for the connected database
    pub fn uri(&self) -> Option<DataSourceUri> {
        self.credentials
            .as_ref()
            .map(|c| DataSourceUri::from_credentials(c, self.config.store_credentials))
    }

    fn record_error(&mut self, err: SessionError) -> SessionError {
        self.state.last_error = Some(err.detail().to_string());
        err
    }

    /// Resolve credentials from the project or settings and connect
    ///
    /// Layer credentials get `max_attempts` retries and are put back to the
    /// provider on success; settings credentials get a single attempt.
    pub async fn set_database_connection(
        &mut self,
        project: Option<&Project>,
        settings: Option<&dyn SettingsStore>,
    ) -> Result<ConnectOutcome> {
        self.disconnect();
        self.state.reset();

        let sources = CredentialSources {
            project,
            layer_name: &self.config.layer_name,
            settings,
            services: &self.services,
        };
        let resolved = match resolve_credentials(&sources, self.config.sslmode_default) {
            Ok(resolved) => resolved,
            Err(e) => return Err(self.record_error(e)),
        };

        let not_version = resolved.not_version();
        let mut credentials = resolved.credentials;

        let result = match &resolved.origin {
            CredentialOrigin::Layer { layer, conn_info } => {
                debug!(layer = %layer, conn_info = %conn_info, "credentials from layer");
                self.state.schema_name = credentials.schema.clone();
                let max_attempts = self.config.max_attempts;
                let result =
                    self.connect_with_credentials(&mut credentials, Some(conn_info.as_str()), max_attempts)
                        .await;
                if result.is_ok() {
                    self.provider.put(conn_info, credentials.user.as_deref(), credentials.password.as_deref());
                }
                result
            }
            CredentialOrigin::Settings { profile } => {
                debug!(profile = %profile, "credentials from settings");
                self.connect_with_credentials(&mut credentials, None, 0).await
            }
        };

        if let Err(e) = result {
            warn!(not_version, error = %e, "Error connecting to database");
            self.state.last_error = Some("Error connecting to database".to_string());
            return Err(e);
        }

        self.state.logged_status = true;
        Ok(ConnectOutcome { logged: true, not_version, credentials })
    }

    /// Connect with credentials, retrying with logins from the provider
    ///
    /// Up to `max_attempts + 1` attempts are made. From the second attempt on,
    /// the provider is asked for a login keyed by `conn_info`, when given.
    /// Service credentials take the service path once, without retries.
    pub async fn connect_with_credentials(
        &mut self,
        credentials: &mut Credentials,
        conn_info: Option<&str>,
        max_attempts: u32,
    ) -> Result<()> {
        if credentials.service.is_some() {
            return self.connect_service(credentials, conn_info).await;
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            if attempt > 1 {
                if let Some(key) = conn_info {
                    let login = self.provider.get(
                        key,
                        credentials.user.as_deref(),
                        credentials.password.as_deref(),
                        None,
                    );
                    credentials.user = login.user;
                    credentials.password = login.password;
                }
            }

            match self.connect_host(credentials).await {
                Ok(()) => {
                    self.credentials = Some(credentials.clone());
                    return Ok(());
                }
                Err(e) if attempt > max_attempts => return Err(e),
                Err(SessionError::IncompleteCredentials(msg)) if conn_info.is_none() => {
                    return Err(SessionError::IncompleteCredentials(msg));
                }
                Err(e) => warn!(attempt, error = %e, "connection attempt failed"),
            }
        }
    }

    /// Connect once, through the service path when `service` is set
    pub async fn connect(&mut self, credentials: &mut Credentials) -> Result<()> {
        if credentials.service.is_some() {
            return self.connect_service(credentials, None).await;
        }
        self.connect_host(credentials).await?;
        self.credentials = Some(credentials.clone());
        Ok(())
    }

    /// Connect through the `pg_service.conf` section named by `credentials.service`
    ///
    /// A section naming host, port and dbname but lacking user or password is
    /// completed by the provider, and the login is put straight back. A section
    /// with no server at all is opened by service name on both handles. The
    /// login used is written back into `credentials`.
    pub async fn connect_service(
        &mut self,
        credentials: &mut Credentials,
        conn_info: Option<&str>,
    ) -> Result<()> {
        let Some(service) = credentials.service.clone() else {
            return Err(self.record_error(SessionError::invalid_input("no service name to connect to")));
        };

        let mut section = self.services.lookup(&service);
        if section.has_full_location() && (section.user.is_none() || section.password.is_none()) {
            let key = conn_info.map_or_else(|| format!("service='{service}'"), String::from);
            let prompt = format!("Please enter the credentials for connection '{service}'");
            let login = self.provider.get(
                &key,
                section.user.as_deref(),
                section.password.as_deref(),
                Some(&prompt),
            );
            section.user = login.user;
            section.password = login.password;
            self.provider.put(&key, section.user.as_deref(), section.password.as_deref());
        }

        credentials.user.clone_from(&section.user);
        credentials.password.clone_from(&section.password);

        let result = if section.has_location() {
            let host_credentials = Credentials {
                host: section.host,
                port: section.port.as_deref().and_then(|p| p.parse().ok()),
                db: section.dbname,
                user: section.user,
                password: section.password,
                sslmode: credentials
                    .sslmode
                    .or_else(|| section.sslmode.as_deref().and_then(|s| s.parse().ok())),
                ..Credentials::default()
            };
            self.connect_host(&host_credentials).await
        } else {
            info!(service = %service, "service has no server parameters, connecting by name");
            let params = ConnectParams::service(&service, credentials.sslmode);
            self.open_handles(params, "Service database").await
        };

        if result.is_ok() {
            self.credentials = Some(credentials.clone());
        }
        result
    }

    async fn connect_host(&mut self, credentials: &Credentials) -> Result<()> {
        let params = match ConnectParams::from_credentials(credentials) {
            Ok(params) => params,
            Err(e) => return Err(self.record_error(e)),
        };
        self.state.current_user.clone_from(&credentials.user);
        self.open_handles(params, "Database").await
    }

    /// Open the UI handle, then the query handle; both or neither stay open
    ///
    /// A failed attempt also closes the handles of any earlier connection.
    async fn open_handles(&mut self, params: ConnectParams, label: &str) -> Result<()> {
        let name = self.config.plugin_name.clone();

        if let Err(e) = self.open_ui(&name, params.clone()).await {
            warn!(error = %e, "UI connection failed");
            self.disconnect();
            return Err(self.record_error(SessionError::ui_connection_failed(format!(
                "{label} connection error (UI). Please open plugin log file to get more details"
            ))));
        }

        match self.backend.connect(&params).await {
            Ok(conn) => {
                let handle = QueryHandle::new(conn);
                info!(pid = ?handle.pid(), "PostgreSQL PID");
                self.query = Some(handle);
                self.last_params = Some(params);
                self.state.logged_status = true;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "query connection failed");
                self.disconnect();
                Err(self.record_error(SessionError::driver_connection_failed(format!(
                    "{label} connection error (driver). Please open plugin log file to get more details"
                ))))
            }
        }
    }

    /// Replace the registry entry `name` and open it
    async fn open_ui(&mut self, name: &str, params: ConnectParams) -> std::result::Result<(), DriverError> {
        if self.ui.contains(name) {
            self.ui.remove_database(name);
        }
        self.ui.add_database(name, params)?;
        if let Err(e) = self.ui.open(name).await {
            self.ui.remove_database(name);
            return Err(e);
        }
        Ok(())
    }

    /// Reconnect a silently closed transport
    ///
    /// The query connection reconnects itself; the UI handle is then reopened
    /// from the cached parameters and the search path replayed. An open
    /// transport is left untouched.
    pub async fn check_connection(&mut self) -> ReconnectStatus {
        let Some(handle) = self.query.as_mut() else {
            return ReconnectStatus::ReconnectFailed(BROKEN_CONNECTION.to_string());
        };

        match handle.conn.check_connection().await {
            Ok(false) => ReconnectStatus::StillOpen,
            Ok(true) => {
                warn!("Database connection was closed and reconnected");
                handle.pid = handle.conn.pid();
                if let Some(sql) = handle.search_path.clone() {
                    if let Err(e) = handle.conn.execute(&sql).await {
                        warn!(error = %e, "could not restore search_path");
                    }
                }
                match self.reopen_ui().await {
                    Ok(()) => ReconnectStatus::Reconnected,
                    Err(e) => {
                        warn!(error = %e, "Database connection error (UI)");
                        ReconnectStatus::ReconnectFailed(e.message)
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "check_connection failed");
                ReconnectStatus::ReconnectFailed(e.message)
            }
        }
    }

    /// [`check_connection`](Self::check_connection) as a `Result`
    pub async fn ensure_connection(&mut self) -> Result<ReconnectStatus> {
        match self.check_connection().await {
            ReconnectStatus::ReconnectFailed(msg) => {
                Err(self.record_error(SessionError::stale_connection(msg)))
            }
            status => Ok(status),
        }
    }

    async fn reopen_ui(&mut self) -> std::result::Result<(), DriverError> {
        let name = self.config.plugin_name.clone();
        if !self.ui.contains(&name) {
            let params = self
                .last_params
                .clone()
                .ok_or_else(|| DriverError::new("no cached connection parameters"))?;
            self.ui.add_database(&name, params)?;
        }
        self.ui.open(&name).await
    }

    /// Recreate the UI handle from the cached parameters
    ///
    /// Returns false when nothing has connected yet.
    pub async fn reset_ui_connection(&mut self) -> bool {
        let Some(params) = self.last_params.clone() else {
            return false;
        };
        let name = self.config.plugin_name.clone();
        self.ui.remove_database(&name);
        if let Err(e) = self.open_ui(&name, params).await {
            warn!(error = %e, "UI connection reset failed");
        }
        self.reporter.show_warning("Database connection reset, please try again");
        true
    }

    /// Run `sql` on the UI handle
    ///
    /// A lost UI connection is reset; other errors are shown as warnings.
    pub async fn fill_table_by_query(&mut self, sql: &str) -> TableModel {
        let name = self.config.plugin_name.clone();
        let model = self.ui.query_model(&name, sql).await;

        if let Some(err) = &model.last_error {
            if !self.ui.is_open(&name) || err.contains("Unable to find table") {
                self.reset_ui_connection().await;
            } else {
                self.reporter.show_warning(err);
            }
        }
        model
    }

    /// Close both handles and forget the cached connection
    pub fn disconnect(&mut self) {
        if self.ui.contains(&self.config.plugin_name) {
            self.ui.remove_database(&self.config.plugin_name);
        }
        if let Some(handle) = self.query.take() {
            info!(pid = ?handle.pid(), "closing query connection");
        }
        self.last_params = None;
        self.credentials = None;
        self.state.logged_status = false;
    }
}
