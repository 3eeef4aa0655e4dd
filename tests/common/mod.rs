//! Test doubles for the driver, credential and reporting seams
//!
//! Every fake shares its bookkeeping through `Arc`s so a test can keep a
//! handle after moving the fake into a session.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pgsession::config::SessionConfig;
use pgsession::credentials::layer::{Layer, Project};
use pgsession::credentials::service_file::ServiceFileLocator;
use pgsession::{
    ConnectParams, ConnectionSession, CredentialsProvider, DriverError, ErrorReporter, Login,
    QueryBackend, QueryConnection, Row, TableModel, UiRegistry,
};

pub const TEST_PID: i32 = 4242;

// ============================================================================
// UI registry
// ============================================================================

/// Registry that connects instantly, or always fails to open
#[derive(Debug, Default)]
pub struct FakeUi {
    entries: HashMap<String, ConnectParams>,
    open: HashSet<String>,
    pub adds: usize,
    pub removes: usize,
    pub opens: usize,
    pub fail_open: bool,
    /// Canned results for `query_model`, keyed by SQL
    pub models: HashMap<String, TableModel>,
}

impl FakeUi {
    pub fn failing() -> Self {
        Self { fail_open: true, ..Self::default() }
    }

    /// Registry mutations so far
    pub const fn mutations(&self) -> usize {
        self.adds + self.removes + self.opens
    }

    pub fn params(&self, name: &str) -> Option<&ConnectParams> {
        self.entries.get(name)
    }
}

impl UiRegistry for FakeUi {
    fn add_database(&mut self, name: &str, params: ConnectParams) -> Result<(), DriverError> {
        if self.entries.contains_key(name) {
            return Err(DriverError::new(format!("duplicate connection name '{name}'")));
        }
        self.adds += 1;
        self.entries.insert(name.to_string(), params);
        Ok(())
    }

    fn remove_database(&mut self, name: &str) {
        self.removes += 1;
        self.entries.remove(name);
        self.open.remove(name);
    }

    fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    async fn open(&mut self, name: &str) -> Result<(), DriverError> {
        self.opens += 1;
        if self.fail_open {
            return Err(DriverError::new("password authentication failed for user"));
        }
        if !self.entries.contains_key(name) {
            return Err(DriverError::new(format!("unknown connection '{name}'")));
        }
        self.open.insert(name.to_string());
        Ok(())
    }

    fn is_open(&self, name: &str) -> bool {
        self.open.contains(name)
    }

    async fn query_model(&mut self, _name: &str, sql: &str) -> TableModel {
        self.models.get(sql).cloned().unwrap_or_default()
    }
}

// ============================================================================
// Query backend
// ============================================================================

/// Scripted server shared by the backend and every connection it opens
#[derive(Debug, Default)]
pub struct FakeDb {
    /// Rows returned per SQL text
    pub rows: HashMap<String, Vec<Row>>,
    /// Driver errors raised per SQL text
    pub errors: HashMap<String, String>,
    /// Every SQL text sent to the server, in order
    pub queries: Vec<String>,
    /// Transport was closed behind the connection's back
    pub closed: bool,
    pub reconnect_fails: bool,
    pub reconnects: usize,
}

pub type SharedDb = Arc<Mutex<FakeDb>>;

#[derive(Debug, Default)]
pub struct FakeBackend {
    pub db: SharedDb,
    pub fail: bool,
    connects: AtomicUsize,
    seen: Mutex<Vec<ConnectParams>>,
}

impl FakeBackend {
    pub fn new(db: SharedDb) -> Self {
        Self { db, ..Self::default() }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<ConnectParams> {
        self.seen.lock().unwrap().clone()
    }
}

impl QueryBackend for FakeBackend {
    type Connection = FakeConnection;

    async fn connect(&self, params: &ConnectParams) -> Result<FakeConnection, DriverError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(params.clone());
        if self.fail {
            return Err(DriverError::new("connection refused"));
        }
        Ok(FakeConnection { db: Arc::clone(&self.db) })
    }
}

pub struct FakeConnection {
    db: SharedDb,
}

impl FakeConnection {
    fn run(&self, sql: &str) -> Result<Vec<Row>, DriverError> {
        let mut db = self.db.lock().unwrap();
        db.queries.push(sql.to_string());
        if let Some(err) = db.errors.get(sql) {
            return Err(DriverError::new(err.clone()));
        }
        Ok(db.rows.get(sql).cloned().unwrap_or_default())
    }
}

impl QueryConnection for FakeConnection {
    fn pid(&self) -> Option<i32> {
        Some(TEST_PID)
    }

    async fn check_connection(&mut self) -> Result<bool, DriverError> {
        let mut db = self.db.lock().unwrap();
        if !db.closed {
            return Ok(false);
        }
        if db.reconnect_fails {
            return Err(DriverError::new("could not reconnect"));
        }
        db.closed = false;
        db.reconnects += 1;
        Ok(true)
    }

    async fn get_row(&mut self, sql: &str) -> Result<Option<Row>, DriverError> {
        self.run(sql).map(|rows| rows.into_iter().next())
    }

    async fn get_rows(&mut self, sql: &str) -> Result<Vec<Row>, DriverError> {
        self.run(sql)
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, DriverError> {
        self.run(sql).map(|rows| rows.len() as u64)
    }

    async fn execute_returning(&mut self, sql: &str) -> Result<Option<Row>, DriverError> {
        self.run(sql).map(|rows| rows.into_iter().next())
    }

    async fn cancel_backend(&mut self, pid: i32) -> Result<bool, DriverError> {
        self.run(&format!("SELECT pg_cancel_backend({pid})"))?;
        Ok(pid == TEST_PID)
    }
}

// ============================================================================
// Credentials provider
// ============================================================================

#[derive(Debug, Default)]
pub struct ProviderLog {
    /// `(conn_info, message)` of every `get`
    pub gets: Vec<(String, Option<String>)>,
    /// `(conn_info, user, password)` of every `put`
    pub puts: Vec<(String, Option<String>, Option<String>)>,
}

/// Provider answering every `get` with a fixed login (or the pre-filled values)
#[derive(Debug, Clone, Default)]
pub struct RecordingProvider {
    pub log: Arc<Mutex<ProviderLog>>,
    login: Option<(String, String)>,
}

impl RecordingProvider {
    pub fn with_login(user: &str, password: &str) -> Self {
        Self { login: Some((user.to_string(), password.to_string())), ..Self::default() }
    }

    pub fn gets(&self) -> Vec<(String, Option<String>)> {
        self.log.lock().unwrap().gets.clone()
    }

    pub fn puts(&self) -> Vec<(String, Option<String>, Option<String>)> {
        self.log.lock().unwrap().puts.clone()
    }
}

impl CredentialsProvider for RecordingProvider {
    fn get(
        &mut self,
        conn_info: &str,
        user: Option<&str>,
        password: Option<&str>,
        message: Option<&str>,
    ) -> Login {
        self.log.lock().unwrap().gets.push((conn_info.to_string(), message.map(String::from)));
        match &self.login {
            Some((u, p)) => Login { accepted: true, user: Some(u.clone()), password: Some(p.clone()) },
            None => Login {
                accepted: true,
                user: user.map(String::from),
                password: password.map(String::from),
            },
        }
    }

    fn put(&mut self, conn_info: &str, user: Option<&str>, password: Option<&str>) {
        self.log.lock().unwrap().puts.push((
            conn_info.to_string(),
            user.map(String::from),
            password.map(String::from),
        ));
    }
}

// ============================================================================
// Error reporter
// ============================================================================

#[derive(Debug, Default)]
pub struct RecordingReporter {
    exceptions: Mutex<Vec<(String, String)>>,
    warnings: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn exceptions(&self) -> Vec<(String, String)> {
        self.exceptions.lock().unwrap().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn show_db_exception(&self, title: &str, message: &str) {
        self.exceptions.lock().unwrap().push((title.to_string(), message.to_string()));
    }

    fn show_warning(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }
}

// ============================================================================
// Builders
// ============================================================================

pub type TestSession = ConnectionSession<FakeUi, FakeBackend>;

/// Session with no service files, a recording reporter and the given fakes
pub fn session_with(
    config: SessionConfig,
    ui: FakeUi,
    backend: FakeBackend,
) -> (TestSession, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::default());
    let session = ConnectionSession::new(config, ui, backend)
        .with_services(ServiceFileLocator::new(None, None))
        .with_reporter(Arc::clone(&reporter) as Arc<dyn ErrorReporter>);
    (session, reporter)
}

/// Session connected to a scripted server as `gw_user`
pub async fn connected_session(db: SharedDb) -> (TestSession, Arc<RecordingReporter>) {
    let (mut session, reporter) =
        session_with(SessionConfig::default(), FakeUi::default(), FakeBackend::new(db));
    let mut credentials = pgsession::Credentials::new("db1", 5432, "giswater", "gw_user", "secret");
    session.connect(&mut credentials).await.expect("fake connection should open");
    (session, reporter)
}

/// Project holding one postgres layer for the default layer name
pub fn project_with_source(source: &str) -> Project {
    Project::new(vec![Layer::postgres("Node", source)])
}

pub fn shared_db() -> SharedDb {
    Arc::new(Mutex::new(FakeDb::default()))
}

/// Script `rows` as the result of `sql`
pub fn script(db: &SharedDb, sql: &str, rows: Vec<Row>) {
    db.lock().unwrap().rows.insert(sql.to_string(), rows);
}

/// Script a driver error for `sql`
pub fn script_error(db: &SharedDb, sql: &str, error: &str) {
    db.lock().unwrap().errors.insert(sql.to_string(), error.to_string());
}

pub fn queries(db: &SharedDb) -> Vec<String> {
    db.lock().unwrap().queries.clone()
}
