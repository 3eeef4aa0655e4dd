//! `PostgreSQL` Driver Implementation
//!
//! Implements the [`UiRegistry`], [`QueryBackend`] and [`QueryConnection`]
//! seams on `tokio-postgres`.
//!
//! # Implementation Notes
//! - Connections use `NoTls`; `sslmode` maps onto the driver's `SslMode`, so
//!   `require` and stricter fail against servers without a TLS connector
//! - Option strings are parsed by `tokio-postgres`, which does not read
//!   `pg_service.conf`; service names are resolved before reaching this module
//! - BYTEA data is Base64-encoded for JSON safety
//! - Types without a dedicated mapping come back as text when their wire
//!   bytes are UTF-8, Base64 otherwise

use std::collections::HashMap;
use std::error::Error as StdError;

use tokio_postgres::config::SslMode as PgSslMode;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};
use tracing::{debug, warn};

use crate::credentials::SslMode;
use crate::engine::{ConnectParams, QueryBackend, QueryConnection, Row, TableModel, UiRegistry};
use crate::error::DriverError;

/// Build a `tokio-postgres` config from [`ConnectParams`]
pub fn build_pg_config(params: &ConnectParams) -> Result<Config, DriverError> {
    match params {
        ConnectParams::Host { host, port, dbname, user, password, sslmode } => {
            let mut config = Config::new();
            config.host(host).port(*port).dbname(dbname).user(user).password(password);
            if let Some(mode) = sslmode {
                config.ssl_mode(pg_ssl_mode(*mode));
            }
            Ok(config)
        }
        ConnectParams::Options(options) => options
            .parse::<Config>()
            .map_err(|e| DriverError::new(format!("Invalid connection options: {e}"))),
    }
}

const fn pg_ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Allow | SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => PgSslMode::Require,
    }
}

/// Open a client and spawn its connection task
async fn open_client(config: &Config) -> Result<Client, DriverError> {
    let (client, connection) = config
        .connect(NoTls)
        .await
        .map_err(|e| DriverError::new(format!("Failed to connect to PostgreSQL: {e}")))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!(error = %e, "PostgreSQL connection closed with error");
        }
    });

    Ok(client)
}

fn driver_error(e: &tokio_postgres::Error) -> DriverError {
    match e.as_db_error() {
        Some(db) => DriverError::new(db.message()),
        None => DriverError::new(e.to_string()),
    }
}

struct UiEntry {
    config: Config,
    client: Option<Client>,
}

/// Registry of named UI-bound connections
#[derive(Default)]
pub struct PgUiRegistry {
    entries: HashMap<String, UiEntry>,
}

impl PgUiRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl UiRegistry for PgUiRegistry {
    fn add_database(&mut self, name: &str, params: ConnectParams) -> Result<(), DriverError> {
        if self.entries.contains_key(name) {
            return Err(DriverError::new(format!("duplicate connection name '{name}'")));
        }
        let config = build_pg_config(&params)?;
        self.entries.insert(name.to_string(), UiEntry { config, client: None });
        Ok(())
    }

    fn remove_database(&mut self, name: &str) {
        self.entries.remove(name);
    }

    fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    async fn open(&mut self, name: &str) -> Result<(), DriverError> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| DriverError::new(format!("unknown connection name '{name}'")))?;
        let client = open_client(&entry.config).await?;
        entry.client = Some(client);
        Ok(())
    }

    fn is_open(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .and_then(|e| e.client.as_ref())
            .is_some_and(|c| !c.is_closed())
    }

    async fn query_model(&mut self, name: &str, sql: &str) -> TableModel {
        let Some(client) = self.entries.get(name).and_then(|e| e.client.as_ref()) else {
            return TableModel {
                last_error: Some(format!("Unable to find table model connection '{name}'")),
                ..TableModel::default()
            };
        };

        let stmt = match client.prepare(sql).await {
            Ok(stmt) => stmt,
            Err(e) => {
                return TableModel { last_error: Some(driver_error(&e).message), ..TableModel::default() }
            }
        };
        let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();

        match client.query(&stmt, &[]).await {
            Ok(rows) => {
                let mut converted = Vec::with_capacity(rows.len());
                for row in &rows {
                    match row_to_json(row) {
                        Ok(r) => converted.push(r),
                        Err(e) => {
                            return TableModel { columns, rows: converted, last_error: Some(e.message) }
                        }
                    }
                }
                TableModel { columns, rows: converted, last_error: None }
            }
            Err(e) => TableModel { columns, rows: Vec::new(), last_error: Some(driver_error(&e).message) },
        }
    }
}

/// Factory for [`PgConnection`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct PgBackend;

impl QueryBackend for PgBackend {
    type Connection = PgConnection;

    async fn connect(&self, params: &ConnectParams) -> Result<PgConnection, DriverError> {
        PgConnection::connect(build_pg_config(params)?).await
    }
}

/// Query connection bound to one backend process
pub struct PgConnection {
    config: Config,
    client: Client,
    pid: Option<i32>,
}

impl PgConnection {
    pub async fn connect(config: Config) -> Result<Self, DriverError> {
        let client = open_client(&config).await?;
        let pid = backend_pid(&client).await;
        Ok(Self { config, client, pid })
    }
}

async fn backend_pid(client: &Client) -> Option<i32> {
    match client.query_one("SELECT pg_backend_pid()", &[]).await {
        Ok(row) => row.try_get(0).ok(),
        Err(e) => {
            debug!(error = %e, "could not read backend pid");
            None
        }
    }
}

impl QueryConnection for PgConnection {
    fn pid(&self) -> Option<i32> {
        self.pid
    }

    async fn check_connection(&mut self) -> Result<bool, DriverError> {
        if !self.client.is_closed() {
            return Ok(false);
        }
        self.client = open_client(&self.config).await?;
        self.pid = backend_pid(&self.client).await;
        Ok(true)
    }

    async fn get_row(&mut self, sql: &str) -> Result<Option<Row>, DriverError> {
        let rows = self.client.query(sql, &[]).await.map_err(|e| driver_error(&e))?;
        rows.first().map(row_to_json).transpose()
    }

    async fn get_rows(&mut self, sql: &str) -> Result<Vec<Row>, DriverError> {
        let rows = self.client.query(sql, &[]).await.map_err(|e| driver_error(&e))?;
        rows.iter().map(row_to_json).collect()
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, DriverError> {
        // Simple protocol so multi-statement scripts run as one call
        let messages = self.client.simple_query(sql).await.map_err(|e| driver_error(&e))?;
        Ok(messages
            .iter()
            .map(|m| match m {
                SimpleQueryMessage::CommandComplete(n) => *n,
                _ => 0,
            })
            .sum())
    }

    async fn execute_returning(&mut self, sql: &str) -> Result<Option<Row>, DriverError> {
        self.get_row(sql).await
    }

    async fn cancel_backend(&mut self, pid: i32) -> Result<bool, DriverError> {
        let row = self
            .client
            .query_one("SELECT pg_cancel_backend($1)", &[&pid])
            .await
            .map_err(|e| driver_error(&e))?;
        row.try_get(0).map_err(|e| driver_error(&e))
    }
}

/// Wire bytes of any column, for types without a dedicated mapping
struct RawValue(Vec<u8>);

impl<'a> FromSql<'a> for RawValue {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(Self(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Convert a `PostgreSQL` row to a JSON-safe `Vec`
fn row_to_json(row: &tokio_postgres::Row) -> Result<Row, DriverError> {
    (0..row.columns().len()).map(|idx| postgres_value_to_json(row, idx)).collect()
}

fn get_opt<'a, T: FromSql<'a>>(
    row: &'a tokio_postgres::Row,
    idx: usize,
) -> Result<Option<T>, DriverError> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        DriverError::new(format!(
            "Failed to convert column '{}' ({}): {e}",
            row.columns()[idx].name(),
            row.columns()[idx].type_().name()
        ))
    })
}

/// Convert `PostgreSQL` value to JSON value
fn postgres_value_to_json(row: &tokio_postgres::Row, idx: usize) -> Result<serde_json::Value, DriverError> {
    use serde_json::Value;

    let col_type = row.columns()[idx].type_().clone();

    let value = match col_type {
        Type::BOOL => get_opt::<bool>(row, idx)?.map(Value::Bool),
        Type::INT2 => get_opt::<i16>(row, idx)?.map(|v| Value::Number(v.into())),
        Type::INT4 => get_opt::<i32>(row, idx)?.map(|v| Value::Number(v.into())),
        Type::INT8 => get_opt::<i64>(row, idx)?.map(|v| Value::Number(v.into())),
        Type::OID => get_opt::<u32>(row, idx)?.map(|v| Value::Number(v.into())),
        Type::FLOAT4 => get_opt::<f32>(row, idx)?
            .map(|v| serde_json::Number::from_f64(f64::from(v)).map_or(Value::Null, Value::Number)),
        Type::FLOAT8 => get_opt::<f64>(row, idx)?
            .map(|v| serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)),
        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME => {
            get_opt::<String>(row, idx)?.map(Value::String)
        }
        Type::JSON | Type::JSONB => get_opt::<Value>(row, idx)?,
        Type::BYTEA => get_opt::<Vec<u8>>(row, idx)?.map(|v| {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(v))
        }),
        Type::TIMESTAMP => get_opt::<chrono::NaiveDateTime>(row, idx)?
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S").to_string())),
        Type::TIMESTAMPTZ => get_opt::<chrono::DateTime<chrono::Utc>>(row, idx)?
            .map(|v| Value::String(v.to_rfc3339())),
        Type::DATE => get_opt::<chrono::NaiveDate>(row, idx)?
            .map(|v| Value::String(v.format("%Y-%m-%d").to_string())),
        Type::TIME => get_opt::<chrono::NaiveTime>(row, idx)?
            .map(|v| Value::String(v.format("%H:%M:%S").to_string())),
        Type::UUID => get_opt::<uuid::Uuid>(row, idx)?.map(|v| Value::String(v.to_string())),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::NAME_ARRAY => {
            get_opt::<Vec<Option<String>>>(row, idx)?.map(|v| {
                Value::Array(v.into_iter().map(|s| s.map_or(Value::Null, Value::String)).collect())
            })
        }
        Type::INT4_ARRAY => get_opt::<Vec<Option<i32>>>(row, idx)?.map(|v| {
            Value::Array(v.into_iter().map(|n| n.map_or(Value::Null, |n| Value::Number(n.into()))).collect())
        }),
        Type::NUMERIC => get_opt::<RawValue>(row, idx)?
            .map(|raw| decode_numeric(&raw.0).map_or(Value::Null, Value::String)),
        _ => get_opt::<RawValue>(row, idx)?.map(|raw| match String::from_utf8(raw.0) {
            Ok(text) => Value::String(text),
            Err(e) => {
                use base64::Engine;
                Value::String(base64::engine::general_purpose::STANDARD.encode(e.into_bytes()))
            }
        }),
    };

    Ok(value.unwrap_or(serde_json::Value::Null))
}

/// Decode the binary `NUMERIC` wire format into its decimal text
fn decode_numeric(raw: &[u8]) -> Option<String> {
    const NUMERIC_NEG: u16 = 0x4000;
    const NUMERIC_NAN: u16 = 0xC000;
    const NUMERIC_PINF: u16 = 0xD000;
    const NUMERIC_NINF: u16 = 0xF000;

    let read_u16 = |pos: usize| raw.get(pos..pos + 2).map(|b| u16::from_be_bytes([b[0], b[1]]));
    let ndigits = read_u16(0)? as usize;
    let weight = read_u16(2)? as i16;
    let sign = read_u16(4)?;
    let dscale = read_u16(6)? as usize;

    match sign {
        NUMERIC_NAN => return Some("NaN".to_string()),
        NUMERIC_PINF => return Some("Infinity".to_string()),
        NUMERIC_NINF => return Some("-Infinity".to_string()),
        _ => {}
    }

    let digits: Vec<u16> = (0..ndigits).map(|i| read_u16(8 + i * 2)).collect::<Option<_>>()?;
    let weight = i32::from(weight);
    // Group `i` holds the base-10000 digit of power `weight - i`
    let digit = |i: i32| usize::try_from(i).ok().and_then(|i| digits.get(i).copied()).unwrap_or(0);

    let mut int_part = String::new();
    if weight < 0 {
        int_part.push('0');
    } else {
        int_part.push_str(&digit(0).to_string());
        for i in 1..=weight {
            int_part.push_str(&format!("{:04}", digit(i)));
        }
    }

    let mut frac_part = String::new();
    let mut i = weight + 1;
    while frac_part.len() < dscale {
        frac_part.push_str(&format!("{:04}", digit(i)));
        i += 1;
    }
    frac_part.truncate(dscale);

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    out.push_str(&int_part);
    if !frac_part.is_empty() {
        out.push('.');
        out.push_str(&frac_part);
    }
    Some(out)
}
