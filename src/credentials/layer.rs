//! Layer data-source descriptors
//!
//! A PostgreSQL layer stores its connection as a shell-quoted string such as
//! `dbname='giswater' host=db1 port=5432 sslmode=disable key='id' table="ws"."v_edit_node" (the_geom)`.
//! This module tokenizes those strings into [`Credentials`] and finds layers in a
//! [`Project`] by the table they point to.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::Credentials;
use crate::error::{Result, SessionError};

/// Provider name of PostgreSQL layers
pub const POSTGRES_PROVIDER: &str = "postgres";

/// A map layer as seen by the credential resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    /// Data provider key (`postgres`, `gdal`, `ogr`, ...)
    pub provider: String,
    /// Data-source descriptor string
    pub source: String,
    #[serde(default = "default_valid")]
    pub valid: bool,
}

const fn default_valid() -> bool {
    true
}

impl Layer {
    #[must_use]
    pub fn postgres(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: POSTGRES_PROVIDER.to_string(),
            source: source.into(),
            valid: true,
        }
    }

    #[must_use]
    pub fn is_postgres(&self) -> bool {
        self.provider == POSTGRES_PROVIDER
    }

    /// Connection parameters embedded in the descriptor
    ///
    /// Non-postgres layers yield empty credentials.
    pub fn credentials(&self) -> Result<Credentials> {
        if !self.is_postgres() {
            return Ok(Credentials::default());
        }
        parse_descriptor(&self.source)
    }

    /// Connection key for credential providers
    ///
    /// Service layers are keyed by `service='name'`, others by their
    /// `dbname/host/port/sslmode` tokens in descriptor order.
    pub fn connection_info(&self) -> Result<String> {
        connection_info(&self.source)
    }

    /// Table or view name referenced by the descriptor
    #[must_use]
    pub fn table_name(&self) -> Option<String> {
        match self.provider.as_str() {
            POSTGRES_PROVIDER | "gdal" => table_name_from_source(&self.source),
            "ogr" => {
                let mut parts = self.source.split('|');
                let path = parts.next().unwrap_or_default();
                if !path.ends_with(".gpkg") {
                    return None;
                }
                Some(
                    parts
                        .find_map(|p| p.strip_prefix("layername="))
                        .map(String::from)
                        .unwrap_or_default(),
                )
            }
            _ => None,
        }
    }

    /// Schema of the referenced table (postgres layers only)
    #[must_use]
    pub fn schema_name(&self) -> Option<String> {
        if !self.is_postgres() {
            return None;
        }
        self.credentials().ok().and_then(|c| c.schema)
    }
}

/// Layers loaded in the current project, in table-of-contents order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub layers: Vec<Layer>,
    /// Schema used when a lookup does not name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_schema: Option<String>,
}

impl Project {
    #[must_use]
    pub fn new(layers: Vec<Layer>) -> Self {
        Self { layers, main_schema: None }
    }

    /// First layer whose source table is `tablename`
    ///
    /// `schema` defaults to the project's main schema; when both are absent any
    /// schema matches.
    #[must_use]
    pub fn layer_by_tablename(&self, tablename: &str, schema: Option<&str>) -> Option<&Layer> {
        let schema = schema.or(self.main_schema.as_deref()).filter(|s| !s.is_empty());
        self.layers.iter().find(|layer| {
            layer.table_name().as_deref() == Some(tablename)
                && match schema {
                    None => true,
                    Some(s) => layer.schema_name().as_deref() == Some(s),
                }
        })
    }
}

/// Split a descriptor into `key=value` pairs
///
/// Tokens without `=` and tokens with more than one `=` are dropped.
pub fn descriptor_pairs(source: &str) -> Result<HashMap<String, String>> {
    let tokens = shlex::split(source).ok_or_else(|| {
        SessionError::invalid_input("layer data source has unbalanced quotes")
    })?;

    Ok(tokens
        .into_iter()
        .filter_map(|token| {
            let mut parts = token.split('=');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(k), Some(v), None) => Some((k.to_string(), v.to_string())),
                _ => None,
            }
        })
        .collect())
}

/// Parse a descriptor into [`Credentials`]
///
/// `dbname` maps to `db`; `table` is split into schema and table on the first `.`.
/// An unparseable `port` is treated as absent.
pub fn parse_descriptor(source: &str) -> Result<Credentials> {
    let mut pairs = descriptor_pairs(source)?;

    let (schema, table) = match pairs.remove("table") {
        Some(qualified) => match qualified.split_once('.') {
            Some((schema, table)) => (Some(schema.to_string()), Some(table.to_string())),
            None => (None, Some(qualified)),
        },
        None => (None, None),
    };

    let port = pairs.remove("port").and_then(|p| {
        p.parse::<u16>()
            .inspect_err(|e| tracing::debug!(port = %p, error = %e, "ignoring invalid port"))
            .ok()
    });

    let sslmode = pairs.remove("sslmode").and_then(|s| s.parse().ok());

    Ok(Credentials {
        db: pairs.remove("dbname"),
        schema,
        table,
        service: pairs.remove("service"),
        host: pairs.remove("host"),
        port,
        user: pairs.remove("user"),
        password: pairs.remove("password"),
        sslmode,
    })
}

/// Connection-info string of a descriptor
///
/// Keeps only the server-identifying tokens so two layers on the same database
/// share one key.
pub fn connection_info(source: &str) -> Result<String> {
    let tokens = shlex::split(source).ok_or_else(|| {
        SessionError::invalid_input("layer data source has unbalanced quotes")
    })?;

    let mut kept = Vec::new();
    for token in tokens {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        if key == "service" {
            return Ok(format!("service='{value}'"));
        }
        if matches!(key, "dbname" | "host" | "port" | "sslmode") {
            kept.push(format!("{key}={}", quote_value(value)));
        }
    }
    Ok(kept.join(" "))
}

/// Quote a connection-string value when it needs it
#[must_use]
pub fn quote_value(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\']) {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

/// Table name from a raw descriptor, without schema and quotes
#[must_use]
pub fn table_name_from_source(source: &str) -> Option<String> {
    let lower = source.to_lowercase();
    if let Some(rest) = lower.strip_prefix("pg:") {
        let pos = rest.find("table=")?;
        return Some(rest[pos + 6..].trim().to_string());
    }
    let pairs = descriptor_pairs(&lower).ok()?;
    let qualified = pairs.get("table")?;
    let table = qualified.split_once('.').map_or(qualified.as_str(), |(_, t)| t);
    Some(table.trim_matches('"').to_string())
}
