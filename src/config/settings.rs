//! Persisted connection settings
//!
//! The host application keeps its PostgreSQL profiles in a hierarchical
//! key-value store:
//!
//! ```text
//! PostgreSQL/connections/selected        = "prod"
//! PostgreSQL/connections/prod/host       = "db1"
//! PostgreSQL/connections/prod/port       = "5432"
//! PostgreSQL/connections/prod/database   = "giswater"
//! PostgreSQL/connections/prod/sslmode    = "SslRequire"
//! ```
//!
//! [`SettingsStore`] is the read/write seam; [`JsonSettings`] persists the
//! flat key space as a JSON object.

use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::credentials::{Credentials, SslMode};
use crate::error::{Result, SessionError};

/// Group holding every stored connection profile
pub const CONNECTIONS_GROUP: &str = "PostgreSQL/connections";

/// Hierarchical key-value store addressed by `/`-joined paths
pub trait SettingsStore {
    /// Value stored at `key`
    fn value(&self, key: &str) -> Option<Value>;

    /// Store `value` at `key`
    fn set_value(&mut self, key: &str, value: Value);

    /// Whether any key lives under `group`
    fn has_group(&self, group: &str) -> bool;
}

/// Flat JSON-object settings store
#[derive(Debug, Clone, Default)]
pub struct JsonSettings {
    values: Map<String, Value>,
    path: Option<PathBuf>,
}

impl JsonSettings {
    /// Empty in-memory store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// In-memory store pre-filled with `(key, value)` pairs
    #[must_use]
    pub fn from_pairs<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self { values: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(), path: None }
    }

    /// Load a store from `path`; a missing file yields an empty store bound to `path`
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self { values: Map::new(), path: Some(path.to_path_buf()) });
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| SessionError::config_error(format!("Could not read settings file: {e}")))?;

        let values = serde_json::from_str::<Map<String, Value>>(&contents).map_err(|e| {
            SessionError::config_error(format!("Invalid settings file format: {e}"))
        })?;

        Ok(Self { values, path: Some(path.to_path_buf()) })
    }

    /// Write the store back to the file it was loaded from
    pub fn save(&self) -> Result<()> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| SessionError::config_error("Settings store has no backing file"))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SessionError::config_error(format!("Could not create settings directory: {e}"))
            })?;
        }

        let contents = serde_json::to_string_pretty(&self.values)
            .map_err(|e| SessionError::config_error(format!("Could not serialize settings: {e}")))?;

        fs::write(path, contents)
            .map_err(|e| SessionError::config_error(format!("Could not write settings file: {e}")))
    }
}

impl SettingsStore for JsonSettings {
    fn value(&self, key: &str) -> Option<Value> {
        self.values.get(key).filter(|v| !v.is_null()).cloned()
    }

    fn set_value(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    fn has_group(&self, group: &str) -> bool {
        let prefix = format!("{}/", group.trim_end_matches('/'));
        self.values.keys().any(|k| k.starts_with(&prefix))
    }
}

/// Name of the selected connection profile
#[must_use]
pub fn selected_connection(settings: &dyn SettingsStore) -> Option<String> {
    settings
        .value(&format!("{CONNECTIONS_GROUP}/selected"))
        .and_then(|v| value_as_string(&v))
        .filter(|s| !s.is_empty())
}

/// Stored SSL code of a profile, if recognised
#[must_use]
pub fn profile_sslmode(settings: &dyn SettingsStore, profile: &str) -> Option<SslMode> {
    settings
        .value(&format!("{CONNECTIONS_GROUP}/{profile}/sslmode"))
        .and_then(|v| SslMode::from_settings_value(&v))
}

/// Read a profile into [`Credentials`]
///
/// Empty or absent hosts become `localhost`. The SSL mode is left unset; the
/// resolver decides it.
#[must_use]
pub fn profile_credentials(settings: &dyn SettingsStore, profile: &str) -> Credentials {
    let get = |key: &str| {
        settings
            .value(&format!("{CONNECTIONS_GROUP}/{profile}/{key}"))
            .and_then(|v| value_as_string(&v))
            .filter(|s| !s.is_empty())
    };

    Credentials {
        host: Some(get("host").unwrap_or_else(|| "localhost".to_string())),
        port: get("port").and_then(|p| p.parse().ok()),
        db: get("database"),
        user: get("username"),
        password: get("password"),
        service: get("service"),
        ..Credentials::default()
    }
}

/// Store a profile and mark it as selected
pub fn save_profile(settings: &mut dyn SettingsStore, profile: &str, credentials: &Credentials) {
    let mut put = |key: &str, value: Option<String>| {
        if let Some(v) = value {
            settings.set_value(&format!("{CONNECTIONS_GROUP}/{profile}/{key}"), Value::String(v));
        }
    };
    put("host", credentials.host.clone());
    put("port", credentials.port.map(|p| p.to_string()));
    put("database", credentials.db.clone());
    put("username", credentials.user.clone());
    put("password", credentials.password.clone());
    put("service", credentials.service.clone());
    put("sslmode", credentials.sslmode.map(|m| m.as_str().to_string()));

    settings.set_value(&format!("{CONNECTIONS_GROUP}/selected"), Value::String(profile.to_string()));
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample() -> JsonSettings {
        JsonSettings::from_pairs([
            ("PostgreSQL/connections/selected", json!("prod")),
            ("PostgreSQL/connections/prod/host", json!("")),
            ("PostgreSQL/connections/prod/port", json!(5433)),
            ("PostgreSQL/connections/prod/database", json!("giswater")),
            ("PostgreSQL/connections/prod/username", json!("alice")),
            ("PostgreSQL/connections/prod/password", json!("pw")),
            ("PostgreSQL/connections/prod/sslmode", json!(3)),
        ])
    }

    #[test]
    fn test_profile_credentials() {
        let settings = sample();
        assert_eq!(selected_connection(&settings).as_deref(), Some("prod"));

        let creds = profile_credentials(&settings, "prod");
        assert_eq!(creds.host.as_deref(), Some("localhost"));
        assert_eq!(creds.port, Some(5433));
        assert_eq!(creds.db.as_deref(), Some("giswater"));
        assert_eq!(creds.user.as_deref(), Some("alice"));
        assert!(creds.service.is_none());
        assert_eq!(profile_sslmode(&settings, "prod"), Some(SslMode::Require));
    }

    #[test]
    fn test_has_group() {
        let settings = sample();
        assert!(settings.has_group(CONNECTIONS_GROUP));
        assert!(!settings.has_group("PostgreSQL/other"));
        assert!(!JsonSettings::new().has_group(CONNECTIONS_GROUP));
    }

    #[test]
    fn test_save_and_load_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = JsonSettings::load(&path).unwrap();
        save_profile(&mut settings, "dev", &Credentials::new("h", 5432, "d", "u", "p"));
        settings.save().unwrap();

        let loaded = JsonSettings::load(&path).unwrap();
        assert_eq!(selected_connection(&loaded).as_deref(), Some("dev"));
        assert_eq!(profile_credentials(&loaded, "dev").port, Some(5432));
    }

    #[test]
    fn test_load_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();

        let err = JsonSettings::load(&path).unwrap_err();
        assert!(err.message().contains("Invalid settings file format"));
    }

    #[test]
    fn test_save_without_path_fails() {
        assert!(JsonSettings::new().save().is_err());
    }
}
