//! Configuration Management
//!
//! This module loads the session configuration and hosts the persisted
//! connection settings store ([`settings`]).
//!
//! # Configuration Locations
//! - Local: `.pgsession/config.json` (per-project)
//! - Global: `~/.config/pgsession/config.json` (per-user)
//!
//! # Resolution Precedence
//! 1. Local config file
//! 2. Global config file
//! 3. Built-in defaults
//!
//! Missing keys in a file take their default value.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::credentials::SslMode;
use crate::error::{Result, SessionError};

pub mod settings;

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Registry name of the UI-bound connection
    pub plugin_name: String,

    /// Layer whose data source provides the credentials
    pub layer_name: String,

    /// SSL mode used when no source defines one
    pub sslmode_default: SslMode,

    /// Extra connection attempts after the first one (layer credentials only)
    pub max_attempts: u32,

    /// Whether user/password are written into layer URIs
    pub store_credentials: bool,

    /// Persisted connection settings file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings_path: Option<PathBuf>,

    /// Default tracing filter when `RUST_LOG` is not set
    pub log_level: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            plugin_name: "pgsession".to_string(),
            layer_name: "v_edit_node".to_string(),
            sslmode_default: SslMode::Prefer,
            max_attempts: 2,
            store_credentials: true,
            settings_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl SessionConfig {
    /// Settings file to use: the configured one, or `settings.json` next to the global config
    pub fn settings_file(&self) -> Result<PathBuf> {
        match &self.settings_path {
            Some(p) => Ok(p.clone()),
            None => Ok(global_config_dir()?.join("settings.json")),
        }
    }
}

/// Directory of the global configuration (`~/.config/pgsession`)
pub fn global_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| SessionError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("pgsession"))
}

/// Get path to global config file (`~/.config/pgsession/config.json`)
pub fn global_config_path() -> Result<PathBuf> {
    Ok(global_config_dir()?.join("config.json"))
}

/// Get path to local config file (`.pgsession/config.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        SessionError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".pgsession").join("config.json"))
}

/// Load a config file; a missing file yields `None`
pub fn load_config(path: &Path) -> Result<Option<SessionConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| SessionError::config_error(format!("Could not read config file: {e}")))?;

    serde_json::from_str::<SessionConfig>(&contents)
        .map(Some)
        .map_err(|e| SessionError::config_error(format!("Invalid config file format: {e}")))
}

/// Save a config file, creating its directory
pub fn save_config(path: &Path, config: &SessionConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            SessionError::config_error(format!("Could not create config directory: {e}"))
        })?;
    }

    let contents = serde_json::to_string_pretty(config)
        .map_err(|e| SessionError::config_error(format!("Could not serialize config: {e}")))?;

    fs::write(path, contents)
        .map_err(|e| SessionError::config_error(format!("Could not write config file: {e}")))
}

/// Load configuration with precedence (local first, then global, then defaults)
pub fn load_with_precedence() -> Result<SessionConfig> {
    if let Some(local) = load_config(&local_config_path()?)? {
        return Ok(local);
    }
    if let Some(global) = load_config(&global_config_path()?)? {
        return Ok(global);
    }
    Ok(SessionConfig::default())
}
