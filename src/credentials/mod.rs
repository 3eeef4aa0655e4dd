//! Credential Types and Sources
//!
//! Credentials are rebuilt on every connection attempt from one of three sources:
//! - [`layer`] - the data-source descriptor of a project layer
//! - [`crate::config::settings`] - the last selected profile in persisted settings
//! - [`service_file`] - a section of `pg_service.conf`
//!
//! [`resolve`] chooses between them and computes the SSL mode fallback chain;
//! [`uri`] turns the connected credentials back into a layer descriptor.
//! [`CredentialsProvider`] is the seam to whatever asks the user for a login
//! (a dialog in the host application, a terminal prompt, or a test double).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub mod layer;
pub mod resolve;
pub mod service_file;
pub mod uri;

/// Connection parameters for one attempt
///
/// Every field is optional; `None` means the source did not define it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// WARNING: Sensitive data, do not log or include in error messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sslmode: Option<SslMode>,
}

impl Credentials {
    /// Host/port credentials with every connection field set
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        db: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
            db: Some(db.into()),
            user: Some(user.into()),
            password: Some(password.into()),
            ..Self::default()
        }
    }

    /// Credentials that only name a service
    #[must_use]
    pub fn service(name: impl Into<String>) -> Self {
        Self { service: Some(name.into()), ..Self::default() }
    }

    /// Names of the host-path fields that are missing
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.host.is_none() {
            missing.push("host");
        }
        if self.port.is_none() {
            missing.push("port");
        }
        if self.db.is_none() {
            missing.push("database");
        }
        if self.user.is_none() {
            missing.push("user");
        }
        if self.password.is_none() {
            missing.push("password");
        }
        missing
    }

    /// Copy with the password removed, for output and logs
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self { password: self.password.as_ref().map(|_| "********".to_string()), ..self.clone() }
    }
}

/// libpq `sslmode` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    Allow,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Allow => "allow",
            Self::Prefer => "prefer",
            Self::Require => "require",
            Self::VerifyCa => "verify-ca",
            Self::VerifyFull => "verify-full",
        }
    }

    /// Map an SSL code stored in persisted settings
    ///
    /// Settings may hold the numeric enum (`0`, `1`, `3`), the enum name
    /// (`SslPrefer`, ...) or a plain mode name. Anything outside the
    /// recognised set yields `None` so the caller can apply its default.
    #[must_use]
    pub fn from_settings_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => match n.as_i64()? {
                0 => Some(Self::Prefer),
                1 => Some(Self::Disable),
                3 => Some(Self::Require),
                _ => None,
            },
            serde_json::Value::String(s) => match s.as_str() {
                "0" => Some(Self::Prefer),
                "1" => Some(Self::Disable),
                "3" => Some(Self::Require),
                "SslPrefer" | "prefer" => Some(Self::Prefer),
                "SslDisable" | "disable" => Some(Self::Disable),
                "SslRequire" | "require" => Some(Self::Require),
                "SslAllow" | "allow" => Some(Self::Allow),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SslMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "disable" => Ok(Self::Disable),
            "allow" => Ok(Self::Allow),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            other => Err(format!("unknown sslmode '{other}'")),
        }
    }
}

/// Parse an SSL mode string, falling back to `default` when it is not recognised
#[must_use]
pub fn sslmode_or(value: Option<&str>, default: SslMode) -> SslMode {
    match value {
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            tracing::debug!(error = %e, fallback = %default, "unrecognised sslmode");
            default
        }),
        None => default,
    }
}

/// Login returned by a [`CredentialsProvider`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Login {
    /// Whether the user confirmed the prompt
    pub accepted: bool,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Source of user/password pairs keyed by a connection-info string
///
/// Mirrors a credential cache that forgets an entry when it is read:
/// callers `put` the login back right after a successful `get`.
pub trait CredentialsProvider {
    /// Ask for a login for `conn_info`, pre-filled with `user`/`password`
    fn get(
        &mut self,
        conn_info: &str,
        user: Option<&str>,
        password: Option<&str>,
        message: Option<&str>,
    ) -> Login;

    /// Store a login for later reuse
    fn put(&mut self, conn_info: &str, user: Option<&str>, password: Option<&str>);
}

/// Non-interactive provider backed by a map
///
/// `get` returns (and removes) a stored login, or echoes the pre-filled
/// values back unaccepted.
#[derive(Debug, Default, Clone)]
pub struct MemoryCredentials {
    store: HashMap<String, (Option<String>, Option<String>)>,
}

impl MemoryCredentials {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stored(&self, conn_info: &str) -> Option<&(Option<String>, Option<String>)> {
        self.store.get(conn_info)
    }
}

impl CredentialsProvider for MemoryCredentials {
    fn get(
        &mut self,
        conn_info: &str,
        user: Option<&str>,
        password: Option<&str>,
        _message: Option<&str>,
    ) -> Login {
        match self.store.remove(conn_info) {
            Some((user, password)) => Login { accepted: true, user, password },
            None => Login {
                accepted: false,
                user: user.map(String::from),
                password: password.map(String::from),
            },
        }
    }

    fn put(&mut self, conn_info: &str, user: Option<&str>, password: Option<&str>) {
        self.store
            .insert(conn_info.to_string(), (user.map(String::from), password.map(String::from)));
    }
}

/// Terminal prompt provider for the CLI
///
/// Logins put back are cached in memory and offered before prompting again.
#[derive(Debug, Default)]
pub struct PromptCredentials {
    cache: MemoryCredentials,
}

impl PromptCredentials {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialsProvider for PromptCredentials {
    fn get(
        &mut self,
        conn_info: &str,
        user: Option<&str>,
        password: Option<&str>,
        message: Option<&str>,
    ) -> Login {
        let cached = self.cache.get(conn_info, user, password, message);
        if cached.accepted {
            return cached;
        }

        let theme = dialoguer::theme::ColorfulTheme::default();
        let prompt = message.map_or_else(|| format!("Credentials for {conn_info}"), String::from);
        eprintln!("{prompt}");

        let mut input = dialoguer::Input::<String>::with_theme(&theme).with_prompt("User");
        if let Some(u) = user {
            input = input.default(u.to_string());
        }
        let user = match input.interact_text() {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!(error = %e, "credential prompt aborted");
                return Login { accepted: false, ..cached };
            }
        };

        let password = match dialoguer::Password::with_theme(&theme)
            .with_prompt("Password")
            .allow_empty_password(true)
            .interact()
        {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "credential prompt aborted");
                return Login { accepted: false, user: Some(user), password: cached.password };
            }
        };

        Login { accepted: true, user: Some(user), password: Some(password) }
    }

    fn put(&mut self, conn_info: &str, user: Option<&str>, password: Option<&str>) {
        self.cache.put(conn_info, user, password);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sslmode_settings_codes() {
        assert_eq!(SslMode::from_settings_value(&json!(0)), Some(SslMode::Prefer));
        assert_eq!(SslMode::from_settings_value(&json!(1)), Some(SslMode::Disable));
        assert_eq!(SslMode::from_settings_value(&json!(3)), Some(SslMode::Require));
        assert_eq!(SslMode::from_settings_value(&json!("SslAllow")), Some(SslMode::Allow));
        assert_eq!(SslMode::from_settings_value(&json!("require")), Some(SslMode::Require));
    }

    #[test]
    fn test_sslmode_settings_unknown_codes() {
        assert_eq!(SslMode::from_settings_value(&json!(2)), None);
        assert_eq!(SslMode::from_settings_value(&json!(4)), None);
        assert_eq!(SslMode::from_settings_value(&json!("SslVerifyFull")), None);
        assert_eq!(SslMode::from_settings_value(&json!(true)), None);
        assert_eq!(SslMode::from_settings_value(&serde_json::Value::Null), None);
    }

    #[test]
    fn test_sslmode_or_falls_back() {
        assert_eq!(sslmode_or(Some("bogus"), SslMode::Prefer), SslMode::Prefer);
        assert_eq!(sslmode_or(Some("verify-full"), SslMode::Prefer), SslMode::VerifyFull);
        assert_eq!(sslmode_or(None, SslMode::Disable), SslMode::Disable);
    }

    #[test]
    fn test_sslmode_serde_spelling() {
        assert_eq!(serde_json::to_string(&SslMode::VerifyCa).unwrap(), r#""verify-ca""#);
        let parsed: SslMode = serde_json::from_str(r#""require""#).unwrap();
        assert_eq!(parsed, SslMode::Require);
    }

    #[test]
    fn test_missing_fields() {
        let creds = Credentials { host: Some("db1".into()), port: Some(5432), ..Default::default() };
        assert_eq!(creds.missing_fields(), vec!["database", "user", "password"]);
        assert!(Credentials::new("h", 1, "d", "u", "p").missing_fields().is_empty());
    }

    #[test]
    fn test_redacted_hides_password() {
        let creds = Credentials::new("h", 1, "d", "u", "secret");
        let json = serde_json::to_string(&creds.redacted()).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("********"));
    }

    #[test]
    fn test_memory_provider_get_consumes_entry() {
        let mut provider = MemoryCredentials::new();
        provider.put("service='x'", Some("alice"), Some("pw"));

        let login = provider.get("service='x'", None, None, None);
        assert!(login.accepted);
        assert_eq!(login.user.as_deref(), Some("alice"));
        assert!(provider.stored("service='x'").is_none());

        let login = provider.get("service='x'", Some("bob"), None, None);
        assert!(!login.accepted);
        assert_eq!(login.user.as_deref(), Some("bob"));
    }
}
