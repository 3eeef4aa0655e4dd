//! Layer data-source URIs
//!
//! Builds the connection part of a descriptor for layers loaded from the
//! connected database, from the credentials of the current session.

use serde::Serialize;
use std::fmt;

use super::layer::quote_value;
use super::{Credentials, SslMode};

/// Connection part of a layer data-source descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataSourceUri {
    pub service: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db: Option<String>,
    pub user: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub sslmode: SslMode,
}

impl DataSourceUri {
    /// URI for `credentials`; user and password are left out when `store_credentials` is false
    ///
    /// Service credentials always carry their login. Only `prefer`, `disable`,
    /// `require` and `allow` are kept; other SSL modes become `prefer`.
    #[must_use]
    pub fn from_credentials(credentials: &Credentials, store_credentials: bool) -> Self {
        let sslmode = match credentials.sslmode {
            Some(mode @ (SslMode::Disable | SslMode::Allow | SslMode::Prefer | SslMode::Require)) => mode,
            _ => SslMode::Prefer,
        };

        if let Some(service) = &credentials.service {
            return Self {
                service: Some(service.clone()),
                host: None,
                port: None,
                db: credentials.db.clone(),
                user: credentials.user.clone(),
                password: credentials.password.clone(),
                sslmode,
            };
        }

        let (user, password) = if store_credentials {
            (credentials.user.clone(), credentials.password.clone())
        } else {
            (None, None)
        };

        Self {
            service: None,
            host: credentials.host.clone(),
            port: credentials.port,
            db: credentials.db.clone(),
            user,
            password,
            sslmode,
        }
    }

    /// Descriptor string including the password
    #[must_use]
    pub fn connection_string(&self) -> String {
        self.render(true)
    }

    fn render(&self, with_password: bool) -> String {
        let mut parts = Vec::new();
        if let Some(service) = &self.service {
            parts.push(format!("service={}", quote_value(service)));
        }
        if let Some(db) = &self.db {
            parts.push(format!("dbname={}", quote_value(db)));
        }
        if let Some(host) = &self.host {
            parts.push(format!("host={}", quote_value(host)));
        }
        if let Some(port) = self.port {
            parts.push(format!("port={port}"));
        }
        if let Some(user) = self.user.as_deref().filter(|u| !u.is_empty()) {
            parts.push(format!("user={}", quote_value(user)));
        }
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            if with_password {
                parts.push(format!("password={}", quote_value(password)));
            } else {
                parts.push("password=********".to_string());
            }
        }
        parts.push(format!("sslmode={}", self.sslmode));
        parts.join(" ")
    }
}

/// Redacted form, safe for logs
impl fmt::Display for DataSourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::layer::parse_descriptor;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_host_uri_with_stored_credentials() {
        let mut creds = Credentials::new("db1", 5432, "giswater", "alice", "s3cret");
        creds.sslmode = Some(SslMode::Require);
        let uri = DataSourceUri::from_credentials(&creds, true);

        assert_eq!(
            uri.connection_string(),
            "dbname=giswater host=db1 port=5432 user=alice password=s3cret sslmode=require"
        );
        assert_eq!(
            uri.to_string(),
            "dbname=giswater host=db1 port=5432 user=alice password=******** sslmode=require"
        );
    }

    #[test]
    fn test_host_uri_without_stored_credentials() {
        let creds = Credentials::new("db1", 5432, "giswater", "alice", "s3cret");
        let uri = DataSourceUri::from_credentials(&creds, false);
        assert_eq!(uri.connection_string(), "dbname=giswater host=db1 port=5432 sslmode=prefer");
    }

    #[test]
    fn test_service_uri_and_unsupported_sslmode() {
        let mut creds = Credentials::service("gw");
        creds.sslmode = Some(SslMode::VerifyFull);
        let uri = DataSourceUri::from_credentials(&creds, false);
        assert_eq!(uri.connection_string(), "service=gw sslmode=prefer");
    }

    #[test]
    fn test_uri_parses_back_as_descriptor() {
        let mut creds = Credentials::new("db1", 5433, "gis water", "alice", "p w");
        creds.sslmode = Some(SslMode::Disable);
        let parsed = parse_descriptor(&DataSourceUri::from_credentials(&creds, true).connection_string())
            .unwrap();

        assert_eq!(parsed.db.as_deref(), Some("gis water"));
        assert_eq!(parsed.port, Some(5433));
        assert_eq!(parsed.password.as_deref(), Some("p w"));
        assert_eq!(parsed.sslmode, Some(SslMode::Disable));
    }
}
