//! Credential resolution
//!
//! Picks the credential source and settles the SSL mode:
//!
//! 1. A project layer named by the session config (its descriptor string)
//! 2. The selected profile of the persisted settings
//!
//! SSL mode chain: explicit value on the source, then the service file section
//! (when a service is named), then the selected settings profile, then the
//! caller default. Unrecognised codes at any step fall through to the next.

use serde::Serialize;
use tracing::{info, warn};

use super::layer::Project;
use super::service_file::ServiceFileLocator;
use super::{Credentials, SslMode};
use crate::config::settings::{self, SettingsStore, CONNECTIONS_GROUP};
use crate::error::{Result, SessionError};

/// Everything the resolver may read from
#[derive(Clone, Copy)]
pub struct CredentialSources<'a> {
    /// Layers of the open project, if any
    pub project: Option<&'a Project>,
    /// Table name of the layer carrying the credentials
    pub layer_name: &'a str,
    /// Persisted settings, if the host application has any
    pub settings: Option<&'a dyn SettingsStore>,
    pub services: &'a ServiceFileLocator,
}

/// Where resolved credentials came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CredentialOrigin {
    /// A project layer; `conn_info` keys the credentials provider
    Layer { layer: String, conn_info: String },
    /// A settings profile
    Settings { profile: String },
}

/// Resolver output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedCredentials {
    pub credentials: Credentials,
    pub origin: CredentialOrigin,
}

impl ResolvedCredentials {
    /// True when no project layer was found, so no project version is known
    #[must_use]
    pub const fn not_version(&self) -> bool {
        matches!(self.origin, CredentialOrigin::Settings { .. })
    }
}

/// Resolve credentials from the layer, else from the selected settings profile
pub fn resolve_credentials(
    sources: &CredentialSources<'_>,
    sslmode_default: SslMode,
) -> Result<ResolvedCredentials> {
    let layer = sources.project.and_then(|p| p.layer_by_tablename(sources.layer_name, None));
    let settings = sources.settings.filter(|s| s.has_group(CONNECTIONS_GROUP));

    if let Some(layer) = layer {
        let mut credentials = layer.credentials()?;
        credentials.sslmode = Some(resolve_sslmode(
            credentials.sslmode,
            credentials.service.as_deref(),
            sources.services,
            settings,
            sslmode_default,
        ));
        let conn_info = layer.connection_info()?;
        return Ok(ResolvedCredentials {
            credentials,
            origin: CredentialOrigin::Layer { layer: layer.name.clone(), conn_info },
        });
    }

    let Some(settings) = settings else {
        warn!(layer = sources.layer_name, "layer not found and no connection settings");
        return Err(SessionError::credentials_unavailable(format!(
            "Layer not found: '{}'",
            sources.layer_name
        )));
    };

    let Some(profile) = settings::selected_connection(settings) else {
        warn!("Error getting default connection (settings)");
        return Err(SessionError::credentials_unavailable("Error getting default connection"));
    };

    let mut credentials = settings::profile_credentials(settings, &profile);
    credentials.sslmode = Some(resolve_sslmode(
        None,
        credentials.service.as_deref(),
        sources.services,
        Some(settings),
        sslmode_default,
    ));

    Ok(ResolvedCredentials { credentials, origin: CredentialOrigin::Settings { profile } })
}

/// Walk the SSL mode fallback chain
#[must_use]
pub fn resolve_sslmode(
    explicit: Option<SslMode>,
    service: Option<&str>,
    services: &ServiceFileLocator,
    settings: Option<&dyn SettingsStore>,
    default: SslMode,
) -> SslMode {
    if let Some(mode) = explicit {
        return mode;
    }

    if let Some(service) = service {
        info!(service, "Getting sslmode from .pg_service file");
        if let Some(mode) = services.lookup(service).sslmode.and_then(|s| s.parse().ok()) {
            return mode;
        }
    }

    if let Some(settings) = settings {
        if let Some(mode) = settings::selected_connection(settings)
            .and_then(|profile| settings::profile_sslmode(settings, &profile))
        {
            return mode;
        }
    }

    default
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::JsonSettings;
    use crate::credentials::layer::Layer;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Write;

    fn no_services() -> ServiceFileLocator {
        ServiceFileLocator::default()
    }

    #[test]
    fn test_no_layer_no_settings_fails() {
        let services = no_services();
        let sources = CredentialSources {
            project: None,
            layer_name: "v_edit_node",
            settings: None,
            services: &services,
        };
        let err = resolve_credentials(&sources, SslMode::Prefer).unwrap_err();
        assert_eq!(
            err,
            SessionError::credentials_unavailable("Layer not found: 'v_edit_node'")
        );
    }

    #[test]
    fn test_settings_without_selected_fails() {
        let services = no_services();
        let settings =
            JsonSettings::from_pairs([("PostgreSQL/connections/prod/host", json!("db1"))]);
        let sources = CredentialSources {
            project: None,
            layer_name: "v_edit_node",
            settings: Some(&settings),
            services: &services,
        };
        let err = resolve_credentials(&sources, SslMode::Prefer).unwrap_err();
        assert_eq!(err.detail(), "Error getting default connection");
    }

    #[test]
    fn test_layer_wins_over_settings() {
        let services = no_services();
        let project = Project::new(vec![Layer::postgres(
            "Node",
            "dbname=gw host=db1 port=5432 user=u password=p table=\"ws\".\"v_edit_node\"",
        )]);
        let settings = JsonSettings::from_pairs([
            ("PostgreSQL/connections/selected", json!("prod")),
            ("PostgreSQL/connections/prod/sslmode", json!("SslRequire")),
        ]);
        let sources = CredentialSources {
            project: Some(&project),
            layer_name: "v_edit_node",
            settings: Some(&settings),
            services: &services,
        };

        let resolved = resolve_credentials(&sources, SslMode::Prefer).unwrap();
        assert!(!resolved.not_version());
        assert_eq!(resolved.credentials.schema.as_deref(), Some("ws"));
        assert_eq!(resolved.credentials.sslmode, Some(SslMode::Require));
        assert_eq!(
            resolved.origin,
            CredentialOrigin::Layer {
                layer: "Node".into(),
                conn_info: "dbname=gw host=db1 port=5432".into()
            }
        );
    }

    #[test]
    fn test_settings_profile_unknown_sslmode_uses_default() {
        let services = no_services();
        let settings = JsonSettings::from_pairs([
            ("PostgreSQL/connections/selected", json!("prod")),
            ("PostgreSQL/connections/prod/database", json!("gw")),
            ("PostgreSQL/connections/prod/sslmode", json!(7)),
        ]);
        let sources = CredentialSources {
            project: None,
            layer_name: "v_edit_node",
            settings: Some(&settings),
            services: &services,
        };

        let resolved = resolve_credentials(&sources, SslMode::Disable).unwrap();
        assert!(resolved.not_version());
        assert_eq!(resolved.credentials.sslmode, Some(SslMode::Disable));
        assert_eq!(resolved.credentials.host.as_deref(), Some("localhost"));
    }

    #[test]
    fn test_sslmode_from_service_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[gw]\nhost=db1\nsslmode=verify-full\n").unwrap();
        let services = ServiceFileLocator::new(Some(file.path().to_path_buf()), None);

        let mode = resolve_sslmode(None, Some("gw"), &services, None, SslMode::Prefer);
        assert_eq!(mode, SslMode::VerifyFull);
    }

    #[test]
    fn test_explicit_sslmode_wins() {
        let mode =
            resolve_sslmode(Some(SslMode::Allow), Some("gw"), &no_services(), None, SslMode::Prefer);
        assert_eq!(mode, SslMode::Allow);
    }
}
