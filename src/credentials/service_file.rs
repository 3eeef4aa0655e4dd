//! `pg_service.conf` reader
//!
//! Service files are INI documents where each section name is a service and
//! the keys are libpq connection parameters. Two candidates are searched:
//! the file named by `PGSERVICEFILE`, then `$PGSYSCONFDIR/pg_service.conf`.
//! A service missing from both yields an empty [`ServiceCredentials`], never an error.

use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

/// Connection parameters read from one service section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceCredentials {
    pub host: Option<String>,
    pub port: Option<String>,
    pub dbname: Option<String>,
    pub user: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub sslmode: Option<String>,
}

impl ServiceCredentials {
    /// True when the section named a server (any of host, port or dbname)
    #[must_use]
    pub const fn has_location(&self) -> bool {
        self.host.is_some() || self.port.is_some() || self.dbname.is_some()
    }

    /// True when host, port and dbname are all present
    #[must_use]
    pub const fn has_full_location(&self) -> bool {
        self.host.is_some() && self.port.is_some() && self.dbname.is_some()
    }

    fn from_params(params: &HashMap<String, Option<String>>) -> Self {
        let get = |k: &str| params.get(k).cloned().flatten();
        Self {
            host: get("host"),
            port: get("port"),
            dbname: get("dbname"),
            user: get("user"),
            password: get("password"),
            sslmode: get("sslmode"),
        }
    }
}

/// Parsed INI document: section name -> (key -> value)
///
/// A bare key has no value and maps to `None`.
pub type Sections = HashMap<String, HashMap<String, Option<String>>>;

/// Parse a service file
///
/// Rules follow a lenient INI reader: `;` and `#` start comment lines, keys are
/// lower-cased, `=` or `:` separate key and value, repeated sections are merged
/// and later keys win. A key without a value is kept as absent.
/// Lines before the first section are ignored.
#[must_use]
pub fn parse_service_file(contents: &str) -> Sections {
    let mut sections: Sections = HashMap::new();
    let mut current: Option<String> = None;

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix('[') {
            if let Some(name) = rest.strip_suffix(']') {
                let name = name.trim().to_string();
                sections.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }
        }

        let Some(section) = current.as_ref() else {
            continue;
        };

        let (key, value) = match line.find(['=', ':']) {
            Some(pos) => (&line[..pos], Some(line[pos + 1..].trim().to_string())),
            None => (line, None),
        };

        if let Some(params) = sections.get_mut(section) {
            params.insert(key.trim().to_lowercase(), value);
        }
    }

    sections
}

/// Read one section from `path`
///
/// Missing or unreadable files and missing sections are logged and produce an
/// empty result.
#[must_use]
pub fn credentials_from_file(section: &str, path: &Path) -> ServiceCredentials {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read service file");
            return ServiceCredentials::default();
        }
    };

    let sections = parse_service_file(&contents);
    match sections.get(section) {
        Some(params) if params.is_empty() => {
            warn!(service = section, "no parameters found in section");
            ServiceCredentials::default()
        }
        Some(params) => ServiceCredentials::from_params(params),
        None => ServiceCredentials::default(),
    }
}

/// The two candidate service files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceFileLocator {
    /// Value of `PGSERVICEFILE`
    pub service_file: Option<PathBuf>,
    /// `$PGSYSCONFDIR/pg_service.conf`
    pub sysconf_file: Option<PathBuf>,
}

impl ServiceFileLocator {
    /// Build the locator from `PGSERVICEFILE` and `PGSYSCONFDIR`
    #[must_use]
    pub fn from_env() -> Self {
        let service_file = std::env::var_os("PGSERVICEFILE")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let sysconf_file = std::env::var_os("PGSYSCONFDIR")
            .filter(|v| !v.is_empty())
            .map(|dir| PathBuf::from(dir).join("pg_service.conf"));
        Self { service_file, sysconf_file }
    }

    #[must_use]
    pub fn new(service_file: Option<PathBuf>, sysconf_file: Option<PathBuf>) -> Self {
        Self { service_file, sysconf_file }
    }

    /// Look up `service`, trying `PGSERVICEFILE` first and the system file second
    #[must_use]
    pub fn lookup(&self, service: &str) -> ServiceCredentials {
        let existing = |p: &Option<PathBuf>| p.as_ref().filter(|p| p.exists()).cloned();
        let first = existing(&self.service_file);
        let second = existing(&self.sysconf_file);

        if first.is_none() && second.is_none() {
            warn!(
                "Files defined in environment variables 'PGSERVICEFILE' and 'PGSYSCONFDIR' not found."
            );
            return ServiceCredentials::default();
        }

        if let Some(path) = &first {
            let creds = credentials_from_file(service, path);
            if creds.has_location() {
                return creds;
            }
        }

        let Some(path) = second else {
            warn!(service, "connection not found in the service file");
            return ServiceCredentials::default();
        };

        info!(service, path = %path.display(), "trying system service file");
        let creds = credentials_from_file(service, &path);
        if !creds.has_location() {
            warn!(service, path = %path.display(), "connection not found in the service file");
        }
        creds
    }
}
