//! pgsession CLI Entry Point
//!
//! Subcommands:
//! - `resolve` - Resolve credentials from the project layer or settings, without connecting
//! - `connect` - Resolve, open both handles and report the session
//! - `query` - Connect and run one SQL statement through the query façade
//! - `service` - Show a `pg_service.conf` section
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pgsession::config::settings::{self, JsonSettings};
use pgsession::config::{self, SessionConfig};
use pgsession::credentials::layer::Project;
use pgsession::credentials::resolve::CredentialSources;
use pgsession::credentials::service_file::ServiceFileLocator;
use pgsession::credentials::PromptCredentials;
use pgsession::engine::postgres::{PgBackend, PgUiRegistry};
use pgsession::{
    resolve_credentials, ConnectionSession, ErrorEnvelope, ErrorInfo, Metadata, QueryOptions,
    SessionError, SqlParam, SuccessEnvelope, TracingReporter,
};

/// pgsession - PostgreSQL sessions for GIS desktop plugins
#[derive(Parser)]
#[command(name = "pgsession")]
#[command(about = "Resolve PostgreSQL credentials and manage plugin database sessions")]
#[command(version)]
struct Cli {
    /// Session config file (default: .pgsession/config.json, then the global config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Persisted connection settings file (JSON)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Project layers file (JSON)
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Table name of the layer carrying the credentials
    #[arg(long, global = true)]
    layer: Option<String>,

    /// Never prompt for logins
    #[arg(long, global = true)]
    no_prompt: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve credentials without connecting
    Resolve,

    /// Open both handles and report the session
    Connect {
        /// Save the connected credentials as this settings profile
        #[arg(long)]
        save_profile: Option<String>,
    },

    /// Run one SQL statement
    Query {
        /// SQL with `%s` placeholders
        #[arg(long)]
        sql: String,

        /// Value for a `%s` placeholder (repeatable)
        #[arg(long = "param")]
        params: Vec<String>,

        /// Run as a statement instead of fetching rows
        #[arg(long)]
        execute: bool,
    },

    /// Show a pg_service.conf section
    Service {
        /// Service name
        name: String,
    },
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Connect { .. } => "connect",
            Self::Query { .. } => "query",
            Self::Service { .. } => "service",
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let command = cli.command.name();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            init_tracing("info");
            exit_with_error(command, &e.into());
        }
    };
    init_tracing(&config.log_level);

    match run(cli, config).await {
        Ok(output) => println!("{output}"),
        Err(e) => exit_with_error(command, &e),
    }
}

fn init_tracing(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

fn exit_with_error(command: &str, err: &anyhow::Error) -> ! {
    let envelope = match err.downcast_ref::<SessionError>() {
        Some(session_err) => ErrorEnvelope::from_error(command, session_err),
        None => ErrorEnvelope::new(command, ErrorInfo::new("INTERNAL_ERROR", format!("{err:#}"))),
    };
    match serde_json::to_string(&envelope) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("failed to serialize error envelope: {e}"),
    }
    std::process::exit(1);
}

fn load_config(cli: &Cli) -> pgsession::Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?.ok_or_else(|| {
            SessionError::config_error(format!("Config file not found: {}", path.display()))
        })?,
        None => config::load_with_precedence()?,
    };
    if let Some(layer) = &cli.layer {
        config.layer_name.clone_from(layer);
    }
    if let Some(settings) = &cli.settings {
        config.settings_path = Some(settings.clone());
    }
    Ok(config)
}

fn load_project(path: &Path) -> anyhow::Result<Project> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("could not read project file {}", path.display()))?;
    let project = serde_json::from_str(&contents).map_err(|e| {
        SessionError::invalid_input(format!("Invalid project file format: {e}"))
    })?;
    Ok(project)
}

fn build_session(config: &SessionConfig, no_prompt: bool) -> ConnectionSession<PgUiRegistry, PgBackend> {
    let session = ConnectionSession::new(config.clone(), PgUiRegistry::new(), PgBackend)
        .with_reporter(Arc::new(TracingReporter));
    if no_prompt {
        session
    } else {
        session.with_provider(PromptCredentials::new())
    }
}

async fn run(cli: Cli, config: SessionConfig) -> anyhow::Result<String> {
    let start = Instant::now();
    let elapsed = || u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    let project = cli.project.as_deref().map(load_project).transpose()?;
    let mut settings = JsonSettings::load(&config.settings_file()?)?;
    let command = cli.command.name();

    let output = match cli.command {
        Commands::Resolve => {
            let services = ServiceFileLocator::from_env();
            let sources = CredentialSources {
                project: project.as_ref(),
                layer_name: &config.layer_name,
                settings: Some(&settings),
                services: &services,
            };
            let resolved = resolve_credentials(&sources, config.sslmode_default)?;
            let data = json!({
                "credentials": resolved.credentials.redacted(),
                "origin": resolved.origin,
                "not_version": resolved.not_version(),
            });
            serde_json::to_string(&SuccessEnvelope::new(command, data, Metadata::new(elapsed())))?
        }

        Commands::Connect { save_profile } => {
            let mut session = build_session(&config, cli.no_prompt);
            let outcome = session.set_database_connection(project.as_ref(), Some(&settings)).await?;

            if let Some(profile) = save_profile {
                settings::save_profile(&mut settings, &profile, &outcome.credentials);
                settings.save()?;
                info!(profile = %profile, "connection profile saved");
            }

            let pid = session.query_handle().and_then(|h| h.pid());
            let data = json!({
                "logged": outcome.logged,
                "not_version": outcome.not_version,
                "credentials": outcome.credentials.redacted(),
                "uri": session.uri().map(|u| u.to_string()),
                "schema_name": session.state().schema_name.clone(),
            });
            session.disconnect();
            serde_json::to_string(&SuccessEnvelope::new(
                command,
                data,
                Metadata::new(elapsed()).with_pid(pid),
            ))?
        }

        Commands::Query { sql, params, execute } => {
            let mut session = build_session(&config, cli.no_prompt);
            session.set_database_connection(project.as_ref(), Some(&settings)).await?;
            session.ensure_connection().await?;

            let params: Vec<SqlParam> = params.into_iter().map(SqlParam::from).collect();
            let opts = QueryOptions::default();
            let pid = session.query_handle().and_then(|h| h.pid());

            let (data, rows) = if execute {
                if !session.execute(&sql, &params, &opts).await {
                    return Err(query_failure(session.state().last_error.as_deref()).into());
                }
                (json!({ "executed": true }), None)
            } else {
                let rows = session.get_rows(&sql, &params, &opts).await;
                if rows.is_none() && session.state().last_error.is_some() {
                    return Err(query_failure(session.state().last_error.as_deref()).into());
                }
                let rows = rows.unwrap_or_default();
                let count = rows.len();
                (json!({ "rows": rows }), Some(count))
            };
            session.disconnect();

            let mut meta = Metadata::new(elapsed()).with_pid(pid);
            if let Some(count) = rows {
                meta = meta.with_rows(count);
            }
            serde_json::to_string(&SuccessEnvelope::new(command, data, meta))?
        }

        Commands::Service { name } => {
            let section = ServiceFileLocator::from_env().lookup(&name);
            let data = json!({ "service": name, "section": section });
            serde_json::to_string(&SuccessEnvelope::new(command, data, Metadata::new(elapsed())))?
        }
    };

    Ok(output)
}

fn query_failure(last_error: Option<&str>) -> SessionError {
    SessionError::query_error(last_error.unwrap_or("statement failed"))
}
