//! Fake library entry for the `host_agent` crate.
//!
//! Houses the command-line interface of the `host_agent` binary, which handles one
//! lifecycle or relation event per invocation and keeps a gunicorn-served WSGI
//! application provisioned accordingly.
#![expect(
    clippy::missing_errors_doc,
    reason = "The situation it maps to errors should be obvious."
)]

extern crate alloc;
extern crate core;

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod host;
pub mod provision;
pub mod state;
#[cfg(test)]
mod testing;
pub mod unit;

use core::time::Duration;
use std::{env, io, path::PathBuf, sync::Once};

use clap::{Args, Parser, Subcommand, ValueEnum};
use eyre::{Result, WrapErr as _};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal};
use wsgi_provision_common::{
    HealthPolicy,
    health::{DEFAULT_INTERVAL, DEFAULT_MAX_ATTEMPTS},
    is_superuser, is_systemd,
    service_install::systemd::UNIT_DIR,
};

use config::{LayerConfig, OperatorConfig, load_or_default};
use events::{Event, EventKind};
use host::SystemHost;
use provision::Settings;
use state::{StateStore, Status, StatusKind};

static INIT_TRACING: Once = Once::new();

/// Default location of the persisted agent state.
pub const DEFAULT_STATE_FILE: &str = "/var/lib/wsgi_provision/state.json";
/// Default location of the operator configuration.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/wsgi_provision/config.toml";
/// Default location of the layer descriptor, relative to the working directory.
pub const DEFAULT_LAYER_CONFIG_FILE: &str = "wsgi.toml";
/// Environment file shared with the application.
pub const DEFAULT_ENV_FILE: &str = "/etc/environment";

/// Top-level CLI parser for host_agent.
#[derive(Debug, Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    #[command(flatten)]
    pub paths: Paths,

    /// Log output format.
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Compact, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Files the agent reads and writes.
#[derive(Debug, Args)]
pub struct Paths {
    /// Persisted readiness flags, relations and status.
    #[arg(long, env = "WSGI_PROVISION_STATE_FILE", default_value = DEFAULT_STATE_FILE, global = true)]
    pub state_file: PathBuf,

    /// Environment file merged into the application's environment.
    #[arg(long, env = "WSGI_PROVISION_ENV_FILE", default_value = DEFAULT_ENV_FILE, global = true)]
    pub env_file: PathBuf,

    /// Operator configuration (TOML).
    #[arg(long, env = "WSGI_PROVISION_CONFIG", default_value = DEFAULT_CONFIG_FILE, global = true)]
    pub config: PathBuf,

    /// Layer descriptor with the application root and service user (TOML).
    #[arg(long, env = "WSGI_PROVISION_LAYER_CONFIG", default_value = DEFAULT_LAYER_CONFIG_FILE, global = true)]
    pub layer_config: PathBuf,

    /// Directory the systemd unit is written to.
    #[arg(long, env = "WSGI_PROVISION_SERVICE_DIR", default_value = UNIT_DIR, global = true)]
    pub service_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
    Pretty,
}

/// Subcommands available for host_agent execution.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Handle a single lifecycle or relation event.
    Dispatch(DispatchArgs),

    /// Print the persisted agent state as JSON.
    Status,
}

/// Arguments for the `dispatch` subcommand.
#[derive(Debug, Args)]
pub struct DispatchArgs {
    /// Event identifier, e.g. `install`, `config-changed` or `postgres-relation-joined`.
    pub event: EventKind,

    /// Identifier of the remote side for relation events, e.g. `postgres:0`.
    #[arg(long = "relation-id")]
    pub relation_id: Option<String>,

    /// Relation attribute published by the remote side; may be repeated.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_attribute)]
    pub attributes: Vec<(String, String)>,

    /// How often to probe the service before giving up.
    #[arg(long = "health-attempts", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub health_attempts: u32,

    /// Pause between two service probes.
    #[arg(long = "health-interval-secs", default_value_t = DEFAULT_INTERVAL.as_secs())]
    pub health_interval_secs: u64,
}

fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

fn init_tracing(log_format: LogFormat) {
    INIT_TRACING.call_once(move || {
        let default_level = if env::var("WSGI_PROVISION_INTEGRATION_TEST").is_ok() {
            "error"
        } else {
            "info"
        };

        let builder = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
            )
            .with_timer(ChronoLocal::rfc_3339())
            .with_writer(io::stderr);

        match log_format {
            LogFormat::Compact => builder.compact().init(),
            LogFormat::Json => builder.json().init(),
            LogFormat::Pretty => builder.pretty().init(),
        }
    });
}

fn load_settings(paths: &Paths, args: &DispatchArgs) -> Result<Settings> {
    let layer: LayerConfig = load_or_default(&paths.layer_config)?;
    let config: OperatorConfig = load_or_default(&paths.config)?;
    Ok(Settings {
        layer,
        config,
        env_file: paths.env_file.clone(),
        health: HealthPolicy {
            max_attempts: args.health_attempts,
            interval: Duration::from_secs(args.health_interval_secs),
        },
    })
}

fn run_dispatch(paths: &Paths, args: DispatchArgs) -> Result<()> {
    if !is_superuser() {
        warn!("Not running as root, provisioning is likely to fail");
    }
    if !is_systemd() {
        warn!("systemd does not seem to be running, the service cannot be managed");
    }

    let store = StateStore::new(&paths.state_file);
    let _lock = store.lock()?;
    let mut state = store.load()?;

    let settings = match load_settings(paths, &args) {
        Ok(settings) => settings,
        Err(e) => {
            state.status = Status {
                kind: StatusKind::Error,
                message: format!("{e:#}"),
            };
            store.save(&state)?;
            return Err(e);
        }
    };

    let event = Event::new(args.event).with_relation(
        args.relation_id,
        args.attributes.into_iter().collect(),
    );
    let host = SystemHost::new(&paths.service_dir);
    let result = dispatch::dispatch(&host, &settings, &mut state, &event);

    store.save(&state).wrap_err("Failed to persist agent state")?;
    result.wrap_err(format!("Failed to handle {}", event.kind))?;
    info!("Handled {}", event.kind);
    Ok(())
}

fn print_status(paths: &Paths) -> Result<()> {
    let state = StateStore::new(&paths.state_file).load()?;
    let json = serde_json::to_string_pretty(&state.redacted())
        .wrap_err("Failed to serialize agent state")?;
    println!("{json}");
    Ok(())
}

/// The host agent's main function; can be called from a shim binary.
///
/// Handles one event, or prints the persisted state.
///
/// # Errors
///
/// Returns an error if the state cannot be loaded or saved, the configuration is invalid,
/// or handling the event fails.
pub fn inner_main(invocation: Cli) -> Result<()> {
    init_tracing(invocation.log_format);
    match invocation.command {
        Command::Dispatch(args) => run_dispatch(&invocation.paths, args),
        Command::Status => print_status(&invocation.paths),
    }
}
