//! The provisioning handlers: bootstrap, configure, source staging, the
//! provisioning pass that (re)starts the application service, and the port
//! fan-out to consumers.
//!
//! Handlers only touch the machine through [`Host`] and only remember things
//! through the [`AgentState`] in their [`Context`].

use core::fmt::Display;
use std::path::PathBuf;

use tracing::{debug, info};
use wsgi_provision_common::{
    DatabaseKind, DatabaseRelation, EnvironmentRecord, HealthPolicy, build_url, resolve,
    wait_until_responding,
};

use crate::{
    config::{LayerConfig, OperatorConfig},
    error::ProvisionError,
    events::{Event, EventKind},
    host::{Host, Invocation},
    state::{AgentState, ReadinessFlag, Status, StatusKind},
    unit::{SERVICE_NAME, ServiceContext},
};

/// Packages every application needs.
pub const SYSTEM_PACKAGES: [&str; 3] = ["python3-pip", "python3-setuptools", "gunicorn3"];

/// Python dependency manifest, relative to the application root.
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

/// Key of the connection URL in the environment file.
pub const DATABASE_URL: &str = "DATABASE_URL";

/// Flags that must all hold before a provisioning pass may run.
pub const PROVISION_GUARD: [ReadinessFlag; 3] = [
    ReadinessFlag::Configured,
    ReadinessFlag::SystemReady,
    ReadinessFlag::SourceAvailable,
];

/// Everything read from disk before an event is handled.
#[derive(Debug, Clone)]
pub struct Settings {
    pub layer: LayerConfig,
    pub config: OperatorConfig,
    pub env_file: PathBuf,
    pub health: HealthPolicy,
}

impl Settings {
    fn environment(&self) -> EnvironmentRecord {
        EnvironmentRecord::new(&self.env_file)
    }
}

/// What a handler gets to work with.
pub struct Context<'run, H> {
    pub host: &'run H,
    pub settings: &'run Settings,
    pub state: &'run mut AgentState,
}

impl<H> Context<'_, H> {
    pub fn status(&mut self, kind: StatusKind, message: impl Display) {
        let message = format!("[wsgi] {message}");
        info!("{message}");
        self.state.status = Status { kind, message };
    }
}

/// Installs the base packages and makes sure the service user exists.
#[tracing::instrument(skip_all)]
pub fn system_dependencies<H: Host>(
    ctx: &mut Context<'_, H>,
    _event: &Event,
) -> Result<(), ProvisionError> {
    ctx.status(StatusKind::Maintenance, "Setting up dependencies");
    info!("Installing system dependencies");
    ctx.host.install_packages(&SYSTEM_PACKAGES)?;

    let username = &ctx.settings.layer.username;
    info!("Ensuring the user {username} exists");
    ctx.host.ensure_user(username)?;

    ctx.state.flags.set(ReadinessFlag::SystemReady);
    Ok(())
}

/// Installs the operator's extra packages and applies the declared environment.
#[tracing::instrument(skip_all)]
pub fn configure_dependencies<H: Host>(
    ctx: &mut Context<'_, H>,
    _event: &Event,
) -> Result<(), ProvisionError> {
    ctx.status(StatusKind::Maintenance, "Installing configured dependencies");
    let config = &ctx.settings.config;
    ctx.host.install_packages(&config.extra_packages())?;

    let environment = config.environment()?;
    info!(
        "Setting environment variables in {}",
        ctx.settings.env_file.display()
    );
    ctx.settings.environment().merge(&environment)?;

    ctx.state.flags.set(ReadinessFlag::Configured);
    Ok(())
}

#[tracing::instrument(skip_all)]
pub fn source_available<H: Host>(
    ctx: &mut Context<'_, H>,
    _event: &Event,
) -> Result<(), ProvisionError> {
    info!("Application source is available");
    ctx.state.flags.set(ReadinessFlag::SourceAvailable);
    Ok(())
}

/// Records or forgets a database relation, then provisions again if everything else is in place.
#[tracing::instrument(skip_all, fields(event = %event.kind, relation = %event.relation_id))]
pub fn database_changed<H: Host>(
    ctx: &mut Context<'_, H>,
    event: &Event,
) -> Result<(), ProvisionError> {
    let EventKind::Database(kind, phase) = event.kind else {
        return Ok(());
    };

    let records = ctx.state.relations.entry(kind).or_default();
    if phase.is_detaching() {
        if records.remove(&event.relation_id).is_some() {
            info!("Detached {kind} relation {}", event.relation_id);
        }
    } else {
        records.insert(event.relation_id.clone(), event.attributes.clone());
    }
    if records.is_empty() {
        ctx.state.relations.remove(&kind);
    }

    if ctx.state.flags.all_set(&PROVISION_GUARD) {
        start_application_service(ctx, event)?;
    }
    Ok(())
}

/// Tracks which consumers are attached; the port itself is sent by [`send_port`].
#[tracing::instrument(skip_all, fields(event = %event.kind, relation = %event.relation_id))]
pub fn consumer_changed<H: Host>(
    ctx: &mut Context<'_, H>,
    event: &Event,
) -> Result<(), ProvisionError> {
    let EventKind::Consumer(phase) = event.kind else {
        return Ok(());
    };

    if phase.is_detaching() {
        if ctx.state.consumers.remove(&event.relation_id).is_some() {
            info!("Consumer {} detached", event.relation_id);
        }
    } else {
        ctx.state
            .consumers
            .entry(event.relation_id.clone())
            .or_insert(None);
    }
    Ok(())
}

/// Usable relation records of one kind, in relation id order.
fn relations(state: &AgentState, kind: DatabaseKind) -> Vec<DatabaseRelation> {
    state
        .relations_of(kind)
        .filter_map(DatabaseRelation::from_attributes)
        .collect()
}

fn install_requirements<H: Host>(ctx: &Context<'_, H>) -> Result<(), ProvisionError> {
    let settings = ctx.settings;
    let root = &settings.layer.application_root;
    if !root.join(REQUIREMENTS_FILE).is_file() {
        info!("No {REQUIREMENTS_FILE} in {}", root.display());
        return Ok(());
    }

    let mut args = vec!["install".to_owned()];
    if let Some(cache_dir) = settings.config.pip_cache_dir.as_ref() {
        info!("Installing pip dependencies from {}", cache_dir.display());
        args.extend([
            "--no-index".to_owned(),
            "--find-links".to_owned(),
            cache_dir.to_string_lossy().into_owned(),
        ]);
    } else {
        info!("Installing pip dependencies from PyPI");
    }
    args.extend(["--requirement".to_owned(), REQUIREMENTS_FILE.to_owned()]);

    let mut env = settings.environment().read()?;
    env.insert("LC_ALL".to_owned(), "C.UTF-8".to_owned());
    ctx.host
        .run(&Invocation::new("pip3", args, root.clone()).env(env))?;
    Ok(())
}

/// Stores the connection URL of the winning database and provisions it, or removes a stale URL.
fn configure_database<H: Host>(ctx: &mut Context<'_, H>) -> Result<(), ProvisionError> {
    info!("Checking for database connection");
    let settings = ctx.settings;
    let env_store = settings.environment();

    let postgres = relations(ctx.state, DatabaseKind::Postgres);
    let mongo = relations(ctx.state, DatabaseKind::Mongo);
    let Some((kind, relation)) = resolve(&postgres, &mongo) else {
        info!("No database attached");
        env_store.delete(DATABASE_URL)?;
        return Ok(());
    };

    match relation.port {
        Some(port) => info!("Using {kind} database at {}:{port}", relation.host),
        None => info!("Using {kind} database at {}", relation.host),
    }
    env_store.merge(&[(DATABASE_URL, build_url(kind, relation))])?;

    let Some((program, args)) = settings
        .config
        .provision_argv()
        .and_then(|argv| argv.split_first().map(|(&program, args)| (program, args.to_vec())))
    else {
        return Ok(());
    };

    ctx.status(StatusKind::Maintenance, "Provisioning database");
    let run_as = ctx.host.ensure_user(&settings.layer.username)?;
    let invocation = Invocation::new(program, args, settings.layer.application_root.clone())
        .env(env_store.read()?)
        .run_as(run_as);
    ctx.host.run(&invocation)?;
    Ok(())
}

/// One provisioning pass: dependencies, database, unit file, (re)start and health verification.
///
/// Consumes `source-available`, so a pass runs at most once per staged source.
#[tracing::instrument(skip_all)]
pub fn start_application_service<H: Host>(
    ctx: &mut Context<'_, H>,
    _event: &Event,
) -> Result<(), ProvisionError> {
    let settings = ctx.settings;
    let host = ctx.host;
    let port = settings.config.port;

    ctx.state.flags.clear(ReadinessFlag::SourceAvailable);
    ctx.state.flags.clear(ReadinessFlag::Available);

    ctx.status(StatusKind::Maintenance, "Installing application dependencies");
    install_requirements(ctx)?;
    ctx.state.flags.set(ReadinessFlag::Ready);

    configure_database(ctx)?;

    ctx.status(StatusKind::Maintenance, format_args!("Opening port {port}"));
    ctx.state.opened_ports.insert(port);

    ctx.status(StatusKind::Maintenance, "Preparing daemon");
    let username = &settings.layer.username;
    let unit = ServiceContext {
        application_root: settings.layer.application_root.clone(),
        env_file: settings.env_file.clone(),
        wsgi_module: settings.config.wsgi_module.clone(),
        user: username.clone(),
        group: username.clone(),
        port,
        env: settings.environment().read()?,
    }
    .render();
    host.install_unit(SERVICE_NAME, &unit)?;
    host.daemon_reload()?;

    if host.is_running(SERVICE_NAME) {
        info!("Reloading {SERVICE_NAME}");
        host.reload(SERVICE_NAME)?;
    } else {
        info!("Starting {SERVICE_NAME}");
        host.start(SERVICE_NAME)?;
    }

    wait_until_responding(
        port,
        settings.health,
        || host.is_running(SERVICE_NAME) && host.is_port_open(port),
        |pause| host.sleep(pause),
    )?;

    ctx.status(
        StatusKind::Active,
        format_args!("Service started on port {port}"),
    );
    ctx.state.flags.set(ReadinessFlag::Available);
    Ok(())
}

/// Announces the service port to every attached consumer that has not seen it yet.
#[tracing::instrument(skip_all)]
pub fn send_port<H: Host>(ctx: &mut Context<'_, H>, _event: &Event) -> Result<(), ProvisionError> {
    let port = ctx.settings.config.port;
    for (consumer, announced) in &mut ctx.state.consumers {
        if *announced != Some(port) {
            info!("Announcing port {port} to {consumer}");
            *announced = Some(port);
        }
    }
    if ctx.state.consumers.is_empty() {
        debug!("Service available on port {port}, no consumer attached");
    }
    Ok(())
}
