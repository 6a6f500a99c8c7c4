//! The side effects the provisioning handlers have on the machine.

use alloc::collections::BTreeMap;
use core::time::Duration;
use std::{
    path::{Path, PathBuf},
    process::Command,
    thread,
};

use wsgi_provision_common::{
    CommandError, RunAs, UserError, ensure_user, is_port_open, run_checked,
    service_install::systemd::{self, ServiceError},
};

/// An external command, fully described before it is run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// The complete environment of the child; nothing is inherited.
    pub env: BTreeMap<String, String>,
    pub run_as: Option<RunAs>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I, cwd: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
            run_as: None,
        }
    }

    #[must_use]
    pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    #[must_use]
    pub fn run_as(mut self, run_as: RunAs) -> Self {
        self.run_as = Some(run_as);
        self
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.cwd)
            .env_clear()
            .envs(&self.env);
        if let Some(run_as) = self.run_as {
            run_as.apply(&mut command);
        }
        command
    }
}

/// Everything provisioning needs from the host it runs on.
pub trait Host {
    /// Installs system packages. An empty list is a no-op.
    fn install_packages(&self, packages: &[&str]) -> Result<(), CommandError>;
    /// Returns the credentials of the named account, creating it if needed.
    fn ensure_user(&self, name: &str) -> Result<RunAs, UserError>;
    fn run(&self, invocation: &Invocation) -> Result<(), CommandError>;
    fn install_unit(&self, service_name: &str, content: &str) -> Result<PathBuf, ServiceError>;
    fn daemon_reload(&self) -> Result<(), ServiceError>;
    fn is_running(&self, service_name: &str) -> bool;
    fn start(&self, service_name: &str) -> Result<(), ServiceError>;
    fn reload(&self, service_name: &str) -> Result<(), ServiceError>;
    fn is_port_open(&self, port: u16) -> bool;
    fn sleep(&self, pause: Duration);
}

/// The real machine: apt, useradd, systemd and TCP probes.
#[derive(Debug, Clone)]
pub struct SystemHost {
    unit_dir: PathBuf,
}

impl SystemHost {
    pub fn new(unit_dir: impl Into<PathBuf>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
        }
    }

    #[must_use]
    pub fn unit_dir(&self) -> &Path {
        &self.unit_dir
    }
}

impl Host for SystemHost {
    fn install_packages(&self, packages: &[&str]) -> Result<(), CommandError> {
        if packages.is_empty() {
            return Ok(());
        }
        run_checked(
            Command::new("apt-get")
                .args(["install", "--yes", "--option=Dpkg::Options::=--force-confold"])
                .args(packages)
                .env("DEBIAN_FRONTEND", "noninteractive"),
        )
    }

    fn ensure_user(&self, name: &str) -> Result<RunAs, UserError> {
        ensure_user(name).map(|user| RunAs::from(&user))
    }

    fn run(&self, invocation: &Invocation) -> Result<(), CommandError> {
        run_checked(&mut invocation.to_command())
    }

    fn install_unit(&self, service_name: &str, content: &str) -> Result<PathBuf, ServiceError> {
        systemd::install_unit(&self.unit_dir, service_name, content)
    }

    fn daemon_reload(&self) -> Result<(), ServiceError> {
        systemd::daemon_reload()
    }

    fn is_running(&self, service_name: &str) -> bool {
        systemd::is_active(service_name)
    }

    fn start(&self, service_name: &str) -> Result<(), ServiceError> {
        systemd::start(service_name)
    }

    fn reload(&self, service_name: &str) -> Result<(), ServiceError> {
        systemd::reload(service_name)
    }

    fn is_port_open(&self, port: u16) -> bool {
        is_port_open(port)
    }

    fn sleep(&self, pause: Duration) {
        thread::sleep(pause);
    }
}
