//! A recording stand-in for the machine, used by the handler tests.

use core::{
    cell::{Cell, RefCell},
    time::Duration,
};
use std::{
    fs,
    os::unix::process::ExitStatusExt as _,
    path::{Path, PathBuf},
    process::ExitStatus,
};

use wsgi_provision_common::{
    CommandError, HealthPolicy, RunAs, UserError, service_install::systemd::ServiceError,
};

use crate::{
    config::{LayerConfig, OperatorConfig},
    host::{Host, Invocation},
    provision::Settings,
};

/// Credentials handed out for every service user.
pub const SERVICE_USER: RunAs = RunAs {
    uid: 1001,
    gid: 1002,
};

#[derive(Debug)]
pub struct FakeHost {
    pub packages: RefCell<Vec<Vec<String>>>,
    pub users: RefCell<Vec<String>>,
    pub invocations: RefCell<Vec<Invocation>>,
    pub units: RefCell<Vec<(String, String)>>,
    /// `daemon-reload`, `start <unit>` and `reload <unit>`, in call order.
    pub service_actions: RefCell<Vec<String>>,
    pub running: Cell<bool>,
    /// The probe on which the port starts accepting connections, `None` for never.
    pub port_opens_on_probe: Cell<Option<u32>>,
    pub probes: Cell<u32>,
    pub sleeps: RefCell<Vec<Duration>>,
    /// Invocations of this program exit with status 1.
    pub failing_program: RefCell<Option<String>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            packages: RefCell::default(),
            users: RefCell::default(),
            invocations: RefCell::default(),
            units: RefCell::default(),
            service_actions: RefCell::default(),
            running: Cell::new(false),
            port_opens_on_probe: Cell::new(Some(1)),
            probes: Cell::new(0),
            sleeps: RefCell::default(),
            failing_program: RefCell::default(),
        }
    }
}

impl Host for FakeHost {
    fn install_packages(&self, packages: &[&str]) -> Result<(), CommandError> {
        if !packages.is_empty() {
            self.packages
                .borrow_mut()
                .push(packages.iter().map(|&p| p.to_owned()).collect());
        }
        Ok(())
    }

    fn ensure_user(&self, name: &str) -> Result<RunAs, UserError> {
        self.users.borrow_mut().push(name.to_owned());
        Ok(SERVICE_USER)
    }

    fn run(&self, invocation: &Invocation) -> Result<(), CommandError> {
        self.invocations.borrow_mut().push(invocation.clone());
        if self.failing_program.borrow().as_deref() == Some(invocation.program.as_str()) {
            return Err(CommandError::Failed {
                command: invocation.program.clone(),
                status: ExitStatus::from_raw(1 << 8),
            });
        }
        Ok(())
    }

    fn install_unit(&self, service_name: &str, content: &str) -> Result<PathBuf, ServiceError> {
        self.units
            .borrow_mut()
            .push((service_name.to_owned(), content.to_owned()));
        Ok(PathBuf::from("/etc/systemd/system").join(service_name))
    }

    fn daemon_reload(&self) -> Result<(), ServiceError> {
        self.service_actions
            .borrow_mut()
            .push("daemon-reload".to_owned());
        Ok(())
    }

    fn is_running(&self, _service_name: &str) -> bool {
        self.running.get()
    }

    fn start(&self, service_name: &str) -> Result<(), ServiceError> {
        self.service_actions
            .borrow_mut()
            .push(format!("start {service_name}"));
        self.running.set(true);
        Ok(())
    }

    fn reload(&self, service_name: &str) -> Result<(), ServiceError> {
        self.service_actions
            .borrow_mut()
            .push(format!("reload {service_name}"));
        Ok(())
    }

    fn is_port_open(&self, _port: u16) -> bool {
        let probe = self.probes.get() + 1;
        self.probes.set(probe);
        self.port_opens_on_probe
            .get()
            .is_some_and(|opens_on| probe >= opens_on)
    }

    fn sleep(&self, pause: Duration) {
        self.sleeps.borrow_mut().push(pause);
    }
}

/// Settings rooted in `dir`: the application lives in `dir/app`, the environment file is `dir/environment`.
pub fn settings_in(dir: &Path) -> Settings {
    let application_root = dir.join("app");
    fs::create_dir_all(&application_root).unwrap();
    Settings {
        layer: LayerConfig {
            application_root,
            ..LayerConfig::default()
        },
        config: OperatorConfig::default(),
        env_file: dir.join("environment"),
        health: HealthPolicy::default(),
    }
}
