//! Common utilities for integration tests.
//!
//! Every test gets its own temporary directory holding the state file, environment
//! file, configs and unit directory, so the agent never touches the real system paths.

use std::{
    fs,
    path::PathBuf,
    process::{Command, Output},
};

use tempfile::TempDir;

pub fn get_agent_bin() -> &'static str {
    env!("CARGO_BIN_EXE_host_agent")
}

/// Temporary locations for everything the agent reads and writes.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn state_file(&self) -> PathBuf {
        self.path("state.json")
    }

    pub fn env_file(&self) -> PathBuf {
        self.path("environment")
    }

    pub fn config_file(&self) -> PathBuf {
        self.path("config.toml")
    }

    pub fn write_config(&self, content: &str) {
        fs::write(self.config_file(), content).expect("failed to write config");
    }

    pub fn write_state(&self, state: &serde_json::Value) {
        fs::write(self.state_file(), state.to_string()).expect("failed to write state");
    }

    pub fn read_state(&self) -> serde_json::Value {
        let content = fs::read_to_string(self.state_file()).expect("state file missing");
        serde_json::from_str(&content).expect("state file is not JSON")
    }
}

/// Runs the agent binary against the workspace paths and waits for it.
pub fn run_agent(workspace: &Workspace, args: &[&str]) -> Output {
    Command::new(get_agent_bin())
        .args(args)
        .env("WSGI_PROVISION_STATE_FILE", workspace.state_file())
        .env("WSGI_PROVISION_ENV_FILE", workspace.env_file())
        .env("WSGI_PROVISION_CONFIG", workspace.config_file())
        .env("WSGI_PROVISION_LAYER_CONFIG", workspace.path("wsgi.toml"))
        .env("WSGI_PROVISION_SERVICE_DIR", workspace.path("system"))
        .env("WSGI_PROVISION_INTEGRATION_TEST", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run host_agent")
}
