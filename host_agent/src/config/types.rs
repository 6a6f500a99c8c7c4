//! Configuration data types.

use std::path::PathBuf;

use serde::Deserialize;
use wsgi_provision_common::{EnvFileError, parse_assignments};

/// Operator-facing settings, re-read on every event.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Extra system packages, whitespace separated.
    #[serde(default)]
    pub apt_dependencies: String,
    /// Environment variable declarations, `KEY=VALUE` pairs separated by whitespace.
    #[serde(default)]
    pub environment_variables: String,
    /// TCP port the application listens on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// WSGI entry point handed to gunicorn, e.g. `app:application`.
    #[serde(default = "default_wsgi_module")]
    pub wsgi_module: String,
    /// Install Python dependencies offline from this wheel directory instead of the package index.
    #[serde(default)]
    pub pip_cache_dir: Option<PathBuf>,
    /// Command run as the service user whenever a database is attached, e.g. `python3 manage.py migrate`.
    #[serde(default)]
    pub provision_command: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            apt_dependencies: String::new(),
            environment_variables: String::new(),
            port: default_port(),
            wsgi_module: default_wsgi_module(),
            pip_cache_dir: None,
            provision_command: None,
        }
    }
}

const fn default_port() -> u16 {
    8080
}

fn default_wsgi_module() -> String {
    "app:application".to_string()
}

impl OperatorConfig {
    #[must_use]
    pub fn extra_packages(&self) -> Vec<&str> {
        self.apt_dependencies.split_whitespace().collect()
    }

    /// The declared environment variables, in declaration order.
    pub fn environment(&self) -> Result<Vec<(String, String)>, EnvFileError> {
        parse_assignments(&self.environment_variables)
    }

    /// The provisioning command split into program and arguments, if one is configured.
    #[must_use]
    pub fn provision_argv(&self) -> Option<Vec<&str>> {
        let argv: Vec<&str> = self.provision_command.as_deref()?.split_whitespace().collect();
        (!argv.is_empty()).then_some(argv)
    }
}

/// Where the application lives and who runs it. Fixed for the lifetime of an invocation.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LayerConfig {
    #[serde(default = "default_application_root")]
    pub application_root: PathBuf,
    #[serde(default = "default_username")]
    pub username: String,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            application_root: default_application_root(),
            username: default_username(),
        }
    }
}

fn default_application_root() -> PathBuf {
    PathBuf::from("/srv")
}

fn default_username() -> String {
    "wsgi".to_string()
}
