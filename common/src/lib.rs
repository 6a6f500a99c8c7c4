//! Host-level building blocks for provisioning a WSGI application service.
//!
//! This crate provides:
//! - The line-oriented environment file store (`/etc/environment` style)
//! - Database relation resolution and connection URL assembly
//! - The bounded-retry health verifier
//! - Checked process execution, user management and systemd service helpers
#![expect(
    clippy::missing_errors_doc,
    reason = "The situation it maps to errors should be obvious."
)]

extern crate alloc;
extern crate core;

pub mod env_file;
pub mod health;
pub mod process;
pub mod relation;
pub mod service_install;
pub mod user;

pub use env_file::{EnvFileError, EnvironmentRecord, parse_assignments};
pub use health::{HealthPolicy, ServiceNotResponding, is_port_open, wait_until_responding};
pub use process::{CommandError, RunAs, run_checked};
pub use relation::{DatabaseKind, DatabaseRelation, build_url, build_url_host, resolve};
pub use service_install::is_superuser;
pub use user::{UserError, ensure_user};

/// Returns `true` if the system uses systemd (detects `/run/systemd/system`).
#[must_use]
pub fn is_systemd() -> bool {
    std::path::Path::new("/run/systemd/system").exists()
}
