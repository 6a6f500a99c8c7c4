//! Installing and driving a systemd unit.

use std::{
    fs,
    io::{self, Write as _},
    os::unix::fs::PermissionsExt as _,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use tempfile::NamedTempFile;
use thiserror::Error as ThisError;
use tracing::info;

use crate::process::{CommandError, run_checked};

/// Default directory for locally installed unit files.
pub const UNIT_DIR: &str = "/etc/systemd/system";

/// Unit files are world readable, root writable.
const UNIT_FILE_MODE: u32 = 0o644;

/// Errors while installing or controlling a unit.
#[derive(Debug, ThisError)]
pub enum ServiceError {
    #[error("Failed to write unit file {path:?}")]
    WriteUnit {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Writes `content` as the unit file `service_name` into `unit_dir`, replacing it atomically.
pub fn install_unit(
    unit_dir: &Path,
    service_name: &str,
    content: &str,
) -> Result<PathBuf, ServiceError> {
    let service_file_path = unit_dir.join(service_name);
    let map_err = |source| ServiceError::WriteUnit {
        path: service_file_path.clone(),
        source,
    };

    fs::create_dir_all(unit_dir).map_err(map_err)?;
    let mut service_file = NamedTempFile::new_in(unit_dir).map_err(map_err)?;
    service_file
        .write_all(content.as_bytes())
        .map_err(map_err)?;
    service_file
        .as_file()
        .set_permissions(fs::Permissions::from_mode(UNIT_FILE_MODE))
        .map_err(map_err)?;
    service_file
        .persist(&service_file_path)
        .map_err(|e| map_err(e.error))?;

    info!("Wrote systemd unit to {service_file_path:?}");
    Ok(service_file_path)
}

/// Makes systemd pick up changed unit files.
pub fn daemon_reload() -> Result<(), ServiceError> {
    run_checked(Command::new("systemctl").arg("daemon-reload"))?;
    Ok(())
}

/// Returns `true` if the unit is currently active.
#[must_use]
pub fn is_active(service_name: &str) -> bool {
    Command::new("systemctl")
        .args(["is-active", "--quiet", service_name])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

/// Starts the unit.
pub fn start(service_name: &str) -> Result<(), ServiceError> {
    run_checked(Command::new("systemctl").args(["start", service_name]))?;
    info!("Service {service_name} started.");
    Ok(())
}

/// Asks the running unit to reload its configuration.
pub fn reload(service_name: &str) -> Result<(), ServiceError> {
    run_checked(Command::new("systemctl").args(["reload", service_name]))?;
    info!("Service {service_name} reloaded.");
    Ok(())
}
