//! Checked execution of external commands.

use core::fmt;
use std::{
    io,
    os::unix::process::CommandExt as _,
    process::{Command, ExitStatus},
};

use nix::unistd::User;
use thiserror::Error as ThisError;
use tracing::debug;

/// An external command could not be run or exited unsuccessfully.
#[derive(Debug, ThisError)]
pub enum CommandError {
    #[error("Failed to spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` exited unsuccessfully ({status})")]
    Failed { command: String, status: ExitStatus },
}

/// Credentials a child process is demoted to before it executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunAs {
    pub uid: u32,
    pub gid: u32,
}

impl From<&User> for RunAs {
    fn from(user: &User) -> Self {
        Self {
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
        }
    }
}

impl RunAs {
    /// Makes `command` drop to these credentials when it is spawned.
    pub fn apply(self, command: &mut Command) -> &mut Command {
        command.gid(self.gid).uid(self.uid)
    }
}

/// Displays a command the way it would be typed into a shell (without quoting).
struct Printable<'cmd>(&'cmd Command);

impl fmt::Display for Printable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.get_program().to_string_lossy())?;
        for arg in self.0.get_args() {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Runs `command` to completion, failing on spawn errors and non-zero exit.
///
/// Output is inherited, so it ends up wherever the agent's own output goes.
pub fn run_checked(command: &mut Command) -> Result<(), CommandError> {
    let printable = Printable(command).to_string();
    debug!("Running `{printable}`");
    let status = command.status().map_err(|source| CommandError::Spawn {
        command: printable.clone(),
        source,
    })?;
    if status.success() {
        Ok(())
    } else {
        Err(CommandError::Failed {
            command: printable,
            status,
        })
    }
}
