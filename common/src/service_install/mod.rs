//! Service supervisor helpers.

pub mod systemd;

/// Returns `true` if the current process is running as superuser (root).
#[must_use]
pub fn is_superuser() -> bool {
    nix::unistd::geteuid().is_root()
}
