//! Errors that abort a provisioning pass.

use thiserror::Error as ThisError;
use wsgi_provision_common::{
    CommandError, EnvFileError, ServiceNotResponding, UserError, service_install::systemd::ServiceError,
};

/// Anything that stops a handler from completing its transition.
#[derive(Debug, ThisError)]
pub enum ProvisionError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    EnvFile(#[from] EnvFileError),
    #[error(transparent)]
    User(#[from] UserError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    NotResponding(#[from] ServiceNotResponding),
}
