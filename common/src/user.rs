//! Service account lookup with create-on-miss.

use std::process::Command;

use nix::unistd::User;
use thiserror::Error as ThisError;
use tracing::info;

use crate::process::{CommandError, run_checked};

/// Errors while resolving the service account.
#[derive(Debug, ThisError)]
pub enum UserError {
    #[error("Failed to look up user {name}")]
    Lookup {
        name: String,
        #[source]
        source: nix::Error,
    },
    #[error("Failed to create user {name}")]
    Create {
        name: String,
        #[source]
        source: CommandError,
    },
    #[error("User {0} still does not exist after creating it")]
    Missing(String),
}

fn lookup(name: &str) -> Result<Option<User>, UserError> {
    User::from_name(name).map_err(|source| UserError::Lookup {
        name: name.to_owned(),
        source,
    })
}

/// Returns the named user, creating it with `useradd` first if it does not exist.
pub fn ensure_user(name: &str) -> Result<User, UserError> {
    ensure_user_with(name, |name| run_checked(Command::new("useradd").arg(name)))
}

/// Like [`ensure_user`], with the account creation step supplied by the caller.
pub fn ensure_user_with<C>(name: &str, create: C) -> Result<User, UserError>
where
    C: FnOnce(&str) -> Result<(), CommandError>,
{
    if let Some(user) = lookup(name)? {
        return Ok(user);
    }

    info!("User {name} does not exist, creating it");
    create(name).map_err(|source| UserError::Create {
        name: name.to_owned(),
        source,
    })?;

    lookup(name)?.ok_or_else(|| UserError::Missing(name.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_user_is_not_created() {
        let user = ensure_user_with("root", |_| panic!("root always exists")).unwrap();
        assert_eq!(user.uid.as_raw(), 0);
    }

    #[test]
    fn creation_that_does_not_materialize_is_missing() {
        let mut created = Vec::new();
        let err = ensure_user_with("wsgi-provision-test-nobody", |name| {
            created.push(name.to_owned());
            Ok(())
        })
        .unwrap_err();
        assert_eq!(created, ["wsgi-provision-test-nobody"]);
        assert!(matches!(err, UserError::Missing(ref name) if name == "wsgi-provision-test-nobody"));
    }

    #[test]
    fn creation_failure_is_reported() {
        let err = ensure_user_with("wsgi-provision-test-nobody", |_| {
            run_checked(&mut Command::new("false"))
        })
        .unwrap_err();
        assert!(matches!(err, UserError::Create { .. }));
    }
}
