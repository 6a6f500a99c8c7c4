//! Persisted agent state: readiness flags, attached relations, consumers and status.
//!
//! Every event is handled against a freshly loaded [`AgentState`], which is written
//! back atomically afterwards. Concurrent invocations are serialized through an
//! advisory lock next to the state file.

use alloc::collections::{BTreeMap, BTreeSet};
use core::fmt;
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write as _},
    os::unix::fs::PermissionsExt as _,
    path::{Path, PathBuf},
};

use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error as ThisError;
use tracing::debug;
use wsgi_provision_common::DatabaseKind;

/// The state file may carry database passwords.
const STATE_FILE_MODE: u32 = 0o600;

/// A named readiness fact gating the provisioning transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadinessFlag {
    /// Base packages are installed and the service user exists.
    SystemReady,
    /// Operator dependencies and environment are applied.
    Configured,
    /// Application source has been staged; consumed by each provisioning pass.
    SourceAvailable,
    /// Application dependencies are installed.
    Ready,
    /// The service has been verified to be listening.
    Available,
}

impl ReadinessFlag {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SystemReady => "system-ready",
            Self::Configured => "configured",
            Self::SourceAvailable => "source-available",
            Self::Ready => "ready",
            Self::Available => "available",
        }
    }
}

impl fmt::Display for ReadinessFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of readiness flags currently holding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvisioningState {
    flags: BTreeSet<ReadinessFlag>,
}

impl ProvisioningState {
    pub fn set(&mut self, flag: ReadinessFlag) {
        if self.flags.insert(flag) {
            debug!("Set {flag}");
        }
    }

    pub fn clear(&mut self, flag: ReadinessFlag) {
        if self.flags.remove(&flag) {
            debug!("Cleared {flag}");
        }
    }

    #[must_use]
    pub fn is_set(&self, flag: ReadinessFlag) -> bool {
        self.flags.contains(&flag)
    }

    #[must_use]
    pub fn all_set(&self, flags: &[ReadinessFlag]) -> bool {
        flags.iter().all(|&flag| self.is_set(flag))
    }

    pub fn iter(&self) -> impl Iterator<Item = ReadinessFlag> + '_ {
        self.flags.iter().copied()
    }
}

impl<const N: usize> From<[ReadinessFlag; N]> for ProvisioningState {
    fn from(flags: [ReadinessFlag; N]) -> Self {
        Self {
            flags: BTreeSet::from(flags),
        }
    }
}

/// Raw attributes published over one relation.
pub type RelationAttributes = BTreeMap<String, String>;

/// Operator-visible status category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    #[default]
    Unknown,
    Maintenance,
    Active,
    Error,
}

/// The last status reported to the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub kind: StatusKind,
    pub message: String,
}

/// Everything the agent remembers between two events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    #[serde(default)]
    pub flags: ProvisioningState,
    /// Attached databases, by kind and then by relation id.
    #[serde(default)]
    pub relations: BTreeMap<DatabaseKind, BTreeMap<String, RelationAttributes>>,
    /// Attached consumers and the port last announced to them.
    #[serde(default)]
    pub consumers: BTreeMap<String, Option<u16>>,
    #[serde(default)]
    pub opened_ports: BTreeSet<u16>,
    #[serde(default)]
    pub status: Status,
}

/// Relation attributes that are never shown to the operator.
const SECRET_ATTRIBUTES: &[&str] = &["password"];

const REDACTED: &str = "[redacted]";

/// Sort key for relation ids of the form `name:N`, numeric on `N`.
///
/// Ids without a numeric suffix fall back to plain string order.
fn relation_id_key(id: &str) -> (&str, Option<u64>, &str) {
    match id.rsplit_once(':') {
        Some((name, number)) => (name, number.parse().ok(), id),
        None => (id, None, id),
    }
}

impl AgentState {
    /// Relation records of one kind, ordered by relation id.
    pub fn relations_of(&self, kind: DatabaseKind) -> impl Iterator<Item = &RelationAttributes> {
        let mut records: Vec<_> = self
            .relations
            .get(&kind)
            .into_iter()
            .flat_map(BTreeMap::iter)
            .collect();
        records.sort_by(|&(a, _), &(b, _)| relation_id_key(a).cmp(&relation_id_key(b)));
        records.into_iter().map(|(_, attributes)| attributes)
    }

    /// A copy safe to print: secret relation attributes are masked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut state = self.clone();
        state
            .relations
            .values_mut()
            .flat_map(BTreeMap::values_mut)
            .flat_map(|attributes| attributes.iter_mut())
            .filter(|(key, _)| SECRET_ATTRIBUTES.contains(&key.as_str()))
            .for_each(|(_, value)| *value = REDACTED.to_owned());
        state
    }
}

/// Errors while loading, saving or locking the state file.
#[derive(Debug, ThisError)]
pub enum StateError {
    #[error("Failed to read state file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse state file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to write state file {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to lock {path:?}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Exclusive hold on the state file, released on drop.
#[derive(Debug)]
pub struct StateLock {
    _lock: Flock<File>,
}

/// The JSON file backing [`AgentState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Blocks until this process is the only one handling an event.
    pub fn lock(&self) -> Result<StateLock, StateError> {
        let path = self.lock_path();
        let map_err = |source| StateError::Lock {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(map_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(map_err)?;
        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| map_err(io::Error::from(errno)))?;
        debug!("Acquired {path:?}");
        Ok(StateLock { _lock: lock })
    }

    /// Loads the state. A missing file yields the empty default state.
    pub fn load(&self) -> Result<AgentState, StateError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(AgentState::default()),
            Err(source) => {
                return Err(StateError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_str(&content).map_err(|source| StateError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Persists the state atomically.
    pub fn save(&self, state: &AgentState) -> Result<(), StateError> {
        let map_err = |source| StateError::Write {
            path: self.path.clone(),
            source,
        };
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(map_err)?;

        let content = serde_json::to_vec_pretty(state).map_err(|e| map_err(io::Error::other(e)))?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(map_err)?;
        tmp.write_all(&content).map_err(map_err)?;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(STATE_FILE_MODE))
            .map_err(map_err)?;
        tmp.persist(&self.path).map_err(|e| map_err(e.error))?;
        Ok(())
    }
}
