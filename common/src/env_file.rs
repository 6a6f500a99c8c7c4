//! Line-oriented `KEY=VALUE` environment file store.
//!
//! The file is treated as an ordered record: lines that look like shell
//! assignments are addressable by key, everything else (comments, blank
//! lines, `export` statements) is carried through verbatim on write-back.
//! Every mutation is a full read-modify-write, persisted atomically.

use alloc::collections::BTreeMap;
use std::{
    fs,
    io::{self, Write as _},
    os::unix::fs::PermissionsExt as _,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;
use tempfile::NamedTempFile;
use thiserror::Error as ThisError;

/// Matches the key of a line that is a plain shell variable assignment.
#[expect(clippy::unwrap_used, reason = "the pattern is a literal")]
static ASSIGNMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)=").unwrap());

/// Mode used when the environment file does not exist yet.
const NEW_FILE_MODE: u32 = 0o644;

/// Errors raised while reading or rewriting an environment file.
#[derive(Debug, ThisError)]
pub enum EnvFileError {
    #[error("Failed to read environment file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write environment file {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid variable declaration {0:?}, expected KEY=VALUE")]
    InvalidAssignment(String),
}

/// Splits a line into `(key, value)` if it is a variable assignment.
fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let captures = ASSIGNMENT.captures(line)?;
    let key = captures.get(1)?.as_str();
    let value = line.get(key.len() + 1..)?.trim_end();
    Some((key, value))
}

/// Returns `true` if `key` is usable as an environment variable name.
fn is_identifier(key: &str) -> bool {
    split_assignment(&format!("{key}=")).is_some_and(|(parsed, _)| parsed == key)
}

/// Parses a whitespace separated declaration string like `var1=val1 var2=val2`.
///
/// The value may itself contain `=`; only the first one separates key from value.
/// Declaration order is kept, a repeated key keeps its first position but takes the last value.
pub fn parse_assignments(declarations: &str) -> Result<Vec<(String, String)>, EnvFileError> {
    let mut parsed: Vec<(String, String)> = Vec::new();
    for declaration in declarations.split_whitespace() {
        let Some((key, value)) = declaration.split_once('=') else {
            return Err(EnvFileError::InvalidAssignment(declaration.to_owned()));
        };
        if !is_identifier(key) {
            return Err(EnvFileError::InvalidAssignment(declaration.to_owned()));
        }
        upsert(&mut parsed, key, value);
    }
    Ok(parsed)
}

fn upsert(entries: &mut Vec<(String, String)>, key: &str, value: &str) {
    match entries.iter_mut().find(|entry| entry.0 == key) {
        Some(entry) => value.clone_into(&mut entry.1),
        None => entries.push((key.to_owned(), value.to_owned())),
    }
}

/// An environment file on disk.
///
/// Only a single writer is assumed; callers serialize access (see the agent's state lock).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentRecord {
    path: PathBuf,
}

impl EnvironmentRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw lines of the file. A missing file has no lines.
    fn lines(&self) -> Result<Vec<String>, EnvFileError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.lines().map(str::to_owned).collect()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(EnvFileError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Reads all variable assignments. Later duplicates win.
    pub fn read(&self) -> Result<BTreeMap<String, String>, EnvFileError> {
        Ok(self
            .lines()?
            .iter()
            .filter_map(|line| split_assignment(line))
            .map(|(key, value)| (key.to_owned(), value.to_owned()))
            .collect())
    }

    /// Looks up a single variable.
    pub fn get(&self, key: &str) -> Result<Option<String>, EnvFileError> {
        Ok(self.read()?.remove(key))
    }

    /// Merges `updates` into the file and returns the resulting lines.
    ///
    /// Existing keys are rewritten in place; unknown keys are appended in the order given.
    pub fn merge<K, V>(&self, updates: &[(K, V)]) -> Result<Vec<String>, EnvFileError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut pending: Vec<(String, String)> = Vec::with_capacity(updates.len());
        for &(ref key, ref value) in updates {
            upsert(&mut pending, key.as_ref(), value.as_ref());
        }

        let mut found = vec![false; pending.len()];
        let mut lines: Vec<String> = self
            .lines()?
            .into_iter()
            .map(|line| {
                let replacement = split_assignment(&line).and_then(|(key, _)| {
                    pending.iter().position(|entry| entry.0 == key)
                });
                match replacement {
                    Some(index) => {
                        if let Some(flag) = found.get_mut(index) {
                            *flag = true;
                        }
                        pending
                            .get(index)
                            .map_or(line, |&(ref key, ref value)| format!("{key}={value}"))
                    }
                    None => line,
                }
            })
            .collect();

        lines.extend(
            pending
                .iter()
                .zip(&found)
                .filter(|&(_, &was_found)| !was_found)
                .map(|(&(ref key, ref value), _)| format!("{key}={value}")),
        );

        self.write_lines(&lines)?;
        Ok(lines)
    }

    /// Removes every assignment of `key` and returns the resulting lines.
    pub fn delete(&self, key: &str) -> Result<Vec<String>, EnvFileError> {
        let prefix = format!("{key}=");
        let lines: Vec<String> = self
            .lines()?
            .into_iter()
            .filter(|line| !line.starts_with(&prefix))
            .collect();
        self.write_lines(&lines)?;
        Ok(lines)
    }

    /// Replaces the file contents atomically, keeping the permissions of an existing file.
    fn write_lines(&self, lines: &[String]) -> Result<(), EnvFileError> {
        let map_err = |source| EnvFileError::Write {
            path: self.path.clone(),
            source,
        };
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mode = fs::metadata(&self.path)
            .map(|meta| meta.permissions().mode())
            .unwrap_or(NEW_FILE_MODE);

        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }

        let mut tmp = NamedTempFile::new_in(dir).map_err(map_err)?;
        tmp.write_all(content.as_bytes()).map_err(map_err)?;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(mode))
            .map_err(map_err)?;
        tmp.persist(&self.path).map_err(|e| map_err(e.error))?;
        Ok(())
    }
}
