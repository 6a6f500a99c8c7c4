//! Configuration loading utilities.

use std::{fs, io, path::Path};

use eyre::WrapErr as _;
use serde::de::DeserializeOwned;
use tracing::info;

/// Reads and parses a TOML config file, falling back to defaults if it does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default<T, P>(path: P) -> eyre::Result<T>
where
    T: DeserializeOwned + Default,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("No config at {}, using defaults", path.display());
            return Ok(T::default());
        }
        Err(e) => {
            return Err(e).wrap_err(format!(
                "Failed to read config file at: {}",
                path.display()
            ));
        }
    };
    toml::from_str(&content).wrap_err(format!(
        "Failed to parse config as TOML at: {}",
        path.display()
    ))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::{LayerConfig, OperatorConfig};

    #[test]
    fn load_layer_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wsgi.toml");
        fs::write(
            &path,
            r#"
            application_root = "/opt/blog"
            username = "blog"
            "#,
        )
        .unwrap();
        let layer: LayerConfig = load_or_default(&path).unwrap();
        assert_eq!(layer.application_root, PathBuf::from("/opt/blog"));
        assert_eq!(layer.username, "blog");
    }

    #[test]
    fn layer_config_keeps_unset_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wsgi.toml");
        fs::write(&path, r#"username = "blog""#).unwrap();
        let layer: LayerConfig = load_or_default(&path).unwrap();
        assert_eq!(layer.application_root, PathBuf::from("/srv"));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config: OperatorConfig = load_or_default(dir.path().join("does_not_exist.toml")).unwrap();
        assert_eq!(config, OperatorConfig::default());
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "not valid toml").unwrap();
        let res: eyre::Result<OperatorConfig> = load_or_default(&path);
        assert!(res.is_err(), "Expected error for invalid TOML");
    }

    #[test]
    fn wrong_types_are_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, r#"port = "eighty""#).unwrap();
        let res: eyre::Result<OperatorConfig> = load_or_default(&path);
        assert!(res.is_err(), "Expected error for a non-numeric port");
    }
}
