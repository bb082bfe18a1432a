//! Loading [`BusConfig`] from TOML.
//!
//! A missing file is an error. An empty file yields the defaults.

use std::path::{Path, PathBuf};

use courier_types::BusConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid bus configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Parse a configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<BusConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Read and parse a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<BusConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&content)?;
    tracing::debug!(
        path = %path.display(),
        worker = %config.worker.name,
        "loaded bus configuration"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn empty_string_yields_defaults() {
        assert_eq!(parse_config("").unwrap(), BusConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let config = parse_config(
            r#"
single_response_timeout_ms = 1500
send_to_global = true

[worker]
name = "orders-bus"
stack_size = 4194304
"#,
        )
        .unwrap();
        assert_eq!(config.single_response_timeout(), Duration::from_millis(1500));
        assert!(config.send_to_global);
        assert!(config.forward_receive_exceptions);
        assert_eq!(config.worker.name, "orders-bus");
        assert_eq!(config.worker.stack_size, Some(4 * 1024 * 1024));
        assert_eq!(config.worker.stop_timeout_ms, 5_000);
    }

    #[test]
    fn wrong_type_is_a_parse_error() {
        let err = parse_config("poll_interval_ms = \"fast\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reads_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("courier.toml");
        std::fs::write(&path, "poll_interval_ms = 20\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(20));
    }

    #[test]
    fn load_empty_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("courier.toml");
        std::fs::write(&path, "").unwrap();
        assert_eq!(load_config(&path).unwrap(), BusConfig::default());
    }

    #[test]
    fn missing_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = load_config(tmp.path().join("absent.toml")).unwrap_err();
        match err {
            ConfigError::Io { path, source } => {
                assert!(path.ends_with("absent.toml"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected io error, got {other:?}"),
        }
    }
}
