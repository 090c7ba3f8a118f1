//! Reading the TOML configuration file from disk.

use std::path::Path;

use tracing::warn;

use crate::domain::config::{ConfigError, RelayConfig};

/// Loads and validates the configuration at `path`.
///
/// A missing file yields [`RelayConfig::default()`] (no applications), so a
/// fresh checkout starts without a config file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed, and
/// [`ConfigError::Invalid`] if validation fails.
pub fn load_config(path: &Path) -> Result<RelayConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => RelayConfig::from_toml_str(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                "config file {} not found, using defaults",
                path.display()
            );
            Ok(RelayConfig::default())
        }
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("relay-config-{}-{name}.toml", std::process::id()))
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let cfg = load_config(&temp_path("does-not-exist")).expect("defaults");
        assert_eq!(cfg, RelayConfig::default());
    }

    #[test]
    fn test_existing_file_is_parsed() {
        let path = temp_path("valid");
        std::fs::write(
            &path,
            "[server]\nport = 7777\n[[apps]]\nid = \"a\"\nkey = \"k\"\nsecret = \"s\"\n",
        )
        .unwrap();

        let cfg = load_config(&path).expect("parse");
        std::fs::remove_file(&path).ok();

        assert_eq!(cfg.server.port, 7777);
        assert_eq!(cfg.apps.len(), 1);
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let path = temp_path("broken");
        std::fs::write(&path, "[server\nport = ").unwrap();

        let result = load_config(&path);
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
