//! Configuration schema for the relay server.
//!
//! The whole server is described by one TOML document:
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 6001
//! environment = "production"
//! activity_timeout_secs = 30
//! channel_manager = "in-memory"
//! max_queued_frames = 1024
//! log_level = "info"
//!
//! [statistics]
//! interval_secs = 60
//!
//! [dashboard]
//! allowed_users = ["ops@example.com"]
//!
//! [[apps]]
//! id = "app1"
//! name = "Chat"
//! key = "app1-key"
//! secret = "app1-secret"
//! max_connections = 1000
//! enable_client_messages = true
//! ```
//!
//! Every field except the application credentials has a serde default, so a
//! file containing only `[[apps]]` tables is a valid configuration.
//!
//! This module only parses and validates; reading the file from disk lives in
//! `infrastructure::config_file`.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

use relay_core::Application;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The document parsed but describes an unusable server.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub statistics: StatisticsSection,
    #[serde(default)]
    pub dashboard: DashboardSection,
    #[serde(default)]
    pub apps: Vec<AppEntry>,
}

/// Which channel manager implementation the process constructs.
///
/// Selected explicitly by configuration; there is no lookup by type name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelManagerKind {
    /// Process-local channel tables guarded by per-channel locks.
    #[default]
    InMemory,
}

/// Listener and runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// IP address to bind.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port for WebSocket connections.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Deployment environment name.  `"local"` opens the dashboard to everyone.
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Seconds of client silence tolerated before the server checks in.
    /// Sent to clients in `pusher:connection_established`.
    #[serde(default = "default_activity_timeout")]
    pub activity_timeout_secs: u64,
    #[serde(default)]
    pub channel_manager: ChannelManagerKind,
    /// Frames buffered per connection before a client that stopped reading
    /// is disconnected.
    #[serde(default = "default_max_queued_frames")]
    pub max_queued_frames: usize,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Statistics flush settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatisticsSection {
    /// Seconds between two snapshots handed to the statistics sink.
    #[serde(default = "default_statistics_interval")]
    pub interval_secs: u64,
}

/// Who may look at live channel and statistics data.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DashboardSection {
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

/// One `[[apps]]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub key: String,
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
    #[serde(default)]
    pub enable_client_messages: bool,
    #[serde(default = "default_true")]
    pub enable_statistics: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    6001
}
fn default_environment() -> String {
    "production".to_string()
}
fn default_activity_timeout() -> u64 {
    30
}
fn default_max_queued_frames() -> usize {
    1024
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_statistics_interval() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            activity_timeout_secs: default_activity_timeout(),
            channel_manager: ChannelManagerKind::default(),
            max_queued_frames: default_max_queued_frames(),
            log_level: default_log_level(),
        }
    }
}

impl Default for StatisticsSection {
    fn default() -> Self {
        Self {
            interval_secs: default_statistics_interval(),
        }
    }
}

impl From<&AppEntry> for Application {
    fn from(entry: &AppEntry) -> Self {
        let mut app = Application::new(&entry.id, &entry.key, &entry.secret);
        if let Some(name) = &entry.name {
            app.name = name.clone();
        }
        app.max_connections = entry.max_connections;
        app.enable_client_messages = entry.enable_client_messages;
        app.enable_statistics = entry.enable_statistics;
        app.enabled = entry.enabled;
        app
    }
}

impl RelayConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] when [`validate`](Self::validate) fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let cfg: RelayConfig = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects duplicate application ids or keys and empty credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ids = HashSet::new();
        let mut keys = HashSet::new();
        for app in &self.apps {
            if app.id.is_empty() || app.key.is_empty() || app.secret.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "application '{}' needs a non-empty id, key, and secret",
                    app.id
                )));
            }
            if !ids.insert(app.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate application id '{}'",
                    app.id
                )));
            }
            if !keys.insert(app.key.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "application '{}' reuses key '{}'",
                    app.id, app.key
                )));
            }
        }
        if self.server.max_queued_frames == 0 {
            return Err(ConfigError::Invalid(
                "server.max_queued_frames must be at least 1".to_string(),
            ));
        }
        if self.statistics.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "statistics.interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The socket address the WebSocket listener binds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `host:port` is not an IP socket
    /// address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.server.host, self.server.port);
        raw.parse()
            .map_err(|e| ConfigError::Invalid(format!("bind address '{raw}': {e}")))
    }

    /// The configured applications as domain values.
    pub fn applications(&self) -> Vec<Application> {
        self.apps.iter().map(Application::from).collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [server]
        port = 7001
        environment = "local"

        [dashboard]
        allowed_users = ["ops"]

        [[apps]]
        id = "app1"
        name = "Chat"
        key = "key1"
        secret = "secret1"
        max_connections = 10
        enable_client_messages = true

        [[apps]]
        id = "app2"
        key = "key2"
        secret = "secret2"
        enabled = false
    "#;

    #[test]
    fn test_default_config_has_expected_server_settings() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 6001);
        assert_eq!(cfg.server.activity_timeout_secs, 30);
        assert_eq!(cfg.server.channel_manager, ChannelManagerKind::InMemory);
        assert_eq!(cfg.server.max_queued_frames, 1024);
        assert_eq!(cfg.statistics.interval_secs, 60);
        assert!(cfg.apps.is_empty());
    }

    #[test]
    fn test_sample_parses_with_defaults_filled_in() {
        let cfg = RelayConfig::from_toml_str(SAMPLE).expect("parse");
        assert_eq!(cfg.server.port, 7001);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.environment, "local");
        assert_eq!(cfg.dashboard.allowed_users, vec!["ops".to_string()]);
        assert_eq!(cfg.apps.len(), 2);
        assert!(cfg.apps[1].enable_statistics);
        assert!(!cfg.apps[1].enabled);
    }

    #[test]
    fn test_app_entry_converts_to_application() {
        let cfg = RelayConfig::from_toml_str(SAMPLE).expect("parse");
        let apps = cfg.applications();
        assert_eq!(apps[0].name, "Chat");
        assert_eq!(apps[0].max_connections, Some(10));
        assert!(apps[0].enable_client_messages);
        // Name falls back to the id.
        assert_eq!(apps[1].name, "app2");
        assert!(!apps[1].enable_client_messages);
    }

    #[test]
    fn test_channel_manager_kind_is_kebab_case() {
        let cfg = RelayConfig::from_toml_str("[server]\nchannel_manager = \"in-memory\"\n")
            .expect("parse");
        assert_eq!(cfg.server.channel_manager, ChannelManagerKind::InMemory);
    }

    #[test]
    fn test_unknown_channel_manager_kind_is_rejected() {
        let result = RelayConfig::from_toml_str("[server]\nchannel_manager = \"redis\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_duplicate_app_key_is_rejected() {
        let doc = r#"
            [[apps]]
            id = "a"
            key = "same"
            secret = "s1"
            [[apps]]
            id = "b"
            key = "same"
            secret = "s2"
        "#;
        let err = RelayConfig::from_toml_str(doc).unwrap_err();
        assert!(err.to_string().contains("reuses key"), "got: {err}");
    }

    #[test]
    fn test_duplicate_app_id_is_rejected() {
        let doc = r#"
            [[apps]]
            id = "a"
            key = "k1"
            secret = "s"
            [[apps]]
            id = "a"
            key = "k2"
            secret = "s"
        "#;
        assert!(matches!(
            RelayConfig::from_toml_str(doc),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_zero_statistics_interval_is_rejected() {
        let result = RelayConfig::from_toml_str("[statistics]\ninterval_secs = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_queue_capacity_is_rejected() {
        let result = RelayConfig::from_toml_str("[server]\nmax_queued_frames = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bind_addr_combines_host_and_port() {
        let mut cfg = RelayConfig::default();
        cfg.server.host = "127.0.0.1".to_string();
        cfg.server.port = 6002;
        assert_eq!(cfg.bind_addr().unwrap().to_string(), "127.0.0.1:6002");

        cfg.server.host = "not an ip".to_string();
        assert!(cfg.bind_addr().is_err());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let cfg = RelayConfig::from_toml_str(SAMPLE).expect("parse");
        let text = toml::to_string_pretty(&cfg).expect("serialize");
        let restored = RelayConfig::from_toml_str(&text).expect("reparse");
        assert_eq!(cfg, restored);
    }
}
