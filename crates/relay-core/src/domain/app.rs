//! Applications: the tenant boundary.
//!
//! Every connection, channel, and statistics counter belongs to exactly one
//! application.  Two applications may use the same channel name without ever
//! seeing each other's events.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an application.
///
/// Wraps the configured id string so application ids cannot be confused with
/// channel names or socket ids in function signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AppId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A configured application.
///
/// Loaded once at startup and never mutated afterwards; the registry hands
/// out shared clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: AppId,
    /// Human-readable name, only used in logs.
    pub name: String,
    /// Public key clients connect with (`/app/{key}`).
    pub key: String,
    /// Secret used to sign private and presence channel subscriptions.
    pub secret: String,
    /// Maximum number of simultaneous connections, `None` for unlimited.
    pub max_connections: Option<usize>,
    /// Whether connections may publish `client-*` events.
    pub enable_client_messages: bool,
    /// Whether the statistics collector tracks this application.
    pub enable_statistics: bool,
    /// Disabled applications reject new connections.
    pub enabled: bool,
}

impl Application {
    /// Builds an enabled application with statistics on, client messages off,
    /// and no connection limit.
    pub fn new(
        id: impl Into<String>,
        key: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id: AppId::new(id),
            key: key.into(),
            secret: secret.into(),
            max_connections: None,
            enable_client_messages: false,
            enable_statistics: true,
            enabled: true,
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn with_client_messages(mut self, enabled: bool) -> Self {
        self.enable_client_messages = enabled;
        self
    }

    /// Returns `true` when one more connection would exceed the limit.
    pub fn is_at_capacity(&self, live_connections: usize) -> bool {
        self.max_connections
            .is_some_and(|max| live_connections >= max)
    }
}
