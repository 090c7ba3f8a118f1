//! Domain layer for relay-server.
//!
//! Plain data: the configuration schema loaded at startup and the read-only
//! report types handed to the dashboard and statistics collaborators.

pub mod config;
pub mod reports;

pub use config::{ConfigError, RelayConfig};
pub use reports::{ChannelSummary, StatisticsSample};
