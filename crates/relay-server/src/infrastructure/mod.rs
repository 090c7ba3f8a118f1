//! Infrastructure layer for relay-server.
//!
//! Everything that touches sockets, files, timers, or configuration lives
//! here, along with the concrete implementations of the application layer's
//! port traits.
//!
//! # Responsibilities
//!
//! - Binding the WebSocket listener and running the accept loop
//! - Performing the WebSocket upgrade and reading the `/app/{key}` path
//! - Running one reader and one writer task per connection
//! - Per-connection outbound queues ([`OutboundQueues`])
//! - Application lookup from configuration ([`ConfigAppRegistry`])
//! - HMAC channel authorization ([`HmacAuthenticator`])
//! - The periodic statistics flush
//! - Wiring every component together and draining on shutdown ([`Relay`])
//!
//! # What does NOT belong here?
//!
//! - Channel and presence bookkeeping (application layer)
//! - Frame definitions and signatures (`relay-core`)

pub mod app_registry;
pub mod authenticator;
pub mod config_file;
pub mod lifecycle;
pub mod statistics_flush;
pub mod transport;
pub mod ws_server;

pub use app_registry::ConfigAppRegistry;
pub use authenticator::HmacAuthenticator;
pub use config_file::load_config;
pub use lifecycle::Relay;
pub use statistics_flush::{run_statistics_flush, TracingStatisticsSink};
pub use transport::{Outbound, OutboundQueues};
pub use ws_server::RelayServer;
