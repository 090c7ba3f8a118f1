//! Application layer for the relay server.
//!
//! Everything here is synchronous and free of socket I/O.  Collaborators are
//! reached through the traits in [`ports`], so every component can be driven
//! directly from unit tests.
//!
//! # Sub-modules
//!
//! - **`connection`** – Live connections and the [`ConnectionRegistry`] that
//!   owns them.  Unregistering cascades into every channel the connection
//!   joined.
//!
//! - **`channel`** – The state of one channel: subscribers and, for presence
//!   channels, members with per-member connection counts.
//!
//! - **`channel_manager`** – The [`ChannelManager`] trait and its in-memory
//!   implementation.  Creates channels lazily and destroys them when empty.
//!
//! - **`broadcast_router`** – Validates publishes from clients and from the
//!   trigger API, then fans them out through the channel manager.
//!
//! - **`statistics`** – Lock-free per-application counters.
//!
//! - **`protocol_handler`** – Turns one inbound Pusher frame into registry,
//!   channel manager, or router calls and reports errors to the sender.
//!
//! - **`dashboard`** – Access gate and read-only reporting facade.
//!
//! # Lock order
//!
//! application table → channel table → channel → connection.  No code path
//! acquires them in the opposite direction, and transport queues are only
//! touched with at most these locks held.

pub mod broadcast_router;
pub mod channel;
pub mod channel_manager;
pub mod connection;
pub mod dashboard;
pub mod ports;
pub mod protocol_handler;
pub mod statistics;

mod locks;

pub use broadcast_router::BroadcastRouter;
pub use channel_manager::{build_channel_manager, ChannelManager, InMemoryChannelManager};
pub use connection::{Connection, ConnectionRegistry};
pub use dashboard::{can_view_dashboard, CallerIdentity, DashboardPolicy, DashboardReporter};
pub use protocol_handler::ProtocolHandler;
pub use statistics::StatisticsCollector;
