//! # relay-core
//!
//! Shared library for the relay server containing the application model,
//! channel naming rules, the Pusher JSON protocol messages, and the HMAC
//! signatures that authorize private and presence subscriptions.
//!
//! This crate has zero dependencies on sockets, async runtimes, or file I/O.
//!
//! # Architecture overview
//!
//! The relay is a Pusher-compatible WebSocket server.  Clients connect under
//! an *application* (a tenant), subscribe to named *channels*, and receive
//! every event broadcast on those channels.
//!
//! - **`domain`** – Applications, socket ids, channel names and kinds,
//!   presence members.  Pure values with validation.
//!
//! - **`protocol`** – The JSON frames exchanged with clients
//!   (`pusher:subscribe`, `pusher_internal:member_added`, ...) and the
//!   channel authorization signature scheme.
//!
//! - **`error`** – [`ChannelError`], the per-request error taxonomy shared by
//!   every layer, each variant mapping to a Pusher error code.

pub mod domain;
pub mod error;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `relay_core::ChannelName` instead of `relay_core::domain::channel::ChannelName`.
pub use domain::app::{AppId, Application};
pub use domain::channel::{ChannelKind, ChannelName, MAX_CHANNEL_NAME_LEN};
pub use domain::presence::{PresenceMember, PresenceSnapshot};
pub use domain::socket::SocketId;
pub use error::ChannelError;
pub use protocol::messages::{ClientMessage, PusherMessage};
