//! The Pusher wire protocol.
//!
//! - [`messages`] – JSON frames in both directions.
//! - [`signature`] – HMAC-SHA256 channel authorization proofs.

pub mod messages;
pub mod signature;

pub use messages::{ClientMessage, PusherMessage};
pub use signature::{sign_channel, verify_channel_auth};
