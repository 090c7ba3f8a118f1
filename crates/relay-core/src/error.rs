//! The per-request error taxonomy.
//!
//! Every error here terminates only the request that caused it.  The protocol
//! handler turns it into a `pusher:error` frame for the originating
//! connection; other subscribers never notice.

use thiserror::Error;

/// Errors returned by registry, channel manager, and router operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Missing or invalid authorization proof for a private/presence channel,
    /// or a client event on a channel the sender is not subscribed to.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The channel name is empty, too long, or contains forbidden characters.
    #[error("invalid channel name: {0}")]
    InvalidChannelName(String),

    /// The application has reached its configured connection limit.
    #[error("application {app_id} is over its connection quota of {max}")]
    CapacityExceeded { app_id: String, max: usize },

    /// Unknown application, connection, or channel.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A client tried to publish where client events are not allowed.
    #[error("client events are not enabled: {0}")]
    ClientEventsDisabled(String),

    /// The application exists but is switched off.
    #[error("application {0} is disabled")]
    AppDisabled(String),

    /// The server is draining and accepts no new connections or subscriptions.
    #[error("server is shutting down")]
    ShuttingDown,

    /// Event names are limited in length and client events need the
    /// `client-` prefix.
    #[error("invalid event name: {0}")]
    InvalidEventName(String),

    /// An API trigger addressed more channels than allowed.
    #[error("too many channels: {count} (max {max})")]
    TooManyChannels { count: usize, max: usize },

    /// A frame or a field inside it could not be understood.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl ChannelError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        ChannelError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// The Pusher protocol error code sent in `pusher:error` frames.
    ///
    /// | Range     | Client behaviour                      |
    /// |-----------|---------------------------------------|
    /// | 4000-4099 | connection closed, do not reconnect   |
    /// | 4100-4199 | reconnect with backoff                |
    /// | 4200-4299 | reconnect immediately                 |
    /// | 4300+     | request failed, connection stays open |
    pub fn code(&self) -> u16 {
        match self {
            ChannelError::NotFound { kind: "application", .. } => 4001,
            ChannelError::AppDisabled(_) => 4003,
            ChannelError::Unauthorized(_) => 4009,
            ChannelError::CapacityExceeded { .. } => 4100,
            ChannelError::ShuttingDown => 4200,
            ChannelError::InvalidMessage(_) => 4300,
            ChannelError::NotFound { .. } | ChannelError::ClientEventsDisabled(_) => 4301,
            ChannelError::InvalidChannelName(_)
            | ChannelError::InvalidEventName(_)
            | ChannelError::TooManyChannels { .. } => 4302,
        }
    }
}
