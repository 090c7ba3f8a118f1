//! Collaborator traits the application layer depends on.
//!
//! Infrastructure implementations live in `crate::infrastructure`; tests use
//! recording doubles or the `mockall` mocks generated here.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{AppId, Application, PusherMessage, SocketId};
use tracing::error;

use crate::domain::StatisticsSample;

/// A serialized outbound frame.
///
/// Broadcasts encode the message once and share the text between every
/// recipient queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Arc<str>);

impl Frame {
    /// Serializes `message` to its JSON wire form.
    ///
    /// Returns `None` if serialization fails, which only happens for values
    /// JSON cannot represent; the failure is logged.
    pub fn encode(message: &PusherMessage) -> Option<Self> {
        match serde_json::to_string(message) {
            Ok(text) => Some(Self(Arc::from(text))),
            Err(e) => {
                error!("failed to encode {} frame: {e}", message.event);
                None
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decodes the frame back into a message (used by tests and logging).
    pub fn decode(&self) -> Option<PusherMessage> {
        serde_json::from_str(&self.0).ok()
    }
}

/// Hands frames to a connection's outbound queue.
///
/// Implementations must not block: the channel manager calls `send` while
/// holding a channel lock.
pub trait Transport: Send + Sync {
    /// Queues `frame` for `socket_id`.
    ///
    /// Returns `false` when the connection has no live queue; the frame is
    /// dropped.
    fn send(&self, socket_id: &SocketId, frame: &Frame) -> bool;

    /// Encodes and queues a single message.
    fn send_message(&self, socket_id: &SocketId, message: &PusherMessage) -> bool {
        match Frame::encode(message) {
            Some(frame) => self.send(socket_id, &frame),
            None => false,
        }
    }
}

/// Checks subscription proofs for private and presence channels.
pub trait Authenticator: Send + Sync {
    /// Returns `true` when `proof` authorizes `socket_id` to join `channel`
    /// (with `channel_data` for presence channels) in application `app_id`.
    fn verify(
        &self,
        app_id: &AppId,
        socket_id: &SocketId,
        channel: &str,
        channel_data: Option<&str>,
        proof: &str,
    ) -> bool;
}

/// Read-mostly view of the configured applications.
#[cfg_attr(test, mockall::automock)]
pub trait AppRegistry: Send + Sync {
    fn resolve(&self, app_id: &AppId) -> Option<Arc<Application>>;

    /// Looks an application up by the public key clients connect with.
    fn resolve_by_key(&self, key: &str) -> Option<Arc<Application>>;

    fn is_enabled(&self, app_id: &AppId) -> bool {
        self.resolve(app_id).is_some_and(|app| app.enabled)
    }

    /// Every configured application.
    fn all(&self) -> Vec<Arc<Application>>;
}

/// Destination for per-interval statistics samples.
///
/// Infrastructure implementations may persist samples; the default sink
/// logs them.
#[async_trait]
pub trait StatisticsSink: Send + Sync {
    async fn store(&self, sample: StatisticsSample) -> Result<(), String>;
}
