//! JSON frames exchanged with WebSocket clients (Pusher protocol 7).
//!
//! Every frame in both directions is an object with an `event` field and
//! optional `channel` and `data` fields:
//!
//! ```json
//! {"event":"pusher:subscribe","data":{"channel":"presence-room1","auth":"key:sig","channel_data":"{...}"}}
//! {"event":"pusher_internal:member_added","channel":"presence-room1","data":"{\"user_id\":\"u2\"}"}
//! ```
//!
//! Protocol events (`pusher:*`, `pusher_internal:*`) carry their `data` as a
//! JSON-encoded *string*; that is what the official client libraries parse.
//! Application events are forwarded with `data` exactly as published.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::presence::{PresenceMember, PresenceSnapshot};
use crate::domain::socket::SocketId;
use crate::error::ChannelError;

pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
pub const ERROR: &str = "pusher:error";
pub const PING: &str = "pusher:ping";
pub const PONG: &str = "pusher:pong";
pub const SUBSCRIBE: &str = "pusher:subscribe";
pub const UNSUBSCRIBE: &str = "pusher:unsubscribe";
pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
pub const MEMBER_ADDED: &str = "pusher_internal:member_added";
pub const MEMBER_REMOVED: &str = "pusher_internal:member_removed";
pub const CLIENT_EVENT_PREFIX: &str = "client-";

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PusherMessage {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Set on client events relayed through presence channels so receivers
    /// know which member sent them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl PusherMessage {
    /// An application event published on `channel`.
    pub fn event(channel: &str, event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            channel: Some(channel.to_string()),
            data: Some(data),
            user_id: None,
        }
    }

    pub fn connection_established(socket_id: &SocketId, activity_timeout_secs: u64) -> Self {
        Self::protocol(
            CONNECTION_ESTABLISHED,
            None,
            json!({
                "socket_id": socket_id.as_str(),
                "activity_timeout": activity_timeout_secs,
            }),
        )
    }

    /// Sent by the server after a quiet period; clients answer `pusher:pong`.
    pub fn ping() -> Self {
        Self::protocol(PING, None, json!({}))
    }

    pub fn pong() -> Self {
        Self::protocol(PONG, None, json!({}))
    }

    /// Confirmation sent to a connection after it joined `channel`.
    ///
    /// Presence channels include the full member list, the joiner included.
    pub fn subscription_succeeded(channel: &str, presence: Option<&PresenceSnapshot>) -> Self {
        let data = match presence {
            Some(snapshot) => json!({ "presence": snapshot }),
            None => json!({}),
        };
        Self::protocol(SUBSCRIPTION_SUCCEEDED, Some(channel), data)
    }

    pub fn member_added(channel: &str, member: &PresenceMember) -> Self {
        Self::protocol(
            MEMBER_ADDED,
            Some(channel),
            json!({ "user_id": member.user_id, "user_info": member.user_info }),
        )
    }

    pub fn member_removed(channel: &str, user_id: &str) -> Self {
        Self::protocol(MEMBER_REMOVED, Some(channel), json!({ "user_id": user_id }))
    }

    pub fn error(err: &ChannelError) -> Self {
        Self::protocol(
            ERROR,
            None,
            json!({ "message": err.to_string(), "code": err.code() }),
        )
    }

    /// Decodes `data` whether it arrived as a JSON string or an object.
    pub fn data_value(&self) -> Option<Value> {
        match &self.data {
            Some(Value::String(s)) => serde_json::from_str(s).ok(),
            other => other.clone(),
        }
    }

    fn protocol(event: &str, channel: Option<&str>, data: Value) -> Self {
        Self {
            event: event.to_string(),
            channel: channel.map(str::to_string),
            data: Some(Value::String(data.to_string())),
            user_id: None,
        }
    }
}

/// An inbound frame, decoded into what the client asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Ping,
    Subscribe {
        channel: String,
        auth: Option<String>,
        channel_data: Option<String>,
    },
    Unsubscribe {
        channel: String,
    },
    /// A `client-*` event the sender wants relayed to the other subscribers.
    ClientEvent {
        event: String,
        channel: String,
        data: Value,
    },
    /// Any other event; ignored by the relay.
    Other {
        event: String,
    },
}

#[derive(Deserialize)]
struct SubscribeData {
    channel: String,
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    channel_data: Option<String>,
}

#[derive(Deserialize)]
struct UnsubscribeData {
    channel: String,
}

impl ClientMessage {
    /// Parses a text frame received from a client.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidMessage`] for frames that are not JSON
    /// objects with an `event`, or whose subscribe/unsubscribe/client-event
    /// payloads lack a channel.
    pub fn parse(text: &str) -> Result<Self, ChannelError> {
        let frame: PusherMessage = serde_json::from_str(text)
            .map_err(|e| ChannelError::InvalidMessage(e.to_string()))?;

        match frame.event.as_str() {
            PING => Ok(ClientMessage::Ping),
            SUBSCRIBE => {
                let data: SubscribeData = decode_data(&frame)?;
                Ok(ClientMessage::Subscribe {
                    channel: data.channel,
                    auth: data.auth,
                    channel_data: data.channel_data,
                })
            }
            UNSUBSCRIBE => {
                let data: UnsubscribeData = decode_data(&frame)?;
                Ok(ClientMessage::Unsubscribe {
                    channel: data.channel,
                })
            }
            event if event.starts_with(CLIENT_EVENT_PREFIX) => {
                let channel = frame.channel.clone().ok_or_else(|| {
                    ChannelError::InvalidMessage(format!("{event} without a channel"))
                })?;
                Ok(ClientMessage::ClientEvent {
                    event: event.to_string(),
                    channel,
                    data: frame.data.unwrap_or(Value::Null),
                })
            }
            _ => Ok(ClientMessage::Other { event: frame.event }),
        }
    }

    /// Short variant name for log lines that must not include payloads
    /// (auth proofs, member data).
    pub fn kind_name(&self) -> &'static str {
        match self {
            ClientMessage::Ping => "Ping",
            ClientMessage::Subscribe { .. } => "Subscribe",
            ClientMessage::Unsubscribe { .. } => "Unsubscribe",
            ClientMessage::ClientEvent { .. } => "ClientEvent",
            ClientMessage::Other { .. } => "Other",
        }
    }
}

fn decode_data<T: for<'de> Deserialize<'de>>(frame: &PusherMessage) -> Result<T, ChannelError> {
    let value = frame
        .data_value()
        .ok_or_else(|| ChannelError::InvalidMessage(format!("{} without data", frame.event)))?;
    serde_json::from_value(value)
        .map_err(|e| ChannelError::InvalidMessage(format!("{}: {e}", frame.event)))
}
