//! Presence channel members.
//!
//! A *member* is a logical participant (usually a user account).  One member
//! may be connected several times, for example from two browser tabs; the
//! member stays in the channel until its last connection leaves.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChannelError;

/// One presence member as announced in `channel_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMember {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub user_info: Value,
}

impl PresenceMember {
    pub fn new(user_id: impl Into<String>, user_info: Value) -> Self {
        Self {
            user_id: user_id.into(),
            user_info,
        }
    }

    /// Parses the `channel_data` string a client sends when subscribing to a
    /// presence channel.
    ///
    /// `user_id` may be a JSON string or number; numbers are normalised to
    /// their decimal string so `7` and `"7"` identify the same member.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidMessage`] if the data is not a JSON
    /// object with a non-empty `user_id`.
    pub fn from_channel_data(channel_data: &str) -> Result<Self, ChannelError> {
        let value: Value = serde_json::from_str(channel_data)
            .map_err(|e| ChannelError::InvalidMessage(format!("channel_data: {e}")))?;

        let user_id = match value.get("user_id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(ChannelError::InvalidMessage(
                    "channel_data must contain a user_id".to_string(),
                ))
            }
        };

        Ok(Self {
            user_id,
            user_info: value.get("user_info").cloned().unwrap_or(Value::Null),
        })
    }
}

/// The member list handed to a connection that has just joined a presence
/// channel, in the shape Pusher clients expect under the `presence` key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub ids: Vec<String>,
    pub hash: BTreeMap<String, Value>,
    pub count: usize,
}

impl PresenceSnapshot {
    /// Builds a snapshot from members ordered by user id.
    pub fn from_members<'a>(members: impl IntoIterator<Item = &'a PresenceMember>) -> Self {
        let hash: BTreeMap<String, Value> = members
            .into_iter()
            .map(|m| (m.user_id.clone(), m.user_info.clone()))
            .collect();
        Self {
            ids: hash.keys().cloned().collect(),
            count: hash.len(),
            hash,
        }
    }
}
