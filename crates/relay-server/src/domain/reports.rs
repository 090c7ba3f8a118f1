//! Read-only views handed out by the channel manager and statistics collector.

use relay_core::{AppId, ChannelKind};
use serde::Serialize;

/// Point-in-time description of one live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSummary {
    pub name: String,
    pub kind: ChannelKind,
    /// Number of subscribed connections.
    pub subscriber_count: usize,
    /// Distinct presence members; `None` for public and private channels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_count: Option<usize>,
}

/// Counters for one application over one statistics interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatisticsSample {
    pub app_id: AppId,
    /// Highest number of simultaneous connections seen in the interval.
    pub peak_connections: u64,
    /// Frames handed to the transport for delivery.
    pub messages_sent: u64,
    /// Frames received from WebSocket clients.
    pub messages_received: u64,
    /// Events published through the trigger API.
    pub api_messages: u64,
}

impl StatisticsSample {
    /// A sample with every counter at zero.
    pub fn empty(app_id: AppId) -> Self {
        Self {
            app_id,
            peak_connections: 0,
            messages_sent: 0,
            messages_received: 0,
            api_messages: 0,
        }
    }

    /// `true` when nothing happened in the interval.
    pub fn is_idle(&self) -> bool {
        self.peak_connections == 0
            && self.messages_sent == 0
            && self.messages_received == 0
            && self.api_messages == 0
    }
}
