//! Publishing events to channels.
//!
//! Two kinds of publisher reach the router: WebSocket clients sending
//! `client-*` events, and the application backend calling the trigger API.
//! Both end in [`BroadcastRouter::route`], which validates the channel name
//! and fans the event out through the channel manager.

use std::sync::Arc;

use relay_core::protocol::messages::CLIENT_EVENT_PREFIX;
use relay_core::{AppId, ChannelError, ChannelKind, ChannelName, PusherMessage, SocketId};
use serde_json::Value;
use tracing::debug;

use super::channel_manager::ChannelManager;
use super::connection::Connection;
use super::ports::AppRegistry;
use super::statistics::StatisticsCollector;

/// Longest accepted event name.
pub const MAX_EVENT_NAME_LEN: usize = 200;

/// Most channels a single trigger call may address.
pub const MAX_TRIGGER_CHANNELS: usize = 100;

/// Validates publishes and hands them to the channel manager.
pub struct BroadcastRouter {
    apps: Arc<dyn AppRegistry>,
    channels: Arc<dyn ChannelManager>,
    statistics: Arc<StatisticsCollector>,
}

impl BroadcastRouter {
    pub fn new(
        apps: Arc<dyn AppRegistry>,
        channels: Arc<dyn ChannelManager>,
        statistics: Arc<StatisticsCollector>,
    ) -> Self {
        Self {
            apps,
            channels,
            statistics,
        }
    }

    /// Publishes `event` on `channel` to every subscriber except `except`.
    ///
    /// Returns the number of connections the event was queued for.  A channel
    /// with no subscribers yields `Ok(0)`.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::InvalidChannelName`] for a malformed channel name.
    /// - [`ChannelError::InvalidEventName`] for an empty or overlong event.
    pub fn route(
        &self,
        app_id: &AppId,
        channel: &str,
        event: &str,
        data: Value,
        except: Option<&SocketId>,
    ) -> Result<usize, ChannelError> {
        let name = ChannelName::parse(channel)?;
        validate_event_name(event)?;
        Ok(self.deliver(app_id, &PusherMessage::event(name.as_str(), event, data), except))
    }

    /// Relays a `client-*` event from `sender` to the other subscribers.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::NotFound`] if the sender's application is gone.
    /// - [`ChannelError::InvalidChannelName`] / [`ChannelError::InvalidEventName`]
    ///   for malformed names or an event without the `client-` prefix.
    /// - [`ChannelError::ClientEventsDisabled`] if the application does not
    ///   allow client events or the channel is public.
    /// - [`ChannelError::Unauthorized`] if the sender is not subscribed to
    ///   the channel.
    pub fn route_client_event(
        &self,
        sender: &Connection,
        channel: &str,
        event: &str,
        data: Value,
    ) -> Result<usize, ChannelError> {
        let app_id = sender.app_id();
        let app = self
            .apps
            .resolve(app_id)
            .ok_or_else(|| ChannelError::not_found("application", app_id.as_str()))?;
        let name = ChannelName::parse(channel)?;
        validate_event_name(event)?;
        if !event.starts_with(CLIENT_EVENT_PREFIX) {
            return Err(ChannelError::InvalidEventName(format!(
                "client events must start with '{CLIENT_EVENT_PREFIX}': {event}"
            )));
        }
        if !app.enable_client_messages {
            return Err(ChannelError::ClientEventsDisabled(format!(
                "application {app_id}"
            )));
        }
        if name.kind() == ChannelKind::Public {
            return Err(ChannelError::ClientEventsDisabled(format!(
                "public channel {name}"
            )));
        }

        let socket_id = sender.socket_id();
        if !self.channels.is_subscribed(app_id, name.as_str(), socket_id) {
            return Err(ChannelError::Unauthorized(format!(
                "{socket_id} is not subscribed to {name}"
            )));
        }

        let mut message = PusherMessage::event(name.as_str(), event, data);
        if name.kind() == ChannelKind::Presence {
            message.user_id = self.channels.member_id(app_id, name.as_str(), socket_id);
        }
        Ok(self.deliver(app_id, &message, Some(socket_id)))
    }

    /// Publishes one event on up to [`MAX_TRIGGER_CHANNELS`] channels.
    ///
    /// All channel names are validated before anything is sent.  Returns the
    /// total number of deliveries.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::InvalidMessage`] for an empty channel list.
    /// - [`ChannelError::TooManyChannels`] above the limit.
    /// - The errors of [`route`](Self::route).
    pub fn trigger(
        &self,
        app_id: &AppId,
        channels: &[&str],
        event: &str,
        data: Value,
        except: Option<&SocketId>,
    ) -> Result<usize, ChannelError> {
        if channels.is_empty() {
            return Err(ChannelError::InvalidMessage(
                "trigger needs at least one channel".to_string(),
            ));
        }
        if channels.len() > MAX_TRIGGER_CHANNELS {
            return Err(ChannelError::TooManyChannels {
                count: channels.len(),
                max: MAX_TRIGGER_CHANNELS,
            });
        }
        let names = channels
            .iter()
            .map(|c| ChannelName::parse(c))
            .collect::<Result<Vec<_>, _>>()?;
        validate_event_name(event)?;

        self.statistics.on_api_message(app_id);
        let delivered: usize = names
            .iter()
            .map(|name| {
                self.deliver(
                    app_id,
                    &PusherMessage::event(name.as_str(), event, data.clone()),
                    except,
                )
            })
            .sum();
        debug!(
            "trigger {event} on {} channel(s) of {app_id}: {delivered} deliveries",
            names.len()
        );
        Ok(delivered)
    }

    fn deliver(&self, app_id: &AppId, message: &PusherMessage, except: Option<&SocketId>) -> usize {
        let channel = message.channel.as_deref().unwrap_or_default();
        let delivered = self.channels.broadcast(app_id, channel, message, except);
        self.statistics.on_message_sent(app_id, delivered as u64);
        delivered
    }
}

fn validate_event_name(event: &str) -> Result<(), ChannelError> {
    if event.is_empty() {
        return Err(ChannelError::InvalidEventName("empty".to_string()));
    }
    if event.chars().count() > MAX_EVENT_NAME_LEN {
        return Err(ChannelError::InvalidEventName(format!(
            "longer than {MAX_EVENT_NAME_LEN} characters"
        )));
    }
    Ok(())
}
