//! Subscription bookkeeping for every channel of every application.
//!
//! # Tables
//!
//! ```text
//! apps:      RwLock<HashMap<AppId, Arc<AppChannels>>>
//! AppChannels: RwLock<HashMap<String, Arc<Channel>>>
//! Channel:   Mutex<ChannelState>
//! ```
//!
//! The two outer maps are read-mostly: they are write-locked only to create
//! or remove an entry.  All subscriber mutations happen under the individual
//! channel's mutex, so traffic on different channels never contends.
//!
//! # Channel lifetime
//!
//! A channel is created by the first subscribe and destroyed by the
//! unsubscribe that empties it.  Destruction marks the channel `closed` while
//! still holding its lock, then removes it from the table.  A subscribe that
//! picked up the `Arc` just before removal sees the flag and retries against
//! a fresh channel.
//!
//! # Presence notifications
//!
//! `subscription_succeeded`, `member_added`, and `member_removed` are queued
//! on the transport from inside the channel's critical section, so every
//! subscriber observes membership changes in the order they happened.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use relay_core::{
    AppId, ChannelError, ChannelKind, ChannelName, PresenceMember, PresenceSnapshot,
    PusherMessage, SocketId,
};
use serde_json::json;
use tracing::{debug, error, warn};

use super::channel::{Channel, ChannelState};
use super::connection::Connection;
use super::locks::{read, write};
use super::ports::{Authenticator, Frame, Transport};
use crate::domain::config::ChannelManagerKind;
use crate::domain::ChannelSummary;

/// Result of a successful subscribe.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionResult {
    pub channel: String,
    pub kind: ChannelKind,
    /// The connection was already subscribed; nothing changed.
    pub already_subscribed: bool,
    /// Presence only: the member list as it was before this subscribe.
    pub members_before: Option<PresenceSnapshot>,
    /// Presence only: the member list including the new subscriber.
    pub presence: Option<PresenceSnapshot>,
    /// Presence only: this subscribe brought a new member id into the channel.
    pub new_member: bool,
    pub subscriber_count: usize,
}

/// Tracks subscriptions and fans events out to subscribers.
///
/// One instance is constructed per process and shared by `Arc`.
pub trait ChannelManager: Send + Sync {
    /// Subscribes `connection` to `channel`.
    ///
    /// Private and presence channels require `auth`, a proof over the
    /// connection's socket id, the channel name, and (for presence)
    /// `channel_data`.  On success the connection is sent
    /// `pusher_internal:subscription_succeeded`.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Unauthorized`] for a missing or invalid proof.
    /// - [`ChannelError::InvalidMessage`] for presence subscriptions without
    ///   usable `channel_data`.
    /// - [`ChannelError::NotFound`] if the connection closed concurrently.
    fn subscribe(
        &self,
        app_id: &AppId,
        channel: &ChannelName,
        connection: &Connection,
        auth: Option<&str>,
        channel_data: Option<&str>,
    ) -> Result<SubscriptionResult, ChannelError>;

    /// Removes `connection` from `channel`.  Returns `false` if it was not
    /// subscribed.  Destroys the channel if it became empty.
    fn unsubscribe(&self, app_id: &AppId, channel: &str, connection: &Connection) -> bool;

    /// Queues `message` for every subscriber of `channel` except `except`.
    ///
    /// Returns the number of connections the frame was handed to; `0` when
    /// the channel does not exist.
    fn broadcast(
        &self,
        app_id: &AppId,
        channel: &str,
        message: &PusherMessage,
        except: Option<&SocketId>,
    ) -> usize;

    /// Consistent snapshot of every live channel of `app_id`, sorted by name.
    fn channels_for(&self, app_id: &AppId) -> Vec<ChannelSummary>;

    fn channel(&self, app_id: &AppId, channel: &str) -> Option<ChannelSummary>;

    fn is_subscribed(&self, app_id: &AppId, channel: &str, socket_id: &SocketId) -> bool;

    /// The presence member id `socket_id` joined `channel` as.
    fn member_id(&self, app_id: &AppId, channel: &str, socket_id: &SocketId) -> Option<String>;

    /// Members of a presence channel, ordered by user id.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotFound`] if `channel` is not a live presence
    /// channel.
    fn members(&self, app_id: &AppId, channel: &str) -> Result<Vec<PresenceMember>, ChannelError>;

    /// Destroys every channel of `app_id`.  Returns how many were destroyed.
    fn remove_application(&self, app_id: &AppId) -> usize;
}

/// Constructs the channel manager selected in configuration.
pub fn build_channel_manager(
    kind: ChannelManagerKind,
    authenticator: Arc<dyn Authenticator>,
    transport: Arc<dyn Transport>,
) -> Arc<dyn ChannelManager> {
    match kind {
        ChannelManagerKind::InMemory => {
            Arc::new(InMemoryChannelManager::new(authenticator, transport))
        }
    }
}

#[derive(Debug, Default)]
struct AppChannels {
    channels: RwLock<HashMap<String, Arc<Channel>>>,
}

impl AppChannels {
    fn get(&self, name: &str) -> Option<Arc<Channel>> {
        read(&self.channels).get(name).cloned()
    }

    /// Returns the live channel called `name`, creating it if absent or if
    /// the current entry has been closed.
    fn get_or_create(&self, name: &str) -> Arc<Channel> {
        if let Some(channel) = self.get(name) {
            if !channel.is_closed() {
                return channel;
            }
        }
        let mut channels = write(&self.channels);
        match channels.get(name) {
            Some(channel) if !channel.is_closed() => Arc::clone(channel),
            _ => {
                let channel = Arc::new(Channel::new(name));
                channels.insert(name.to_string(), Arc::clone(&channel));
                debug!("channel {name} created");
                channel
            }
        }
    }

    /// Removes `channel` from the table if it is still the entry for its
    /// name.  The caller must already have marked it closed.
    fn remove(&self, channel: &Arc<Channel>) {
        let mut channels = write(&self.channels);
        if channels
            .get(channel.name())
            .is_some_and(|current| Arc::ptr_eq(current, channel))
        {
            channels.remove(channel.name());
            debug!("channel {} destroyed", channel.name());
        }
    }
}

/// Process-local channel manager.
pub struct InMemoryChannelManager {
    authenticator: Arc<dyn Authenticator>,
    transport: Arc<dyn Transport>,
    apps: RwLock<HashMap<AppId, Arc<AppChannels>>>,
}

impl InMemoryChannelManager {
    pub fn new(authenticator: Arc<dyn Authenticator>, transport: Arc<dyn Transport>) -> Self {
        Self {
            authenticator,
            transport,
            apps: RwLock::new(HashMap::new()),
        }
    }

    fn table(&self, app_id: &AppId) -> Option<Arc<AppChannels>> {
        read(&self.apps).get(app_id).cloned()
    }

    fn table_or_create(&self, app_id: &AppId) -> Arc<AppChannels> {
        if let Some(table) = self.table(app_id) {
            return table;
        }
        Arc::clone(write(&self.apps).entry(app_id.clone()).or_default())
    }

    fn live_channel(&self, app_id: &AppId, name: &str) -> Option<(Arc<AppChannels>, Arc<Channel>)> {
        let table = self.table(app_id)?;
        let channel = table.get(name)?;
        Some((table, channel))
    }

    fn authorize(
        &self,
        app_id: &AppId,
        channel: &ChannelName,
        socket_id: &SocketId,
        auth: Option<&str>,
        channel_data: Option<&str>,
    ) -> Result<Option<PresenceMember>, ChannelError> {
        let kind = channel.kind();
        if kind.requires_auth() {
            let proof = auth.ok_or_else(|| {
                ChannelError::Unauthorized(format!("{channel} requires an auth signature"))
            })?;
            let signed_data = if kind == ChannelKind::Presence {
                channel_data
            } else {
                None
            };
            if !self
                .authenticator
                .verify(app_id, socket_id, channel.as_str(), signed_data, proof)
            {
                return Err(ChannelError::Unauthorized(format!(
                    "invalid signature for {channel}"
                )));
            }
        }

        if kind != ChannelKind::Presence {
            return Ok(None);
        }
        let data = channel_data.ok_or_else(|| {
            ChannelError::InvalidMessage(format!("{channel} requires channel_data"))
        })?;
        PresenceMember::from_channel_data(data).map(Some)
    }

    /// Sends `message` to every subscriber in `state` except `except`.
    fn fan_out(
        &self,
        state: &ChannelState,
        message: &PusherMessage,
        except: Option<&SocketId>,
    ) -> usize {
        let Some(frame) = Frame::encode(message) else {
            return 0;
        };
        let mut delivered = 0;
        for socket_id in state.subscribers() {
            if except == Some(socket_id) {
                continue;
            }
            if self.transport.send(socket_id, &frame) {
                delivered += 1;
            } else {
                debug!("no outbound queue for {socket_id}, frame dropped");
            }
        }
        delivered
    }
}

impl ChannelManager for InMemoryChannelManager {
    fn subscribe(
        &self,
        app_id: &AppId,
        channel: &ChannelName,
        connection: &Connection,
        auth: Option<&str>,
        channel_data: Option<&str>,
    ) -> Result<SubscriptionResult, ChannelError> {
        let socket_id = connection.socket_id();
        let member = self.authorize(app_id, channel, socket_id, auth, channel_data)?;
        let name = channel.as_str();
        let kind = channel.kind();
        let table = self.table_or_create(app_id);

        loop {
            let live = table.get_or_create(name);
            let mut state = live.lock();
            if state.closed {
                // Destroyed between lookup and lock.
                continue;
            }

            if !connection.attach_channel(name) {
                let now_empty = state.is_empty();
                if now_empty {
                    state.closed = true;
                }
                drop(state);
                if now_empty {
                    table.remove(&live);
                }
                return Err(ChannelError::not_found("connection", socket_id.as_str()));
            }

            let is_presence = kind == ChannelKind::Presence;
            let members_before = is_presence.then(|| state.presence_snapshot());
            let outcome = state.join(socket_id, member.as_ref());
            let presence = is_presence.then(|| state.presence_snapshot());
            if let Some(member) = &member {
                connection.set_user_data(json!({
                    "user_id": member.user_id,
                    "user_info": member.user_info,
                }));
            }

            self.transport.send_message(
                socket_id,
                &PusherMessage::subscription_succeeded(name, presence.as_ref()),
            );
            if outcome.new_member {
                if let Some(member) = &member {
                    self.fan_out(
                        &state,
                        &PusherMessage::member_added(name, member),
                        Some(socket_id),
                    );
                }
            }

            debug!(
                "{socket_id} subscribed to {name} ({} subscriber(s))",
                state.subscriber_count()
            );
            return Ok(SubscriptionResult {
                channel: name.to_string(),
                kind,
                already_subscribed: outcome.already_subscribed,
                members_before,
                presence,
                new_member: outcome.new_member,
                subscriber_count: state.subscriber_count(),
            });
        }
    }

    fn unsubscribe(&self, app_id: &AppId, channel: &str, connection: &Connection) -> bool {
        let socket_id = connection.socket_id();
        let Some((table, live)) = self.live_channel(app_id, channel) else {
            connection.detach_channel(channel);
            return false;
        };

        let mut state = live.lock();
        let Some(outcome) = state.leave(socket_id) else {
            drop(state);
            connection.detach_channel(channel);
            return false;
        };
        connection.detach_channel(channel);

        if let Some(user_id) = &outcome.departed_member {
            self.fan_out(&state, &PusherMessage::member_removed(channel, user_id), None);
        }

        let now_empty = state.is_empty();
        if now_empty {
            state.closed = true;
        }
        drop(state);

        if now_empty {
            table.remove(&live);
        }
        debug!("{socket_id} unsubscribed from {channel}");
        true
    }

    fn broadcast(
        &self,
        app_id: &AppId,
        channel: &str,
        message: &PusherMessage,
        except: Option<&SocketId>,
    ) -> usize {
        let Some((table, live)) = self.live_channel(app_id, channel) else {
            return 0;
        };

        let mut state = live.lock();
        if state.closed {
            return 0;
        }
        if state.is_empty() {
            // Every path that empties a channel closes it in the same
            // critical section, so this is a bookkeeping bug.
            error!("channel {channel} is empty but was never destroyed, removing it");
            state.closed = true;
            drop(state);
            table.remove(&live);
            return 0;
        }
        self.fan_out(&state, message, except)
    }

    fn channels_for(&self, app_id: &AppId) -> Vec<ChannelSummary> {
        let Some(table) = self.table(app_id) else {
            return Vec::new();
        };

        // Holding the table write lock freezes channel creation and removal;
        // locking every channel then freezes their subscriber sets.
        let mut channels = write(&table.channels);
        let mut stale = Vec::new();
        let summaries = {
            let mut entries: Vec<(&String, &Arc<Channel>)> = channels.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let guards: Vec<_> = entries
                .iter()
                .map(|(name, channel)| (name.as_str(), channel.kind(), channel.lock()))
                .collect();

            let mut summaries = Vec::with_capacity(guards.len());
            for (name, kind, state) in &guards {
                if state.closed {
                    continue;
                }
                if state.is_empty() {
                    stale.push(name.to_string());
                    continue;
                }
                summaries.push(state.summary(name, *kind));
            }
            summaries
        };

        for name in stale {
            if let Some(channel) = channels.remove(&name) {
                error!("channel {name} is empty but was never destroyed, removing it");
                channel.lock().closed = true;
            }
        }
        summaries
    }

    fn channel(&self, app_id: &AppId, channel: &str) -> Option<ChannelSummary> {
        let (_, live) = self.live_channel(app_id, channel)?;
        let state = live.lock();
        if state.closed || state.is_empty() {
            return None;
        }
        Some(state.summary(live.name(), live.kind()))
    }

    fn is_subscribed(&self, app_id: &AppId, channel: &str, socket_id: &SocketId) -> bool {
        self.live_channel(app_id, channel)
            .is_some_and(|(_, live)| live.lock().contains(socket_id))
    }

    fn member_id(&self, app_id: &AppId, channel: &str, socket_id: &SocketId) -> Option<String> {
        let (_, live) = self.live_channel(app_id, channel)?;
        let state = live.lock();
        state.member_of(socket_id).map(str::to_string)
    }

    fn members(&self, app_id: &AppId, channel: &str) -> Result<Vec<PresenceMember>, ChannelError> {
        let not_found = || ChannelError::not_found("presence channel", channel);
        if ChannelKind::of(channel) != ChannelKind::Presence {
            return Err(not_found());
        }
        let (_, live) = self.live_channel(app_id, channel).ok_or_else(not_found)?;
        let state = live.lock();
        if state.closed {
            return Err(not_found());
        }
        Ok(state.members())
    }

    fn remove_application(&self, app_id: &AppId) -> usize {
        let Some(table) = write(&self.apps).remove(app_id) else {
            return 0;
        };
        let drained: Vec<Arc<Channel>> = write(&table.channels)
            .drain()
            .map(|(_, channel)| channel)
            .collect();
        for channel in &drained {
            channel.lock().closed = true;
        }
        if !drained.is_empty() {
            warn!(
                "removed {} channel(s) of application {app_id}",
                drained.len()
            );
        }
        drained.len()
    }
}
