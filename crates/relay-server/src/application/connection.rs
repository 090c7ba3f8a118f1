//! Live connections and the registry that owns them.
//!
//! The registry is the only owner of [`Connection`] values.  Channels refer to
//! connections by [`SocketId`]; the channel manager receives a borrowed
//! `&Connection` for the duration of a subscribe or unsubscribe.
//!
//! # Disconnect versus subscribe
//!
//! A connection keeps the set of channels it joined behind the same lock as
//! its `closed` flag.  The channel manager records a channel in that set
//! while it holds the channel's lock, and refuses if the connection is
//! already closed.  [`ConnectionRegistry::unregister`] closes the connection
//! and takes the set in one step, so every channel the connection ever
//! reached is either in the taken set or was refused.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use relay_core::{AppId, ChannelError, SocketId};
use serde_json::Value;
use tracing::{debug, info};

use super::channel_manager::ChannelManager;
use super::locks::{lock, read, write};
use super::ports::AppRegistry;
use super::statistics::StatisticsCollector;

#[derive(Debug, Default)]
struct ConnectionState {
    closed: bool,
    channels: HashSet<String>,
    user_data: Option<Value>,
}

/// One live client connection.
#[derive(Debug)]
pub struct Connection {
    socket_id: SocketId,
    app_id: AppId,
    state: Mutex<ConnectionState>,
}

impl Connection {
    pub fn new(socket_id: SocketId, app_id: AppId) -> Self {
        Self {
            socket_id,
            app_id,
            state: Mutex::new(ConnectionState::default()),
        }
    }

    pub fn socket_id(&self) -> &SocketId {
        &self.socket_id
    }

    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    /// `true` once the connection has been unregistered.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Channels the connection is subscribed to, sorted by name.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.state).channels.iter().cloned().collect();
        names.sort();
        names
    }

    pub fn user_data(&self) -> Option<Value> {
        lock(&self.state).user_data.clone()
    }

    pub fn set_user_data(&self, data: Value) {
        lock(&self.state).user_data = Some(data);
    }

    /// Records `channel` as joined.  Returns `false` if the connection is
    /// already closed, in which case nothing is recorded.
    pub(crate) fn attach_channel(&self, channel: &str) -> bool {
        let mut state = lock(&self.state);
        if state.closed {
            return false;
        }
        state.channels.insert(channel.to_string());
        true
    }

    pub(crate) fn detach_channel(&self, channel: &str) {
        lock(&self.state).channels.remove(channel);
    }

    /// Marks the connection closed and hands back every channel it joined.
    /// Returns an empty list on the second call.
    pub(crate) fn close(&self) -> Vec<String> {
        let mut state = lock(&self.state);
        state.closed = true;
        state.channels.drain().collect()
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<SocketId, Arc<Connection>>,
    per_app: HashMap<AppId, usize>,
}

/// Owns every live connection of every application.
pub struct ConnectionRegistry {
    apps: Arc<dyn AppRegistry>,
    channels: Arc<dyn ChannelManager>,
    statistics: Arc<StatisticsCollector>,
    state: RwLock<RegistryState>,
    draining: AtomicBool,
}

impl ConnectionRegistry {
    pub fn new(
        apps: Arc<dyn AppRegistry>,
        channels: Arc<dyn ChannelManager>,
        statistics: Arc<StatisticsCollector>,
    ) -> Self {
        Self {
            apps,
            channels,
            statistics,
            state: RwLock::new(RegistryState::default()),
            draining: AtomicBool::new(false),
        }
    }

    /// Registers a new connection for `app_id` under a fresh socket id.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::ShuttingDown`] while the registry is draining.
    /// - [`ChannelError::NotFound`] for an unknown application.
    /// - [`ChannelError::AppDisabled`] for a disabled application.
    /// - [`ChannelError::CapacityExceeded`] when the application already has
    ///   its maximum number of live connections.
    pub fn register(&self, app_id: &AppId) -> Result<Arc<Connection>, ChannelError> {
        if self.is_draining() {
            return Err(ChannelError::ShuttingDown);
        }
        let app = self
            .apps
            .resolve(app_id)
            .ok_or_else(|| ChannelError::not_found("application", app_id.as_str()))?;
        if !app.enabled {
            return Err(ChannelError::AppDisabled(app_id.to_string()));
        }

        let connection = {
            let mut state = write(&self.state);
            let live = state.per_app.get(app_id).copied().unwrap_or(0);
            if app.is_at_capacity(live) {
                return Err(ChannelError::CapacityExceeded {
                    app_id: app_id.to_string(),
                    max: app.max_connections.unwrap_or(live),
                });
            }

            let mut socket_id = SocketId::generate();
            while state.connections.contains_key(&socket_id) {
                socket_id = SocketId::generate();
            }

            let connection = Arc::new(Connection::new(socket_id.clone(), app_id.clone()));
            state.connections.insert(socket_id, Arc::clone(&connection));
            *state.per_app.entry(app_id.clone()).or_insert(0) += 1;
            connection
        };

        self.statistics.on_connect(app_id);
        debug!(
            "registered connection {} for app {app_id}",
            connection.socket_id()
        );
        Ok(connection)
    }

    /// Removes a connection and unsubscribes it from every channel.
    ///
    /// Returns `false` if the connection was not registered (already gone).
    /// Safe to call repeatedly and from several threads at once: exactly one
    /// call performs the cleanup.
    pub fn unregister(&self, socket_id: &SocketId) -> bool {
        let connection = {
            let mut state = write(&self.state);
            let Some(connection) = state.connections.remove(socket_id) else {
                return false;
            };
            let app_id = connection.app_id().clone();
            if let Some(count) = state.per_app.get_mut(&app_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    state.per_app.remove(&app_id);
                }
            }
            connection
        };

        let channels = connection.close();
        for channel in &channels {
            self.channels
                .unsubscribe(connection.app_id(), channel, &connection);
        }

        self.statistics.on_disconnect(connection.app_id());
        debug!(
            "unregistered connection {socket_id} ({} channel(s) left)",
            channels.len()
        );
        true
    }

    /// # Errors
    ///
    /// Returns [`ChannelError::NotFound`] if no such connection is registered.
    pub fn find(&self, socket_id: &SocketId) -> Result<Arc<Connection>, ChannelError> {
        read(&self.state)
            .connections
            .get(socket_id)
            .cloned()
            .ok_or_else(|| ChannelError::not_found("connection", socket_id.as_str()))
    }

    pub fn connection_count(&self, app_id: &AppId) -> usize {
        read(&self.state).per_app.get(app_id).copied().unwrap_or(0)
    }

    /// Snapshot of every live connection.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        read(&self.state).connections.values().cloned().collect()
    }

    /// # Errors
    ///
    /// Returns [`ChannelError::NotFound`] if no such connection is registered.
    pub fn set_user_data(&self, socket_id: &SocketId, data: Value) -> Result<(), ChannelError> {
        self.find(socket_id)?.set_user_data(data);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`ChannelError::NotFound`] if no such connection is registered.
    pub fn user_data(&self, socket_id: &SocketId) -> Result<Option<Value>, ChannelError> {
        Ok(self.find(socket_id)?.user_data())
    }

    /// Stops accepting registrations and subscriptions.  Irreversible.
    pub fn begin_drain(&self) {
        if !self.draining.swap(true, Ordering::AcqRel) {
            info!("connection registry draining");
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }
}
