//! Pusher protocol state machine for one connection.
//!
//! The WebSocket server owns the socket; this handler owns the meaning of
//! each frame.  Every inbound text frame goes through
//! [`ProtocolHandler::handle_text`], which dispatches to the channel manager
//! or the broadcast router and turns any failure into a `pusher:error` frame
//! for the sender only.

use std::sync::Arc;

use relay_core::{ChannelError, ChannelName, ClientMessage, PusherMessage, SocketId};
use tracing::{debug, warn};

use super::broadcast_router::BroadcastRouter;
use super::channel_manager::ChannelManager;
use super::connection::{Connection, ConnectionRegistry};
use super::ports::{AppRegistry, Transport};
use super::statistics::StatisticsCollector;

pub struct ProtocolHandler {
    apps: Arc<dyn AppRegistry>,
    registry: Arc<ConnectionRegistry>,
    channels: Arc<dyn ChannelManager>,
    router: Arc<BroadcastRouter>,
    statistics: Arc<StatisticsCollector>,
    transport: Arc<dyn Transport>,
    activity_timeout_secs: u64,
}

impl ProtocolHandler {
    pub fn new(
        apps: Arc<dyn AppRegistry>,
        registry: Arc<ConnectionRegistry>,
        channels: Arc<dyn ChannelManager>,
        router: Arc<BroadcastRouter>,
        statistics: Arc<StatisticsCollector>,
        transport: Arc<dyn Transport>,
        activity_timeout_secs: u64,
    ) -> Self {
        Self {
            apps,
            registry,
            channels,
            router,
            statistics,
            transport,
            activity_timeout_secs,
        }
    }

    /// Registers a connection that opened `/app/{app_key}`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotFound`] for an unknown key and the
    /// registration errors of [`ConnectionRegistry::register`].  The caller
    /// reports the error and closes the socket.
    pub fn open(&self, app_key: &str) -> Result<Arc<Connection>, ChannelError> {
        let app = self
            .apps
            .resolve_by_key(app_key)
            .ok_or_else(|| ChannelError::not_found("application", app_key))?;
        self.registry.register(&app.id)
    }

    /// Sends `pusher:connection_established`.  Call once the connection's
    /// outbound queue is attached.
    pub fn greet(&self, connection: &Connection) {
        self.transport.send_message(
            connection.socket_id(),
            &PusherMessage::connection_established(
                connection.socket_id(),
                self.activity_timeout_secs,
            ),
        );
    }

    /// Handles one text frame from `connection`.
    ///
    /// Errors are reported to the connection as `pusher:error` and also
    /// returned; they never close the connection.
    pub fn handle_text(&self, connection: &Connection, text: &str) -> Result<(), ChannelError> {
        self.statistics.on_message_received(connection.app_id(), 1);

        let result = ClientMessage::parse(text).and_then(|message| {
            debug!(
                "{} -> {}",
                connection.socket_id(),
                message.kind_name()
            );
            self.dispatch(connection, message)
        });

        if let Err(e) = &result {
            warn!("request from {} failed: {e}", connection.socket_id());
            self.transport
                .send_message(connection.socket_id(), &PusherMessage::error(e));
        }
        result
    }

    /// Unregisters the connection.  Safe to call more than once.
    pub fn close(&self, socket_id: &SocketId) -> bool {
        self.registry.unregister(socket_id)
    }

    fn dispatch(&self, connection: &Connection, message: ClientMessage) -> Result<(), ChannelError> {
        match message {
            ClientMessage::Ping => {
                self.transport
                    .send_message(connection.socket_id(), &PusherMessage::pong());
                Ok(())
            }
            ClientMessage::Subscribe {
                channel,
                auth,
                channel_data,
            } => {
                if self.registry.is_draining() {
                    return Err(ChannelError::ShuttingDown);
                }
                let name = ChannelName::parse(&channel)?;
                self.channels
                    .subscribe(
                        connection.app_id(),
                        &name,
                        connection,
                        auth.as_deref(),
                        channel_data.as_deref(),
                    )
                    .map(|_| ())
            }
            ClientMessage::Unsubscribe { channel } => {
                self.channels
                    .unsubscribe(connection.app_id(), &channel, connection);
                Ok(())
            }
            ClientMessage::ClientEvent {
                event,
                channel,
                data,
            } => self
                .router
                .route_client_event(connection, &channel, &event, data)
                .map(|_| ()),
            ClientMessage::Other { event } => {
                debug!("ignoring {event} from {}", connection.socket_id());
                Ok(())
            }
        }
    }
}
