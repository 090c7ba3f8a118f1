//! Process-wide wiring and shutdown drain.
//!
//! [`Relay`] constructs exactly one of each component from the configuration
//! and hands out `Arc` handles.  There are no globals: tests build as many
//! independent relays as they like.

use std::sync::Arc;
use std::time::Duration;

use relay_core::ChannelError;
use tracing::info;

use crate::application::ports::{AppRegistry, Authenticator, Transport};
use crate::application::{
    build_channel_manager, BroadcastRouter, ChannelManager, ConnectionRegistry, DashboardPolicy,
    DashboardReporter, ProtocolHandler, StatisticsCollector,
};
use crate::domain::RelayConfig;
use crate::infrastructure::{ConfigAppRegistry, HmacAuthenticator, OutboundQueues};

/// Every long-lived component of one relay process.
pub struct Relay {
    pub apps: Arc<ConfigAppRegistry>,
    pub queues: Arc<OutboundQueues>,
    pub channels: Arc<dyn ChannelManager>,
    pub statistics: Arc<StatisticsCollector>,
    pub registry: Arc<ConnectionRegistry>,
    pub router: Arc<BroadcastRouter>,
    pub protocol: Arc<ProtocolHandler>,
    pub dashboard: Arc<DashboardReporter>,
    activity_timeout: Duration,
}

impl Relay {
    pub fn new(config: &RelayConfig) -> Self {
        let applications = config.applications();
        let statistics = Arc::new(StatisticsCollector::for_apps(
            applications
                .iter()
                .filter(|app| app.enable_statistics)
                .map(|app| app.id.clone()),
        ));
        let apps = Arc::new(ConfigAppRegistry::new(applications));
        let app_registry: Arc<dyn AppRegistry> = apps.clone();

        let queues = Arc::new(OutboundQueues::with_capacity(
            config.server.max_queued_frames,
        ));
        let transport: Arc<dyn Transport> = queues.clone();
        let authenticator: Arc<dyn Authenticator> =
            Arc::new(HmacAuthenticator::new(app_registry.clone()));

        let channels = build_channel_manager(
            config.server.channel_manager,
            authenticator,
            transport.clone(),
        );
        let registry = Arc::new(ConnectionRegistry::new(
            app_registry.clone(),
            channels.clone(),
            statistics.clone(),
        ));
        let router = Arc::new(BroadcastRouter::new(
            app_registry.clone(),
            channels.clone(),
            statistics.clone(),
        ));
        let protocol = Arc::new(ProtocolHandler::new(
            app_registry,
            registry.clone(),
            channels.clone(),
            router.clone(),
            statistics.clone(),
            transport,
            config.server.activity_timeout_secs,
        ));
        let dashboard = Arc::new(DashboardReporter::new(
            DashboardPolicy {
                environment: config.server.environment.clone(),
                allowed_users: config.dashboard.allowed_users.clone(),
            },
            channels.clone(),
            registry.clone(),
            statistics.clone(),
        ));

        Self {
            apps,
            queues,
            channels,
            statistics,
            registry,
            router,
            protocol,
            dashboard,
            activity_timeout: Duration::from_secs(config.server.activity_timeout_secs),
        }
    }

    /// How long a client may stay silent before the server pings it.
    pub fn activity_timeout(&self) -> Duration {
        self.activity_timeout
    }

    /// Stops new registrations and subscriptions, closes every connection,
    /// and tears down every channel.  Returns the number of connections
    /// closed.
    pub fn drain(&self) -> usize {
        self.registry.begin_drain();

        let err = ChannelError::ShuttingDown;
        let connections = self.registry.connections();
        for connection in &connections {
            let socket_id = connection.socket_id();
            self.queues.close(socket_id, err.code(), &err.to_string());
            self.registry.unregister(socket_id);
        }

        let channels: usize = self
            .apps
            .all()
            .iter()
            .map(|app| self.channels.remove_application(&app.id))
            .sum();
        info!(
            "drained {} connection(s) and {channels} channel(s)",
            connections.len()
        );
        connections.len()
    }
}
