//! Who may watch live channels and statistics, and what they see.
//!
//! Rendering a dashboard is somebody else's job; this module only gates
//! access and assembles the read-only data.

use std::sync::Arc;

use relay_core::AppId;
use serde::Serialize;
use thiserror::Error;

use super::channel_manager::ChannelManager;
use super::connection::ConnectionRegistry;
use super::statistics::StatisticsCollector;
use crate::domain::{ChannelSummary, StatisticsSample};

/// The environment name under which everybody may view the dashboard.
pub const LOCAL_ENVIRONMENT: &str = "local";

/// The authenticated caller, as established by whatever fronts the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: Option<String>,
}

impl CallerIdentity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self {
            user_id: Some(id.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardPolicy {
    pub environment: String,
    pub allowed_users: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DashboardError {
    #[error("access to the dashboard is denied")]
    AccessDenied,
}

/// Returns `true` when `caller` may see dashboard data.
///
/// Everybody may in the local environment; elsewhere only the listed users.
pub fn can_view_dashboard(caller: &CallerIdentity, policy: &DashboardPolicy) -> bool {
    if policy.environment == LOCAL_ENVIRONMENT {
        return true;
    }
    caller
        .user_id
        .as_ref()
        .is_some_and(|id| policy.allowed_users.iter().any(|allowed| allowed == id))
}

/// Live view of one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppOverview {
    pub app_id: AppId,
    pub connections: usize,
    pub channels: Vec<ChannelSummary>,
    pub statistics: StatisticsSample,
}

/// Read-only facade over the channel manager and statistics.
pub struct DashboardReporter {
    policy: DashboardPolicy,
    channels: Arc<dyn ChannelManager>,
    registry: Arc<ConnectionRegistry>,
    statistics: Arc<StatisticsCollector>,
}

impl DashboardReporter {
    pub fn new(
        policy: DashboardPolicy,
        channels: Arc<dyn ChannelManager>,
        registry: Arc<ConnectionRegistry>,
        statistics: Arc<StatisticsCollector>,
    ) -> Self {
        Self {
            policy,
            channels,
            registry,
            statistics,
        }
    }

    /// # Errors
    ///
    /// Returns [`DashboardError::AccessDenied`] when the caller fails the
    /// policy check.
    pub fn channels(
        &self,
        caller: &CallerIdentity,
        app_id: &AppId,
    ) -> Result<Vec<ChannelSummary>, DashboardError> {
        self.check(caller)?;
        Ok(self.channels.channels_for(app_id))
    }

    /// Current-interval counters, without resetting them.
    ///
    /// # Errors
    ///
    /// Returns [`DashboardError::AccessDenied`] when the caller fails the
    /// policy check.
    pub fn statistics(
        &self,
        caller: &CallerIdentity,
        app_id: &AppId,
    ) -> Result<StatisticsSample, DashboardError> {
        self.check(caller)?;
        Ok(self.statistics.peek(app_id))
    }

    /// # Errors
    ///
    /// Returns [`DashboardError::AccessDenied`] when the caller fails the
    /// policy check.
    pub fn overview(
        &self,
        caller: &CallerIdentity,
        app_id: &AppId,
    ) -> Result<AppOverview, DashboardError> {
        self.check(caller)?;
        Ok(AppOverview {
            app_id: app_id.clone(),
            connections: self.registry.connection_count(app_id),
            channels: self.channels.channels_for(app_id),
            statistics: self.statistics.peek(app_id),
        })
    }

    fn check(&self, caller: &CallerIdentity) -> Result<(), DashboardError> {
        if can_view_dashboard(caller, &self.policy) {
            Ok(())
        } else {
            Err(DashboardError::AccessDenied)
        }
    }
}
