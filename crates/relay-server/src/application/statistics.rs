//! Per-application traffic counters.
//!
//! Every counter is an [`AtomicU64`]; recording never blocks and never fails.
//! The flush loop periodically calls [`StatisticsCollector::snapshot_and_reset`]
//! and hands the sample to a [`StatisticsSink`](super::ports::StatisticsSink).
//!
//! Only applications passed to [`StatisticsCollector::for_apps`] are tracked;
//! events for other applications are ignored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use relay_core::AppId;
use tracing::warn;

use super::locks::{read, write};
use crate::domain::StatisticsSample;

#[derive(Debug, Default)]
struct AppCounters {
    current_connections: AtomicU64,
    peak_connections: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    api_messages: AtomicU64,
}

#[derive(Debug)]
enum Tracking {
    All,
    Only,
}

/// Lock-free statistics counters keyed by application.
#[derive(Debug)]
pub struct StatisticsCollector {
    tracking: Tracking,
    apps: RwLock<HashMap<AppId, Arc<AppCounters>>>,
}

impl Default for StatisticsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsCollector {
    /// Tracks every application it hears about.
    pub fn new() -> Self {
        Self {
            tracking: Tracking::All,
            apps: RwLock::new(HashMap::new()),
        }
    }

    /// Tracks exactly `app_ids`.
    pub fn for_apps(app_ids: impl IntoIterator<Item = AppId>) -> Self {
        let apps = app_ids
            .into_iter()
            .map(|id| (id, Arc::new(AppCounters::default())))
            .collect();
        Self {
            tracking: Tracking::Only,
            apps: RwLock::new(apps),
        }
    }

    pub fn on_connect(&self, app_id: &AppId) {
        let Some(counters) = self.counters(app_id) else {
            return;
        };
        let live = counters.current_connections.fetch_add(1, Ordering::AcqRel) + 1;
        counters.peak_connections.fetch_max(live, Ordering::AcqRel);
    }

    pub fn on_disconnect(&self, app_id: &AppId) {
        let Some(counters) = self.counters(app_id) else {
            return;
        };
        let result = counters.current_connections.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |live| live.checked_sub(1),
        );
        if result.is_err() {
            warn!("statistics: disconnect for {app_id} with no live connections, ignoring");
        }
    }

    pub fn on_message_sent(&self, app_id: &AppId, count: u64) {
        if count == 0 {
            return;
        }
        if let Some(counters) = self.counters(app_id) {
            counters.messages_sent.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn on_message_received(&self, app_id: &AppId, count: u64) {
        if let Some(counters) = self.counters(app_id) {
            counters.messages_received.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn on_api_message(&self, app_id: &AppId) {
        if let Some(counters) = self.counters(app_id) {
            counters.api_messages.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns the counters accumulated since the previous call and starts a
    /// new interval.
    ///
    /// Each message counter is swapped to zero atomically, so an increment
    /// racing with the snapshot lands in exactly one of the two intervals.
    /// The peak restarts from the current live connection count.
    pub fn snapshot_and_reset(&self, app_id: &AppId) -> StatisticsSample {
        let Some(counters) = self.existing(app_id) else {
            return StatisticsSample::empty(app_id.clone());
        };

        let live = counters.current_connections.load(Ordering::Acquire);
        let peak = counters.peak_connections.swap(live, Ordering::AcqRel);
        // A connect between the load and the swap must still count toward the
        // new interval's peak.
        let live_now = counters.current_connections.load(Ordering::Acquire);
        counters
            .peak_connections
            .fetch_max(live_now, Ordering::AcqRel);

        StatisticsSample {
            app_id: app_id.clone(),
            peak_connections: peak.max(live),
            messages_sent: counters.messages_sent.swap(0, Ordering::AcqRel),
            messages_received: counters.messages_received.swap(0, Ordering::AcqRel),
            api_messages: counters.api_messages.swap(0, Ordering::AcqRel),
        }
    }

    /// Reads the current interval without resetting it.
    pub fn peek(&self, app_id: &AppId) -> StatisticsSample {
        let Some(counters) = self.existing(app_id) else {
            return StatisticsSample::empty(app_id.clone());
        };
        StatisticsSample {
            app_id: app_id.clone(),
            peak_connections: counters.peak_connections.load(Ordering::Acquire),
            messages_sent: counters.messages_sent.load(Ordering::Acquire),
            messages_received: counters.messages_received.load(Ordering::Acquire),
            api_messages: counters.api_messages.load(Ordering::Acquire),
        }
    }

    /// Live connections as seen by the counters.
    pub fn current_connections(&self, app_id: &AppId) -> u64 {
        self.existing(app_id)
            .map(|c| c.current_connections.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Applications with counters, sorted by id.
    pub fn tracked_apps(&self) -> Vec<AppId> {
        let mut ids: Vec<AppId> = read(&self.apps).keys().cloned().collect();
        ids.sort();
        ids
    }

    fn existing(&self, app_id: &AppId) -> Option<Arc<AppCounters>> {
        read(&self.apps).get(app_id).cloned()
    }

    fn counters(&self, app_id: &AppId) -> Option<Arc<AppCounters>> {
        if let Some(counters) = self.existing(app_id) {
            return Some(counters);
        }
        match self.tracking {
            Tracking::Only => None,
            Tracking::All => Some(Arc::clone(
                write(&self.apps).entry(app_id.clone()).or_default(),
            )),
        }
    }
}
