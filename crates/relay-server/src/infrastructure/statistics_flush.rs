//! Periodic statistics flush.
//!
//! Every `interval`, each tracked application's counters are snapshotted and
//! reset, and the sample is handed to a [`StatisticsSink`].  Storing samples
//! durably is up to the sink; [`TracingStatisticsSink`] just logs them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::application::ports::StatisticsSink;
use crate::application::StatisticsCollector;
use crate::domain::StatisticsSample;

/// Logs each sample at `info` level.
#[derive(Debug, Default)]
pub struct TracingStatisticsSink;

#[async_trait]
impl StatisticsSink for TracingStatisticsSink {
    async fn store(&self, sample: StatisticsSample) -> Result<(), String> {
        info!(
            app_id = %sample.app_id,
            peak_connections = sample.peak_connections,
            messages_sent = sample.messages_sent,
            messages_received = sample.messages_received,
            api_messages = sample.api_messages,
            "statistics"
        );
        Ok(())
    }
}

/// Snapshots every tracked application once and stores the samples.
///
/// Idle applications are skipped.  Returns how many samples were stored.
pub async fn flush_once(collector: &StatisticsCollector, sink: &dyn StatisticsSink) -> usize {
    let mut stored = 0;
    for app_id in collector.tracked_apps() {
        let sample = collector.snapshot_and_reset(&app_id);
        if sample.is_idle() {
            continue;
        }
        match sink.store(sample).await {
            Ok(()) => stored += 1,
            Err(e) => warn!("statistics sink rejected sample for {app_id}: {e}"),
        }
    }
    stored
}

/// Runs [`flush_once`] every `period` until `running` is cleared, then
/// flushes one last time.
pub async fn run_statistics_flush(
    collector: Arc<StatisticsCollector>,
    sink: Arc<dyn StatisticsSink>,
    period: Duration,
    running: Arc<AtomicBool>,
) {
    // Wake at least every 200 ms so shutdown is noticed promptly.
    let poll = period.min(Duration::from_millis(200));
    let mut next_flush = Instant::now() + period;
    while running.load(Ordering::Relaxed) {
        sleep(poll).await;
        if Instant::now() < next_flush {
            continue;
        }
        next_flush += period;
        let stored = flush_once(&collector, sink.as_ref()).await;
        debug!("statistics flush stored {stored} sample(s)");
    }

    let stored = flush_once(&collector, sink.as_ref()).await;
    debug!("final statistics flush stored {stored} sample(s)");
}
