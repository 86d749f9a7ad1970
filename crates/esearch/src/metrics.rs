//! Aggregate counters reported to the host
//!
//! Events carry counts and durations only, never message content.

use std::time::Duration;

use log::info;

#[derive(Debug, Clone, PartialEq)]
pub enum MetricsEvent {
    IndexBuilt {
        entries: u64,
        duration: Duration,
        user_pauses: u32,
        interruptions: u32,
    },
    SearchPage {
        duration: Duration,
        cache_entries: usize,
        results: usize,
        used_index: bool,
    },
}

/// Fire-and-forget receiver of [`MetricsEvent`]s
pub trait MetricsSink: Send + Sync {
    fn record(&self, event: MetricsEvent);
}

/// Writes events to the log
pub struct LogMetricsSink;

impl MetricsSink for LogMetricsSink {
    fn record(&self, event: MetricsEvent) {
        match event {
            MetricsEvent::IndexBuilt {
                entries,
                duration,
                user_pauses,
                interruptions,
            } => info!(
                "Index built: {} entries in {:?} ({} user pauses, {} interruptions)",
                entries, duration, user_pauses, interruptions
            ),
            MetricsEvent::SearchPage {
                duration,
                cache_entries,
                results,
                used_index,
            } => info!(
                "Search page: {} results in {:?} (cache {}, index phase {})",
                results, duration, cache_entries, used_index
            ),
        }
    }
}

pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _event: MetricsEvent) {}
}
