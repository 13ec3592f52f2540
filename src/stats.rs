//! Stats Registry
//!
//! One counter set shared by every stage. Writers hold the lock for a single
//! increment; readers get a copied snapshot.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Terminal events a stage can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Record resolved and forwarded by the fetch stage
    Fetched,
    /// Identifier never resolved after every attempt
    NotFound,
    /// Resolved transaction was already mined
    Stale,
    /// Fetch stage found the decode channel full
    FetchDropped,
    /// Fan-out bound exhausted, identifier not fetched
    FetchSkipped,
    /// Record taken by a decode worker
    Processed,
    /// Record discarded at the filter boundary
    Filtered,
    Decoded,
    /// Decode stage found the estimate channel full
    DecodeDropped,
    Simulated,
    Profitable,
    Failed,
    /// Estimation stage found the sink channel full
    Dropped,
    /// Opportunity passed the sink threshold
    Surfaced,
    /// Opportunity handler returned an error
    SinkFailed,
    Reconnects,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub fetched: u64,
    pub not_found: u64,
    pub stale: u64,
    pub fetch_dropped: u64,
    pub fetch_skipped: u64,
    pub processed: u64,
    pub filtered: u64,
    pub decoded: u64,
    pub decode_dropped: u64,
    pub simulated: u64,
    pub profitable: u64,
    pub failed: u64,
    pub dropped: u64,
    pub surfaced: u64,
    pub sink_failed: u64,
    pub reconnects: u64,
}

impl StatsSnapshot {
    /// decoded / processed, 0 when nothing was processed
    pub fn decode_success_rate(&self) -> f64 {
        ratio(self.decoded, self.processed)
    }

    /// profitable / simulated, 0 when nothing was simulated
    pub fn profitability_rate(&self) -> f64 {
        ratio(self.profitable, self.simulated)
    }

    fn slot(&mut self, counter: Counter) -> &mut u64 {
        match counter {
            Counter::Fetched => &mut self.fetched,
            Counter::NotFound => &mut self.not_found,
            Counter::Stale => &mut self.stale,
            Counter::FetchDropped => &mut self.fetch_dropped,
            Counter::FetchSkipped => &mut self.fetch_skipped,
            Counter::Processed => &mut self.processed,
            Counter::Filtered => &mut self.filtered,
            Counter::Decoded => &mut self.decoded,
            Counter::DecodeDropped => &mut self.decode_dropped,
            Counter::Simulated => &mut self.simulated,
            Counter::Profitable => &mut self.profitable,
            Counter::Failed => &mut self.failed,
            Counter::Dropped => &mut self.dropped,
            Counter::Surfaced => &mut self.surfaced,
            Counter::SinkFailed => &mut self.sink_failed,
            Counter::Reconnects => &mut self.reconnects,
        }
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[derive(Debug, Default)]
pub struct StatsRegistry {
    counters: RwLock<StatsSnapshot>,
}

impl StatsRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, counter: Counter) {
        let mut counters = self.counters.write().unwrap_or_else(|e| e.into_inner());
        *counters.slot(counter) += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        *self.counters.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Log a snapshot every `interval` until cancelled.
pub async fn report_periodically(
    stats: Arc<StatsRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let s = stats.snapshot();
                info!(
                    processed = s.processed,
                    filtered = s.filtered,
                    decoded = s.decoded,
                    simulated = s.simulated,
                    profitable = s.profitable,
                    dropped = s.dropped,
                    reconnects = s.reconnects,
                    decode_rate = format!("{:.2}%", s.decode_success_rate() * 100.0),
                    profit_rate = format!("{:.2}%", s.profitability_rate() * 100.0),
                    "pipeline stats"
                );
            }
        }
    }
}
