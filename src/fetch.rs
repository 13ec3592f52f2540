//! Fetch & Normalize
//!
//! Resolves a pending transaction hash into a `TransactionRecord` and hands it
//! to the decode stage without ever waiting on that stage.

use std::sync::Arc;

use alloy::primitives::{Address, TxHash};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::FetchConfig;
use crate::feed::{FeedConnection, FetchedTransaction};
use crate::stats::{Counter, StatsRegistry};
use crate::types::{current_timestamp_millis, TransactionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Forwarded,
    /// Unknown to the node after every attempt
    NotFound,
    /// Already included in a block
    Mined,
    /// Decode channel full, record dropped
    ChannelFull,
    Cancelled,
}

/// Build a record from a lookup result. A failed sender recovery yields
/// `Address::ZERO` rather than dropping the transaction.
pub fn normalize(fetched: FetchedTransaction) -> TransactionRecord {
    TransactionRecord {
        hash: fetched.hash,
        from: fetched.sender.unwrap_or(Address::ZERO),
        to: fetched.to,
        value: fetched.value,
        gas_price: fetched.gas_price,
        gas_limit: fetched.gas_limit,
        input: fetched.input,
        nonce: fetched.nonce,
        chain_id: fetched.chain_id,
        observed_at_ms: current_timestamp_millis(),
    }
}

#[derive(Clone)]
pub struct Fetcher {
    config: FetchConfig,
    out: mpsc::Sender<TransactionRecord>,
    stats: Arc<StatsRegistry>,
}

impl Fetcher {
    pub fn new(
        config: FetchConfig,
        out: mpsc::Sender<TransactionRecord>,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        Self { config, out, stats }
    }

    /// Resolve `hash` on `conn` and forward the record.
    ///
    /// Lookups that fail or come back empty are retried after `n * retry_step`
    /// for attempt `n`; a mined transaction is discarded immediately.
    pub async fn fetch_and_forward(
        &self,
        conn: &dyn FeedConnection,
        hash: TxHash,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        for attempt in 1..=self.config.attempts {
            if cancel.is_cancelled() {
                return FetchOutcome::Cancelled;
            }

            let lookup = tokio::select! {
                _ = cancel.cancelled() => return FetchOutcome::Cancelled,
                lookup = conn.transaction_by_hash(hash) => lookup,
            };

            match lookup {
                Ok(Some(fetched)) if !fetched.is_pending => {
                    trace!(%hash, "transaction already mined");
                    self.stats.record(Counter::Stale);
                    return FetchOutcome::Mined;
                }
                Ok(Some(fetched)) => {
                    if fetched.sender.is_none() {
                        debug!(%hash, "forwarding with unknown sender");
                    }
                    return self.forward(normalize(fetched));
                }
                Ok(None) => trace!(%hash, attempt, "transaction not found"),
                Err(err) => debug!(%hash, attempt, error = %err, "transaction lookup failed"),
            }

            let delay = self.config.retry_step.saturating_mul(attempt);
            tokio::select! {
                _ = cancel.cancelled() => return FetchOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!(%hash, attempts = self.config.attempts, "giving up on transaction");
        self.stats.record(Counter::NotFound);
        FetchOutcome::NotFound
    }

    fn forward(&self, record: TransactionRecord) -> FetchOutcome {
        let hash = record.hash;
        match self.out.try_send(record) {
            Ok(()) => {
                self.stats.record(Counter::Fetched);
                FetchOutcome::Forwarded
            }
            Err(TrySendError::Full(_)) => {
                warn!(%hash, "transaction channel full, dropping");
                self.stats.record(Counter::FetchDropped);
                FetchOutcome::ChannelFull
            }
            Err(TrySendError::Closed(_)) => FetchOutcome::Cancelled,
        }
    }
}
