//! Swap Decoder
//!
//! Classifies normalized transactions against the router and method registry
//! and turns matches into `DecodedEvent`s. A fixed pool of workers drains one
//! shared input channel.

use std::sync::Arc;

use alloy::primitives::{Address, TxHash};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::filter::{extract_method_id, get_dex_method, get_swap_method, RouterRegistry};
use crate::stats::{Counter, StatsRegistry};
use crate::types::{DecodedEvent, SwapDirection, TransactionRecord};

/// Why a transaction was discarded at the filter boundary
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    #[error("contract creation")]
    ContractCreation,

    #[error("recipient {0} is not a known router")]
    UnknownRouter(Address),

    #[error("input shorter than 4 bytes")]
    InputTooShort,

    #[error("selector 0x{} is not a swap method", hex::encode(.0))]
    UnknownSelector([u8; 4]),
}

/// Filter and decode one transaction.
///
/// Checks run in order and stop at the first failure: recipient present,
/// recipient is a known router, input holds a selector, selector is a swap
/// method.
pub fn decode_transaction(
    tx: TransactionRecord,
    routers: &RouterRegistry,
) -> Result<DecodedEvent, FilterReason> {
    let target = tx.to.ok_or(FilterReason::ContractCreation)?;
    if !routers.contains(&target) {
        return Err(FilterReason::UnknownRouter(target));
    }
    let selector = extract_method_id(&tx.input).ok_or(FilterReason::InputTooShort)?;
    let method = get_swap_method(&selector).ok_or(FilterReason::UnknownSelector(selector))?;
    let direction = method.direction().ok_or(FilterReason::UnknownSelector(selector))?;

    let (token_in, token_out) = match direction {
        SwapDirection::Buy => (Some(Address::ZERO), None),
        SwapDirection::Sell => (None, Some(Address::ZERO)),
        SwapDirection::Swap => (None, None),
    };

    // calldata amounts are not decoded; the value stands in for every direction
    let amount_in = tx.value;

    Ok(DecodedEvent {
        method,
        selector,
        target,
        is_swap: true,
        direction,
        token_in,
        token_out,
        amount_in,
        amount_out_min: None,
        tx,
    })
}

/// Filter/decode worker pool.
pub struct DecoderPool {
    routers: Arc<RouterRegistry>,
    input: Arc<Mutex<mpsc::Receiver<TransactionRecord>>>,
    output: mpsc::Sender<DecodedEvent>,
    stats: Arc<StatsRegistry>,
}

impl DecoderPool {
    pub fn new(
        routers: Arc<RouterRegistry>,
        input: mpsc::Receiver<TransactionRecord>,
        output: mpsc::Sender<DecodedEvent>,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        Self { routers, input: Arc::new(Mutex::new(input)), output, stats }
    }

    /// Spawn `workers` tasks onto `tasks`. Each exits on cancellation or when
    /// the input channel closes.
    pub fn spawn(self, workers: usize, tasks: &mut JoinSet<()>, cancel: CancellationToken) {
        info!(workers, "starting decoder pool");
        let pool = Arc::new(self);
        for worker_id in 0..workers {
            let pool = pool.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { pool.worker(worker_id, cancel).await });
        }
    }

    async fn worker(&self, worker_id: usize, cancel: CancellationToken) {
        debug!(worker_id, "decoder worker started");
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = async { self.input.lock().await.recv().await } => next,
            };
            let Some(tx) = next else { break };

            if !self.process(worker_id, tx) {
                break;
            }
        }
        debug!(worker_id, "decoder worker stopped");
    }

    /// Returns `false` once the downstream channel is closed.
    fn process(&self, worker_id: usize, tx: TransactionRecord) -> bool {
        self.stats.record(Counter::Processed);
        let hash = tx.hash;

        let event = match decode_transaction(tx, &self.routers) {
            Ok(event) => event,
            Err(reason) => {
                self.stats.record(Counter::Filtered);
                log_filtered(hash, &reason);
                return true;
            }
        };

        self.stats.record(Counter::Decoded);
        debug!(
            worker_id,
            %hash,
            method = event.method_name(),
            direction = %event.direction,
            router = self.routers.name_of(&event.target).unwrap_or("unknown"),
            "decoded swap"
        );

        match self.output.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(%hash, "decoded channel full, dropping");
                self.stats.record(Counter::DecodeDropped);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

fn log_filtered(hash: TxHash, reason: &FilterReason) {
    match reason {
        FilterReason::UnknownSelector(selector) => match get_dex_method(selector) {
            Some(method) => trace!(%hash, method = method.name(), "router call is not a swap target"),
            None => trace!(%hash, %reason, "filtered"),
        },
        _ => trace!(%hash, %reason, "filtered"),
    }
}
