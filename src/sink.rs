//! Result Sink
//!
//! Last stage of the pipeline. Applies the operator thresholds to each
//! estimate and hands qualifying opportunities to an `OpportunityHandler`.

use std::sync::Arc;

use alloy::primitives::U256;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::SinkConfig;
use crate::publisher::PublishError;
use crate::stats::{Counter, StatsRegistry};
use crate::types::ProfitEstimate;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("Handler rejected opportunity: {0}")]
    Rejected(String),
}

/// Why an estimate did not qualify
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    BelowMinProfit,
    GasPriceTooHigh,
    GasLimitTooHigh,
}

/// Operator thresholds for surfacing an opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpportunityFilter {
    pub min_profit: U256,
    pub max_gas_price: u128,
    pub max_gas_limit: u64,
}

impl OpportunityFilter {
    pub fn new(config: &SinkConfig) -> Self {
        Self {
            min_profit: config.min_profit,
            max_gas_price: config.max_gas_price,
            max_gas_limit: config.max_gas_limit,
        }
    }

    pub fn check(&self, estimate: &ProfitEstimate) -> Result<(), Rejection> {
        if estimate.net_profit < self.min_profit {
            return Err(Rejection::BelowMinProfit);
        }
        if estimate.gas_price > self.max_gas_price {
            return Err(Rejection::GasPriceTooHigh);
        }
        if estimate.gas_limit > self.max_gas_limit {
            return Err(Rejection::GasLimitTooHigh);
        }
        Ok(())
    }

    pub fn accepts(&self, estimate: &ProfitEstimate) -> bool {
        self.check(estimate).is_ok()
    }
}

impl Default for OpportunityFilter {
    fn default() -> Self {
        Self::new(&SinkConfig::default())
    }
}

/// Receives opportunities that passed the filter.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OpportunityHandler: Send + Sync {
    async fn handle(&self, estimate: &ProfitEstimate) -> Result<(), SinkError>;
}

/// Writes each opportunity to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

#[async_trait]
impl OpportunityHandler for LogHandler {
    async fn handle(&self, estimate: &ProfitEstimate) -> Result<(), SinkError> {
        info!(
            hash = %estimate.tx_hash,
            target = %estimate.target,
            method = estimate.method,
            net_profit = %estimate.net_profit,
            gas_cost = %estimate.gas_cost,
            success_rate = estimate.success_rate,
            risk = %estimate.risk,
            latency_us = estimate.latency.as_micros() as u64,
            "profitable opportunity"
        );
        Ok(())
    }
}

pub struct ResultSink {
    filter: OpportunityFilter,
    stats: Arc<StatsRegistry>,
}

impl ResultSink {
    pub fn new(filter: OpportunityFilter, stats: Arc<StatsRegistry>) -> Self {
        Self { filter, stats }
    }

    /// Drain `rx` until it closes or `cancel` fires.
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<ProfitEstimate>,
        handler: Arc<dyn OpportunityHandler>,
        cancel: CancellationToken,
    ) {
        debug!("result sink started");
        loop {
            let estimate = tokio::select! {
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(estimate) => estimate,
                    None => break,
                },
            };

            if let Err(rejection) = self.filter.check(&estimate) {
                trace!(hash = %estimate.tx_hash, ?rejection, "estimate below threshold");
                continue;
            }

            let handled = tokio::select! {
                _ = cancel.cancelled() => break,
                handled = handler.handle(&estimate) => handled,
            };
            match handled {
                Ok(()) => self.stats.record(Counter::Surfaced),
                Err(err) => {
                    warn!(hash = %estimate.tx_hash, error = %err, "opportunity handler failed");
                    self.stats.record(Counter::SinkFailed);
                }
            }
        }
        debug!("result sink stopped");
    }
}
