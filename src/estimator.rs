//! Profit Estimation
//!
//! Scores decoded swaps for gas cost, gross and net profit, success rate and
//! risk. The scoring function sits behind `ProfitModel` so it can be replaced
//! without touching the worker pool.

use std::sync::Arc;
use std::time::Instant;

use alloy::primitives::U256;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EstimatorConfig;
use crate::stats::{Counter, StatsRegistry};
use crate::types::{DecodedEvent, ProfitEstimate, RiskLevel, TransactionRecord};

/// Output of a profit model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfitScore {
    pub gross_profit: U256,
    pub success_rate: f64,
    pub risk: RiskLevel,
}

/// Pure scoring function: no I/O, no shared state.
pub trait ProfitModel: Send + Sync {
    fn score(&self, event: &DecodedEvent, gas_cost: U256) -> ProfitScore;
}

impl<F> ProfitModel for F
where
    F: Fn(&DecodedEvent, U256) -> ProfitScore + Send + Sync,
{
    fn score(&self, event: &DecodedEvent, gas_cost: U256) -> ProfitScore {
        self(event, gas_cost)
    }
}

/// Placeholder model: a fixed share of the swap value, success rate
/// penalized for large value and high gas price.
#[derive(Debug, Clone)]
pub struct HeuristicProfitModel {
    profit_divisor: U256,
    base_success_rate: f64,
    large_value_threshold: U256,
    large_value_penalty: f64,
    high_gas_price_threshold: u128,
    high_gas_price_penalty: f64,
}

impl HeuristicProfitModel {
    pub fn new(config: &EstimatorConfig) -> Self {
        Self {
            profit_divisor: U256::from(config.profit_divisor.max(1)),
            base_success_rate: config.base_success_rate,
            large_value_threshold: config.large_value_threshold,
            large_value_penalty: config.large_value_penalty,
            high_gas_price_threshold: config.high_gas_price_threshold,
            high_gas_price_penalty: config.high_gas_price_penalty,
        }
    }

    pub fn success_rate(&self, tx: &TransactionRecord) -> f64 {
        let mut rate = self.base_success_rate;
        if tx.value > self.large_value_threshold {
            rate *= self.large_value_penalty;
        }
        if tx.gas_price > self.high_gas_price_threshold {
            rate *= self.high_gas_price_penalty;
        }
        rate.clamp(0.0, 1.0)
    }
}

impl Default for HeuristicProfitModel {
    fn default() -> Self {
        Self::new(&EstimatorConfig::default())
    }
}

impl ProfitModel for HeuristicProfitModel {
    fn score(&self, event: &DecodedEvent, _gas_cost: U256) -> ProfitScore {
        let success_rate = self.success_rate(&event.tx);
        ProfitScore {
            gross_profit: event.tx.value / self.profit_divisor,
            success_rate,
            risk: RiskLevel::from_success_rate(success_rate),
        }
    }
}

/// Fixed-gas cost model for a router swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasModel {
    pub base_gas: u64,
    pub swap_gas: u64,
    pub fallback_gas_price: u128,
}

impl GasModel {
    pub fn new(config: &EstimatorConfig) -> Self {
        Self {
            base_gas: config.base_gas,
            swap_gas: config.swap_gas,
            fallback_gas_price: config.fallback_gas_price,
        }
    }

    /// The transaction's own gas price, or the fallback when it is zero.
    pub fn effective_gas_price(&self, tx: &TransactionRecord) -> u128 {
        if tx.gas_price > 0 {
            tx.gas_price
        } else {
            self.fallback_gas_price
        }
    }

    pub fn gas_cost(&self, tx: &TransactionRecord) -> U256 {
        let gas = U256::from(self.base_gas) + U256::from(self.swap_gas);
        gas.saturating_mul(U256::from(self.effective_gas_price(tx)))
    }
}

impl Default for GasModel {
    fn default() -> Self {
        Self::new(&EstimatorConfig::default())
    }
}

pub struct Estimator {
    gas: GasModel,
    model: Arc<dyn ProfitModel>,
}

impl Estimator {
    pub fn new(gas: GasModel, model: Arc<dyn ProfitModel>) -> Self {
        Self { gas, model }
    }

    pub fn from_config(config: &EstimatorConfig) -> Self {
        Self::new(GasModel::new(config), Arc::new(HeuristicProfitModel::new(config)))
    }

    /// Score one event. `None` when the model produced an unusable score.
    pub fn estimate(&self, event: &DecodedEvent) -> Option<ProfitEstimate> {
        let started = Instant::now();
        let gas_cost = self.gas.gas_cost(&event.tx);
        let score = self.model.score(event, gas_cost);
        if !score.success_rate.is_finite() {
            return None;
        }

        Some(ProfitEstimate {
            tx_hash: event.tx.hash,
            target: event.target,
            method: event.method_name(),
            gross_profit: score.gross_profit,
            gas_cost,
            net_profit: score.gross_profit.saturating_sub(gas_cost),
            success_rate: score.success_rate.clamp(0.0, 1.0),
            risk: score.risk,
            latency: started.elapsed(),
            gas_price: event.tx.gas_price,
            gas_limit: event.tx.gas_limit,
        })
    }
}

/// Estimation worker pool.
pub struct EstimatorPool {
    estimator: Arc<Estimator>,
    input: Arc<Mutex<mpsc::Receiver<DecodedEvent>>>,
    output: mpsc::Sender<ProfitEstimate>,
    stats: Arc<StatsRegistry>,
}

impl EstimatorPool {
    pub fn new(
        estimator: Arc<Estimator>,
        input: mpsc::Receiver<DecodedEvent>,
        output: mpsc::Sender<ProfitEstimate>,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        Self { estimator, input: Arc::new(Mutex::new(input)), output, stats }
    }

    pub fn spawn(self, workers: usize, tasks: &mut JoinSet<()>, cancel: CancellationToken) {
        info!(workers, "starting estimator pool");
        let pool = Arc::new(self);
        for worker_id in 0..workers {
            let pool = pool.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { pool.worker(worker_id, cancel).await });
        }
    }

    async fn worker(&self, worker_id: usize, cancel: CancellationToken) {
        debug!(worker_id, "estimator worker started");
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = async { self.input.lock().await.recv().await } => next,
            };
            let Some(event) = next else { break };

            if !self.process(worker_id, &event) {
                break;
            }
        }
        debug!(worker_id, "estimator worker stopped");
    }

    fn process(&self, worker_id: usize, event: &DecodedEvent) -> bool {
        self.stats.record(Counter::Simulated);
        let hash = event.tx.hash;

        let Some(estimate) = self.estimator.estimate(event) else {
            warn!(%hash, "profit model returned an invalid score");
            self.stats.record(Counter::Failed);
            return true;
        };

        if estimate.is_profitable() {
            self.stats.record(Counter::Profitable);
        }
        debug!(
            worker_id,
            %hash,
            net_profit = %estimate.net_profit,
            gas_cost = %estimate.gas_cost,
            risk = %estimate.risk,
            "estimated swap"
        );

        match self.output.try_send(estimate) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(worker_id, %hash, "estimate channel full, dropping result");
                self.stats.record(Counter::Dropped);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode_transaction;
    use crate::filter::{DexMethodId, RouterRegistry, UNISWAP_V2_ROUTER};
    use alloy::primitives::{Address, Bytes, TxHash};
    use std::time::Duration;

    const ONE_ETH: u128 = 1_000_000_000_000_000_000;
    const GWEI: u128 = 1_000_000_000;

    fn event(value: U256, gas_price: u128) -> DecodedEvent {
        let mut input = DexMethodId::SwapExactEthForTokens.selector().to_vec();
        input.extend_from_slice(&[0u8; 128]);
        let tx = TransactionRecord {
            hash: TxHash::repeat_byte(0x0e),
            from: Address::repeat_byte(0x11),
            to: Some(UNISWAP_V2_ROUTER),
            value,
            gas_price,
            gas_limit: 250_000,
            input: Bytes::from(input),
            nonce: 1,
            chain_id: Some(1),
            observed_at_ms: 0,
        };
        decode_transaction(tx, &RouterRegistry::default()).unwrap()
    }

    #[test]
    fn test_gross_profit_is_one_percent_of_value() {
        let estimator = Estimator::from_config(&EstimatorConfig::default());
        let estimate = estimator.estimate(&event(U256::from(ONE_ETH), 20 * GWEI)).unwrap();

        assert_eq!(estimate.gross_profit, U256::from(10_000_000_000_000_000u128));
        assert_eq!(estimate.method, "swapExactETHForTokens");
    }

    #[test]
    fn test_gas_cost_uses_fixed_gas_and_tx_price() {
        let gas = GasModel::default();
        let estimate_event = event(U256::ZERO, 20 * GWEI);
        assert_eq!(gas.gas_cost(&estimate_event.tx), U256::from(71_000u128 * 20 * GWEI));
    }

    #[test]
    fn test_zero_gas_price_uses_fallback() {
        let gas = GasModel::default();
        let zero_price = event(U256::ZERO, 0);
        assert_eq!(gas.effective_gas_price(&zero_price.tx), 30 * GWEI);
        assert_eq!(gas.gas_cost(&zero_price.tx), U256::from(71_000u128 * 30 * GWEI));
    }

    #[test]
    fn test_net_profit_is_gross_minus_gas() {
        let estimator = Estimator::from_config(&EstimatorConfig::default());
        let estimate = estimator.estimate(&event(U256::from(ONE_ETH), 20 * GWEI)).unwrap();

        assert_eq!(estimate.net_profit, estimate.gross_profit - estimate.gas_cost);
        assert!(estimate.is_profitable());
    }

    #[test]
    fn test_net_profit_floors_at_zero() {
        let estimator = Estimator::from_config(&EstimatorConfig::default());
        // 1% of 1000 wei never covers gas
        let estimate = estimator.estimate(&event(U256::from(1_000u64), 20 * GWEI)).unwrap();

        assert!(estimate.gas_cost > estimate.gross_profit);
        assert_eq!(estimate.net_profit, U256::ZERO);
        assert!(!estimate.is_profitable());
    }

    #[test]
    fn test_success_rate_penalties() {
        let model = HeuristicProfitModel::default();

        let base = model.score(&event(U256::from(ONE_ETH), 20 * GWEI), U256::ZERO);
        assert!((base.success_rate - 0.8).abs() < 1e-9);
        assert_eq!(base.risk, RiskLevel::Medium);

        let large = model.score(&event(U256::from(2 * ONE_ETH), 20 * GWEI), U256::ZERO);
        assert!((large.success_rate - 0.56).abs() < 1e-9);
        assert_eq!(large.risk, RiskLevel::High);

        let both = model.score(&event(U256::from(2 * ONE_ETH), 150 * GWEI), U256::ZERO);
        assert!((both.success_rate - 0.504).abs() < 1e-9);
        assert_eq!(both.risk, RiskLevel::High);

        let pricey = model.score(&event(U256::from(ONE_ETH), 150 * GWEI), U256::ZERO);
        assert!((pricey.success_rate - 0.72).abs() < 1e-9);
        assert_eq!(pricey.risk, RiskLevel::Medium);
    }

    #[test]
    fn test_custom_model_is_pluggable() {
        let fixed = |_: &DecodedEvent, gas_cost: U256| ProfitScore {
            gross_profit: gas_cost * U256::from(2),
            success_rate: 0.95,
            risk: RiskLevel::Low,
        };
        let estimator = Estimator::new(GasModel::default(), Arc::new(fixed));
        let estimate = estimator.estimate(&event(U256::ZERO, 10 * GWEI)).unwrap();

        assert_eq!(estimate.net_profit, estimate.gas_cost);
        assert_eq!(estimate.risk, RiskLevel::Low);
    }

    #[test]
    fn test_non_finite_success_rate_is_rejected() {
        let broken = |_: &DecodedEvent, _: U256| ProfitScore {
            gross_profit: U256::ZERO,
            success_rate: f64::NAN,
            risk: RiskLevel::High,
        };
        let estimator = Estimator::new(GasModel::default(), Arc::new(broken));
        assert!(estimator.estimate(&event(U256::ZERO, GWEI)).is_none());
    }

    #[tokio::test]
    async fn test_pool_drops_when_sink_full_without_blocking() {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(1);
        let stats = StatsRegistry::new();
        let mut tasks = JoinSet::new();

        let estimator = Arc::new(Estimator::from_config(&EstimatorConfig::default()));
        EstimatorPool::new(estimator, in_rx, out_tx, stats.clone()).spawn(2, &mut tasks, CancellationToken::new());

        for _ in 0..3 {
            in_tx.send(event(U256::from(ONE_ETH), 20 * GWEI)).await.unwrap();
        }
        drop(in_tx);

        let drained = tokio::time::timeout(Duration::from_secs(1), async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok(), "estimator workers blocked on a full channel");

        let s = stats.snapshot();
        assert_eq!(s.simulated, 3);
        assert_eq!(s.profitable, 3);
        assert_eq!(s.dropped, 2);
        assert_eq!(s.failed, 0);
        assert!(out_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_pool_counts_invalid_scores_as_failed() {
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, _out_rx) = mpsc::channel(4);
        let stats = StatsRegistry::new();
        let mut tasks = JoinSet::new();

        let broken = |_: &DecodedEvent, _: U256| ProfitScore {
            gross_profit: U256::ZERO,
            success_rate: f64::INFINITY,
            risk: RiskLevel::High,
        };
        let estimator = Arc::new(Estimator::new(GasModel::default(), Arc::new(broken)));
        EstimatorPool::new(estimator, in_rx, out_tx, stats.clone()).spawn(1, &mut tasks, CancellationToken::new());

        in_tx.send(event(U256::ZERO, GWEI)).await.unwrap();
        drop(in_tx);
        while tasks.join_next().await.is_some() {}

        let s = stats.snapshot();
        assert_eq!(s.failed, 1);
        assert_eq!(s.dropped, 0);
    }
}
