//! Mock Pipeline Integration Tests
//!
//! Runs the full pipeline against an in-memory feed and a mocked opportunity
//! handler (no node, no Redis). Verifies fetch → filter/decode → estimate →
//! sink end to end.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{address, Address, Bytes, TxHash, B256, U256};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use mockall::mock;
use tokio_util::sync::CancellationToken;

use mempool_sniper::config::SniperConfig;
use mempool_sniper::decoder::{decode_transaction, FilterReason};
use mempool_sniper::estimator::ProfitScore;
use mempool_sniper::feed::{FeedConnection, FeedConnector, FeedError, FeedStream, FetchedTransaction};
use mempool_sniper::fetch::normalize;
use mempool_sniper::filter::{DexMethodId, RouterRegistry, UNISWAP_V2_ROUTER};
use mempool_sniper::publisher::OpportunityMessage;
use mempool_sniper::sink::{OpportunityHandler, SinkError};
use mempool_sniper::stats::{StatsRegistry, StatsSnapshot};
use mempool_sniper::types::{BlockHead, DecodedEvent, ProfitEstimate, RiskLevel, SwapDirection};
use mempool_sniper::Pipeline;

const ONE_ETH: u128 = 1_000_000_000_000_000_000;
const GWEI: u128 = 1_000_000_000;

mock! {
    pub Handler {}

    #[async_trait]
    impl OpportunityHandler for Handler {
        async fn handle(&self, estimate: &ProfitEstimate) -> Result<(), SinkError>;
    }
}

/// One connection serving a fixed set of pending transactions.
struct MemoryConnection {
    heads: Mutex<Option<FeedStream<BlockHead>>>,
    pending: Mutex<Option<FeedStream<TxHash>>>,
    transactions: HashMap<TxHash, FetchedTransaction>,
}

#[async_trait]
impl FeedConnection for MemoryConnection {
    async fn subscribe_heads(&self) -> Result<FeedStream<BlockHead>, FeedError> {
        self.heads.lock().unwrap().take().ok_or(FeedError::Closed)
    }

    async fn subscribe_pending(&self) -> Result<FeedStream<TxHash>, FeedError> {
        self.pending.lock().unwrap().take().ok_or(FeedError::Closed)
    }

    async fn transaction_by_hash(
        &self,
        hash: TxHash,
    ) -> Result<Option<FetchedTransaction>, FeedError> {
        Ok(self.transactions.get(&hash).cloned())
    }

    async fn close(&self) {}
}

/// Hands out the memory connection once; later connects are refused.
struct MemoryFeed {
    connection: Mutex<Option<Arc<MemoryConnection>>>,
}

impl MemoryFeed {
    fn new(transactions: Vec<FetchedTransaction>) -> Arc<Self> {
        let hashes: Vec<TxHash> = transactions.iter().map(|tx| tx.hash).collect();
        let heads = stream::iter(vec![Ok(BlockHead { number: 19_000_000, hash: B256::repeat_byte(1) })])
            .chain(stream::pending())
            .boxed();
        let pending = stream::iter(hashes.into_iter().map(Ok)).chain(stream::pending()).boxed();

        let connection = MemoryConnection {
            heads: Mutex::new(Some(heads)),
            pending: Mutex::new(Some(pending)),
            transactions: transactions.into_iter().map(|tx| (tx.hash, tx)).collect(),
        };
        Arc::new(Self { connection: Mutex::new(Some(Arc::new(connection))) })
    }
}

#[async_trait]
impl FeedConnector for MemoryFeed {
    fn endpoint(&self) -> &str {
        "memory://feed"
    }

    async fn connect(&self) -> Result<Arc<dyn FeedConnection>, FeedError> {
        match self.connection.lock().unwrap().take() {
            Some(conn) => Ok(conn),
            None => Err(FeedError::Connect("feed exhausted".into())),
        }
    }
}

/// Handler that keeps every estimate it receives.
#[derive(Default)]
struct CapturingHandler {
    received: Mutex<Vec<ProfitEstimate>>,
}

#[async_trait]
impl OpportunityHandler for CapturingHandler {
    async fn handle(&self, estimate: &ProfitEstimate) -> Result<(), SinkError> {
        self.received.lock().unwrap().push(estimate.clone());
        Ok(())
    }
}

fn calldata(method: DexMethodId) -> Bytes {
    let mut data = method.selector().to_vec();
    data.extend_from_slice(&[0u8; 160]);
    Bytes::from(data)
}

fn pending_tx(tag: u8, to: Option<Address>, input: Bytes, value: u128) -> FetchedTransaction {
    FetchedTransaction {
        hash: TxHash::repeat_byte(tag),
        sender: Some(address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266")),
        to,
        value: U256::from(value),
        gas_price: 20 * GWEI,
        gas_limit: 250_000,
        input,
        nonce: tag as u64,
        chain_id: Some(1),
        is_pending: true,
    }
}

fn config() -> SniperConfig {
    let mut config = SniperConfig::default();
    config.feed.ws_url = "memory://feed".to_string();
    config.pipeline.decode_workers = 2;
    config.pipeline.estimate_workers = 2;
    config
}

async fn wait_until(stats: &StatsRegistry, condition: impl Fn(&StatsSnapshot) -> bool) {
    for _ in 0..400 {
        if condition(&stats.snapshot()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("pipeline never reached expected state: {:?}", stats.snapshot());
}

async fn run_until(
    pipeline: Pipeline,
    condition: impl Fn(&StatsSnapshot) -> bool,
) -> StatsSnapshot {
    let pipeline = Arc::new(pipeline);
    let stats = pipeline.stats();
    let cancel = CancellationToken::new();

    let runner = {
        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.run(cancel).await })
    };

    wait_until(&stats, condition).await;
    cancel.cancel();
    runner.await.unwrap().unwrap()
}

// ==================== Decode scenarios ====================

#[test]
fn test_eth_swap_decodes_as_buy() {
    let record = normalize(pending_tx(1, Some(UNISWAP_V2_ROUTER), calldata(DexMethodId::SwapExactEthForTokens), ONE_ETH));
    let event = decode_transaction(record, &RouterRegistry::default()).unwrap();

    assert_eq!(event.method_name(), "swapExactETHForTokens");
    assert_eq!(event.direction, SwapDirection::Buy);
    assert!(event.is_swap);
    assert_eq!(event.amount_in, U256::from(ONE_ETH));
}

#[test]
fn test_contract_creation_is_filtered() {
    let record = normalize(pending_tx(2, None, calldata(DexMethodId::SwapExactEthForTokens), ONE_ETH));
    assert_eq!(
        decode_transaction(record, &RouterRegistry::default()).unwrap_err(),
        FilterReason::ContractCreation
    );
}

#[test]
fn test_unknown_router_rejected_before_selector_check() {
    let stranger = address!("00000000000000000000000000000000deadbeef");
    // selector is garbage too, but the router check comes first
    let record = normalize(pending_tx(3, Some(stranger), Bytes::from(vec![0xde, 0xad]), ONE_ETH));
    assert_eq!(
        decode_transaction(record, &RouterRegistry::default()).unwrap_err(),
        FilterReason::UnknownRouter(stranger)
    );
}

// ==================== Full pipeline ====================

#[tokio::test]
async fn test_pipeline_surfaces_profitable_swap() {
    let feed = MemoryFeed::new(vec![
        pending_tx(1, Some(UNISWAP_V2_ROUTER), calldata(DexMethodId::SwapExactEthForTokens), ONE_ETH),
        pending_tx(2, None, calldata(DexMethodId::SwapExactEthForTokens), ONE_ETH),
        pending_tx(3, Some(Address::repeat_byte(0x42)), calldata(DexMethodId::SwapExactEthForTokens), ONE_ETH),
    ]);

    let mut handler = MockHandler::new();
    handler
        .expect_handle()
        .withf(|e| {
            e.tx_hash == TxHash::repeat_byte(1)
                && e.method == "swapExactETHForTokens"
                && e.gross_profit == U256::from(10_000_000_000_000_000u128)
        })
        .times(1)
        .returning(|_| Ok(()));

    let pipeline = Pipeline::new(config(), feed, Arc::new(handler));
    let snapshot = run_until(pipeline, |s| s.surfaced == 1 && s.filtered == 2).await;

    assert_eq!(snapshot.fetched, 3);
    assert_eq!(snapshot.processed, 3);
    assert_eq!(snapshot.decoded, 1);
    assert_eq!(snapshot.simulated, 1);
    assert_eq!(snapshot.profitable, 1);
    assert_eq!(snapshot.dropped, 0);
    assert!((snapshot.decode_success_rate() - 1.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_pipeline_discards_mined_and_unknown_methods() {
    let mut mined = pending_tx(4, Some(UNISWAP_V2_ROUTER), calldata(DexMethodId::SwapExactEthForTokens), ONE_ETH);
    mined.is_pending = false;
    let feed = MemoryFeed::new(vec![
        mined,
        pending_tx(5, Some(UNISWAP_V2_ROUTER), calldata(DexMethodId::AddLiquidityEth), ONE_ETH),
        pending_tx(6, Some(UNISWAP_V2_ROUTER), Bytes::from(vec![0x7f, 0xf3]), ONE_ETH),
    ]);

    let mut handler = MockHandler::new();
    handler.expect_handle().times(0);

    let pipeline = Pipeline::new(config(), feed, Arc::new(handler));
    let snapshot = run_until(pipeline, |s| s.stale == 1 && s.filtered == 2).await;

    assert_eq!(snapshot.fetched, 2);
    assert_eq!(snapshot.decoded, 0);
    assert_eq!(snapshot.simulated, 0);
}

#[tokio::test]
async fn test_pipeline_applies_sink_thresholds() {
    // 1% of 0.1 ETH minus gas is below the 0.001 ETH minimum
    let small = 100_000_000_000_000_000;
    let feed = MemoryFeed::new(vec![
        pending_tx(7, Some(UNISWAP_V2_ROUTER), calldata(DexMethodId::SwapExactTokensForEth), small),
        pending_tx(8, Some(UNISWAP_V2_ROUTER), calldata(DexMethodId::SwapExactTokensForTokens), 2 * ONE_ETH),
    ]);

    let handler = Arc::new(CapturingHandler::default());
    let pipeline = Pipeline::new(config(), feed, handler.clone());
    let snapshot = run_until(pipeline, |s| s.simulated == 2 && s.surfaced == 1).await;

    assert_eq!(snapshot.profitable, 1);
    let received = handler.received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].method, "swapExactTokensForTokens");
    assert_eq!(received[0].risk, RiskLevel::High);

    let message = OpportunityMessage::from_estimate(&received[0]);
    assert_eq!(message.hash, format!("{:#x}", TxHash::repeat_byte(8)));
    assert_eq!(message.gross_profit, "20000000000000000");
    assert_eq!(message.risk, "high");
}

#[tokio::test]
async fn test_pipeline_counts_handler_failures() {
    let feed = MemoryFeed::new(vec![pending_tx(
        9,
        Some(UNISWAP_V2_ROUTER),
        calldata(DexMethodId::SwapExactEthForTokens),
        ONE_ETH,
    )]);

    let mut handler = MockHandler::new();
    handler
        .expect_handle()
        .times(1)
        .returning(|_| Err(SinkError::Rejected("executor offline".into())));

    let pipeline = Pipeline::new(config(), feed, Arc::new(handler));
    let snapshot = run_until(pipeline, |s| s.sink_failed == 1).await;

    assert_eq!(snapshot.surfaced, 0);
    assert_eq!(snapshot.profitable, 1);
}

#[tokio::test]
async fn test_pipeline_with_custom_model_and_routers() {
    let private_router = address!("1111111254EEB25477B68fb85Ed929f73A960582");
    let feed = MemoryFeed::new(vec![
        pending_tx(10, Some(private_router), calldata(DexMethodId::SwapExactEthForTokens), 1_000),
        pending_tx(11, Some(UNISWAP_V2_ROUTER), calldata(DexMethodId::SwapExactEthForTokens), 1_000),
    ]);

    let generous = |_: &DecodedEvent, gas_cost: U256| ProfitScore {
        gross_profit: gas_cost + U256::from(ONE_ETH),
        success_rate: 0.95,
        risk: RiskLevel::Low,
    };

    let handler = Arc::new(CapturingHandler::default());
    let pipeline = Pipeline::new(config(), feed, handler.clone())
        .with_routers(RouterRegistry::with_routers([(private_router, "Aggregator")]))
        .with_profit_model(Arc::new(generous));
    let snapshot = run_until(pipeline, |s| s.surfaced == 1 && s.filtered == 1).await;

    assert_eq!(snapshot.decoded, 1);
    let received = handler.received.lock().unwrap();
    assert_eq!(received[0].target, private_router);
    assert_eq!(received[0].net_profit, U256::from(ONE_ETH));
    assert_eq!(received[0].risk, RiskLevel::Low);
}

#[tokio::test]
async fn test_pipeline_reports_source_stats() {
    let feed = MemoryFeed::new(vec![pending_tx(
        12,
        Some(UNISWAP_V2_ROUTER),
        calldata(DexMethodId::SwapExactEthForTokens),
        ONE_ETH,
    )]);

    let pipeline = Arc::new(Pipeline::new(config(), feed, Arc::new(CapturingHandler::default())));
    let stats = pipeline.stats();
    let cancel = CancellationToken::new();
    let runner = {
        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.run(cancel).await })
    };

    wait_until(&stats, |s| s.surfaced == 1).await;
    let source = pipeline.source_stats();
    assert!(source.running);
    assert_eq!(source.tx_count, 1);
    assert_eq!(source.last_block, Some(19_000_000));
    assert_eq!(source.endpoint, "memory://feed");

    cancel.cancel();
    runner.await.unwrap().unwrap();
    assert!(!pipeline.source_stats().running);
}
