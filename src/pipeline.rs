//! Pipeline wiring
//!
//! Builds the bounded channels between stages, spawns every worker pool and
//! the Event Source, and drains them on cancellation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SniperConfig;
use crate::decoder::DecoderPool;
use crate::estimator::{Estimator, EstimatorPool, GasModel, ProfitModel};
use crate::feed::FeedConnector;
use crate::filter::RouterRegistry;
use crate::sink::{OpportunityFilter, OpportunityHandler, ResultSink};
use crate::source::{EventSource, SourceError, SourceStats};
use crate::stats::{report_periodically, StatsRegistry, StatsSnapshot};

/// Upper bound on draining workers after cancellation
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Pipeline {
    config: SniperConfig,
    handler: Arc<dyn OpportunityHandler>,
    routers: Arc<RouterRegistry>,
    estimator: Arc<Estimator>,
    source: EventSource,
    stats: Arc<StatsRegistry>,
}

impl Pipeline {
    pub fn new(
        config: SniperConfig,
        connector: Arc<dyn FeedConnector>,
        handler: Arc<dyn OpportunityHandler>,
    ) -> Self {
        let stats = StatsRegistry::new();
        let source = EventSource::new(
            connector,
            config.feed.backoff,
            config.fetch.clone(),
            config.pipeline.max_concurrent_fetches,
            stats.clone(),
        );
        let estimator = Arc::new(Estimator::from_config(&config.estimator));

        Self {
            config,
            handler,
            routers: Arc::new(RouterRegistry::default()),
            estimator,
            source,
            stats,
        }
    }

    pub fn with_routers(mut self, routers: RouterRegistry) -> Self {
        self.routers = Arc::new(routers);
        self
    }

    /// Replace the scoring function; gas accounting stays as configured.
    pub fn with_profit_model(mut self, model: Arc<dyn ProfitModel>) -> Self {
        self.estimator = Arc::new(Estimator::new(GasModel::new(&self.config.estimator), model));
        self
    }

    pub fn stats(&self) -> Arc<StatsRegistry> {
        self.stats.clone()
    }

    pub fn source_stats(&self) -> SourceStats {
        self.source.stats()
    }

    /// Run every stage until `cancel` fires, then drain and return the final
    /// counters.
    pub async fn run(&self, cancel: CancellationToken) -> Result<StatsSnapshot, SourceError> {
        let settings = &self.config.pipeline;
        let (tx_sender, tx_receiver) = mpsc::channel(settings.tx_channel_capacity);
        let (decoded_sender, decoded_receiver) = mpsc::channel(settings.decoded_channel_capacity);
        let (estimate_sender, estimate_receiver) = mpsc::channel(settings.estimate_channel_capacity);

        let mut tasks = JoinSet::new();

        DecoderPool::new(self.routers.clone(), tx_receiver, decoded_sender, self.stats.clone())
            .spawn(settings.decode_workers, &mut tasks, cancel.clone());

        EstimatorPool::new(self.estimator.clone(), decoded_receiver, estimate_sender, self.stats.clone())
            .spawn(settings.estimate_workers, &mut tasks, cancel.clone());

        let sink = ResultSink::new(OpportunityFilter::new(&self.config.sink), self.stats.clone());
        let handler = self.handler.clone();
        let sink_cancel = cancel.clone();
        tasks.spawn(async move { sink.run(estimate_receiver, handler, sink_cancel).await });

        tasks.spawn(report_periodically(self.stats.clone(), settings.stats_interval, cancel.clone()));

        let source_task = self.source.start(&cancel, tx_sender)?;
        info!(
            decode_workers = settings.decode_workers,
            estimate_workers = settings.estimate_workers,
            max_concurrent_fetches = settings.max_concurrent_fetches,
            "pipeline running"
        );

        cancel.cancelled().await;
        info!("shutting down pipeline");
        self.source.stop().await;

        let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            if let Err(err) = source_task.await {
                warn!(error = %err, "event source task failed");
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(err) = joined {
                    warn!(error = %err, "pipeline task failed");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(timeout_ms = SHUTDOWN_TIMEOUT.as_millis() as u64, "shutdown timed out, aborting tasks");
            tasks.abort_all();
        }

        let snapshot = self.stats.snapshot();
        info!(
            processed = snapshot.processed,
            decoded = snapshot.decoded,
            simulated = snapshot.simulated,
            profitable = snapshot.profitable,
            surfaced = snapshot.surfaced,
            "pipeline stopped"
        );
        Ok(snapshot)
    }
}
