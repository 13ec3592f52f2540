use std::fs::OpenOptions;
use std::sync::Arc;

use eyre::{Result, WrapErr};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use mempool_sniper::{LogHandler, OpportunityHandler, Pipeline, RedisPublisher, RpcConnector, SniperConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = SniperConfig::from_env().wrap_err("invalid configuration")?;

    // RUST_LOG wins over LOG_LEVEL
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let file_layer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .wrap_err_with(|| format!("cannot open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    info!(endpoint = %config.feed.ws_url, chain_id = config.feed.chain_id, "starting mempool sniper");

    let connector = RpcConnector::new(config.feed.ws_url.clone(), config.feed.connect_timeout)
        .with_chain_id(config.feed.chain_id);

    let handler: Arc<dyn OpportunityHandler> = match &config.sink.redis_url {
        Some(url) => match RedisPublisher::connect(url, config.sink.redis_channel.clone()).await {
            Ok(publisher) => Arc::new(publisher),
            Err(err) => {
                warn!(error = %err, "redis unavailable, logging opportunities instead");
                Arc::new(LogHandler)
            }
        },
        None => Arc::new(LogHandler),
    };

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let pipeline = Pipeline::new(config, Arc::new(connector), handler);
    let snapshot = pipeline.run(cancel).await?;

    info!(
        fetched = snapshot.fetched,
        decoded = snapshot.decoded,
        profitable = snapshot.profitable,
        surfaced = snapshot.surfaced,
        dropped = snapshot.dropped,
        "shutdown complete"
    );
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = signal::ctrl_c() => info!("SIGINT - shutting down"),
        _ = terminate => info!("SIGTERM - shutting down"),
    }
    cancel.cancel();
}
