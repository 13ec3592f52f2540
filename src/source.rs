//! Event Source
//!
//! Owns the node connection. Subscribes to new heads and pending transaction
//! hashes, hands each hash to the fetch stage, and reconnects with backoff
//! whenever either subscription fails. It never gives up on its own; only
//! cancellation or `stop` ends the loop.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use alloy::primitives::TxHash;
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backoff::BackoffPolicy;
use crate::config::FetchConfig;
use crate::feed::{FeedConnection, FeedConnector, FeedError, FeedStream};
use crate::fetch::Fetcher;
use crate::stats::{Counter, StatsRegistry};
use crate::types::{BlockHead, TransactionRecord};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Event source is already running")]
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
    Stopped,
    Connecting,
    Subscribed,
    /// Subscription lost, waiting out the backoff delay
    Degraded,
}

/// Point-in-time view of the source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStats {
    pub running: bool,
    pub state: SourceState,
    /// Pending hashes handed to the fetch stage since start. Hashes skipped
    /// by the fan-out bound are not counted.
    pub tx_count: u64,
    pub elapsed: Duration,
    /// tx_count per second of elapsed time
    pub throughput: f64,
    pub endpoint: String,
    pub last_block: Option<u64>,
    pub reconnects: u64,
    pub backoff: Duration,
}

struct Inner {
    running: bool,
    state: SourceState,
    /// Increments on every start so a finishing run cannot clobber a newer one
    generation: u64,
    cancel: Option<CancellationToken>,
    connection: Option<Arc<dyn FeedConnection>>,
    tx_count: u64,
    started_at: Option<Instant>,
    last_block: Option<u64>,
    reconnects: u64,
    backoff: Duration,
}

struct Shared {
    connector: Arc<dyn FeedConnector>,
    policy: BackoffPolicy,
    fetch: FetchConfig,
    fetch_permits: Arc<Semaphore>,
    stats: Arc<StatsRegistry>,
    inner: Mutex<Inner>,
}

enum SessionEnd {
    Cancelled,
    Lost(FeedError),
}

struct Session {
    connection: Arc<dyn FeedConnection>,
    heads: FeedStream<BlockHead>,
    pending: FeedStream<TxHash>,
}

pub struct EventSource {
    shared: Arc<Shared>,
}

impl EventSource {
    pub fn new(
        connector: Arc<dyn FeedConnector>,
        policy: BackoffPolicy,
        fetch: FetchConfig,
        max_concurrent_fetches: usize,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        let inner = Inner {
            running: false,
            state: SourceState::Stopped,
            generation: 0,
            cancel: None,
            connection: None,
            tx_count: 0,
            started_at: None,
            last_block: None,
            reconnects: 0,
            backoff: policy.initial,
        };
        Self {
            shared: Arc::new(Shared {
                connector,
                policy,
                fetch,
                fetch_permits: Arc::new(Semaphore::new(max_concurrent_fetches)),
                stats,
                inner: Mutex::new(inner),
            }),
        }
    }

    /// Spawn the subscription loop. Records resolved from pending hashes are
    /// sent to `tx_sender`.
    pub fn start(
        &self,
        cancel: &CancellationToken,
        tx_sender: mpsc::Sender<TransactionRecord>,
    ) -> Result<JoinHandle<()>, SourceError> {
        let token = cancel.child_token();
        let generation = {
            let mut inner = self.shared.lock();
            if inner.running {
                return Err(SourceError::AlreadyRunning);
            }
            inner.running = true;
            inner.state = SourceState::Connecting;
            inner.generation += 1;
            inner.cancel = Some(token.clone());
            inner.tx_count = 0;
            inner.started_at = Some(Instant::now());
            inner.backoff = self.shared.policy.initial;
            inner.generation
        };

        info!(endpoint = self.shared.connector.endpoint(), "starting event source");
        let fetcher = Fetcher::new(self.shared.fetch.clone(), tx_sender, self.shared.stats.clone());
        let shared = self.shared.clone();
        Ok(tokio::spawn(async move { shared.run(generation, fetcher, token).await }))
    }

    /// Cancel the loop and release the connection. Safe to call repeatedly.
    pub async fn stop(&self) {
        let (cancel, connection) = {
            let mut inner = self.shared.lock();
            if !inner.running {
                return;
            }
            inner.running = false;
            inner.state = SourceState::Stopped;
            (inner.cancel.take(), inner.connection.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(connection) = connection {
            connection.close().await;
        }
        info!("event source stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    pub fn state(&self) -> SourceState {
        self.shared.lock().state
    }

    pub fn stats(&self) -> SourceStats {
        let inner = self.shared.lock();
        let elapsed = inner.started_at.map(|t| t.elapsed()).unwrap_or_default();
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 { inner.tx_count as f64 / secs } else { 0.0 };

        SourceStats {
            running: inner.running,
            state: inner.state,
            tx_count: inner.tx_count,
            elapsed,
            throughput,
            endpoint: self.shared.connector.endpoint().to_string(),
            last_block: inner.last_block,
            reconnects: inner.reconnects,
            backoff: inner.backoff,
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, generation: u64, state: SourceState) {
        let mut inner = self.lock();
        if inner.generation == generation && inner.running {
            inner.state = state;
        }
    }

    async fn run(self: Arc<Self>, generation: u64, fetcher: Fetcher, cancel: CancellationToken) {
        let mut backoff = self.policy.start();

        loop {
            self.set_state(generation, SourceState::Connecting);

            let err = match self.open_session(generation, &cancel).await {
                Ok(Some(session)) => {
                    if backoff.attempts() > 0 {
                        info!(attempts = backoff.attempts(), "reconnected to node");
                    }
                    backoff.reset();
                    self.lock().backoff = backoff.current();
                    self.set_state(generation, SourceState::Subscribed);
                    info!(endpoint = self.connector.endpoint(), "subscribed to heads and pending transactions");

                    match self.consume(session, &fetcher, &cancel).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Lost(err) => err,
                    }
                }
                Ok(None) => break,
                Err(err) => err,
            };

            self.release_connection(generation).await;
            self.set_state(generation, SourceState::Degraded);

            let delay = backoff.next_delay();
            {
                let mut inner = self.lock();
                inner.reconnects += 1;
                inner.backoff = backoff.current();
            }
            self.stats.record(Counter::Reconnects);
            warn!(
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "subscription lost, reconnecting"
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.release_connection(generation).await;
        let mut inner = self.lock();
        if inner.generation == generation {
            inner.running = false;
            inner.state = SourceState::Stopped;
            inner.cancel = None;
        }
        debug!("event source loop exited");
    }

    /// Connect and open both subscriptions. `Ok(None)` when cancelled.
    async fn open_session(
        &self,
        generation: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<Session>, FeedError> {
        let connection = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            connected = self.connector.connect() => connected?,
        };

        // close-then-replace: the previous handle was released before this attempt
        let stored = {
            let mut inner = self.lock();
            let current = inner.generation == generation && inner.running;
            if current {
                inner.connection = Some(connection.clone());
            }
            current
        };
        if !stored {
            connection.close().await;
            return Ok(None);
        }

        let subscribed = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            subscribed = async {
                tokio::try_join!(connection.subscribe_heads(), connection.subscribe_pending())
            } => subscribed,
        };
        let (heads, pending) = subscribed?;

        Ok(Some(Session { connection, heads, pending }))
    }

    async fn consume(&self, session: Session, fetcher: &Fetcher, cancel: &CancellationToken) -> SessionEnd {
        let Session { connection, mut heads, mut pending } = session;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                head = heads.next() => match head {
                    Some(Ok(head)) => {
                        debug!(block = head.number, hash = %head.hash, "new block");
                        self.lock().last_block = Some(head.number);
                    }
                    Some(Err(err)) => return SessionEnd::Lost(err),
                    None => return SessionEnd::Lost(FeedError::Closed),
                },
                hash = pending.next() => match hash {
                    Some(Ok(hash)) => self.dispatch(&connection, hash, fetcher, cancel),
                    Some(Err(err)) => return SessionEnd::Lost(err),
                    None => return SessionEnd::Lost(FeedError::Closed),
                },
            }
        }
    }

    /// Fire-and-forget fetch, bounded by the permit pool.
    fn dispatch(
        &self,
        connection: &Arc<dyn FeedConnection>,
        hash: TxHash,
        fetcher: &Fetcher,
        cancel: &CancellationToken,
    ) {
        let Ok(permit) = self.fetch_permits.clone().try_acquire_owned() else {
            trace!(%hash, "fetch bound reached, skipping");
            self.stats.record(Counter::FetchSkipped);
            return;
        };
        self.lock().tx_count += 1;

        let connection = connection.clone();
        let fetcher = fetcher.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let outcome = fetcher.fetch_and_forward(connection.as_ref(), hash, &cancel).await;
            trace!(%hash, ?outcome, "fetch finished");
        });
    }

    async fn release_connection(&self, generation: u64) {
        let connection = {
            let mut inner = self.lock();
            if inner.generation == generation {
                inner.connection.take()
            } else {
                None
            }
        };
        if let Some(connection) = connection {
            connection.close().await;
        }
    }
}
