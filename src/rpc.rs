//! Node RPC Connection
//!
//! alloy-backed `FeedConnector`. Connects over WebSocket or a Unix IPC socket,
//! exposes head and pending-hash subscriptions, and resolves pending hashes
//! into `FetchedTransaction`s with the sender recovered from the signature.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::consensus::transaction::SignerRecoverable;
use alloy::consensus::Transaction as _;
use alloy::primitives::TxHash;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::Transaction;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::feed::{FeedConnection, FeedConnector, FeedError, FeedStream, FetchedTransaction};
use crate::types::BlockHead;

/// Timeout for a single by-hash lookup
pub const REQUEST_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
    Ipc,
}

/// Classify an endpoint string; `None` for transports without subscriptions.
pub fn transport_kind(endpoint: &str) -> Option<TransportKind> {
    let lower = endpoint.to_ascii_lowercase();
    if lower.starts_with("ws://") || lower.starts_with("wss://") {
        Some(TransportKind::WebSocket)
    } else if lower.starts_with("http://") || lower.starts_with("https://") || lower.is_empty() {
        None
    } else {
        Some(TransportKind::Ipc)
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().into_owned();
        }
    }
    path.to_string()
}

/// Check if an IPC socket exists at the given path
pub fn socket_exists(path: &str) -> bool {
    Path::new(&expand_path(path)).exists()
}

/// Connector for a single subscription-capable endpoint.
#[derive(Debug, Clone)]
pub struct RpcConnector {
    endpoint: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    chain_id: Option<u64>,
}

impl RpcConnector {
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout,
            request_timeout: Duration::from_millis(REQUEST_TIMEOUT_MS),
            chain_id: None,
        }
    }

    /// Reject nodes that report a different chain id on connect.
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    fn resolved_endpoint(&self) -> Result<String, FeedError> {
        match transport_kind(&self.endpoint) {
            Some(TransportKind::WebSocket) => Ok(self.endpoint.clone()),
            Some(TransportKind::Ipc) => {
                let expanded = expand_path(&self.endpoint);
                if !Path::new(&expanded).exists() {
                    return Err(FeedError::Connect(format!("IPC socket not found at {expanded}")));
                }
                Ok(expanded)
            }
            None => Err(FeedError::Connect(format!(
                "endpoint '{}' does not support subscriptions",
                self.endpoint
            ))),
        }
    }
}

#[async_trait]
impl FeedConnector for RpcConnector {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> Result<Arc<dyn FeedConnection>, FeedError> {
        let endpoint = self.resolved_endpoint()?;
        info!(endpoint = %endpoint, "connecting to node");

        let provider = timeout(self.connect_timeout, ProviderBuilder::new().connect(&endpoint))
            .await
            .map_err(|_| FeedError::Timeout(self.connect_timeout.as_millis() as u64))?
            .map_err(|e| FeedError::Connect(e.to_string()))?
            .erased();

        if let Some(expected) = self.chain_id {
            let actual = timeout(self.request_timeout, provider.get_chain_id())
                .await
                .map_err(|_| FeedError::Timeout(self.request_timeout.as_millis() as u64))?
                .map_err(|e| FeedError::Request(e.to_string()))?;
            if actual != expected {
                return Err(FeedError::Connect(format!(
                    "chain id mismatch: expected {expected}, node reports {actual}"
                )));
            }
            debug!(chain_id = actual, "chain id verified");
        }

        Ok(Arc::new(RpcConnection {
            provider: Mutex::new(Some(provider)),
            request_timeout: self.request_timeout,
        }))
    }
}

/// Live provider handle; `close` drops it so the transport shuts down.
pub struct RpcConnection {
    provider: Mutex<Option<DynProvider>>,
    request_timeout: Duration,
}

impl RpcConnection {
    fn provider(&self) -> Result<DynProvider, FeedError> {
        self.provider
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(FeedError::Closed)
    }
}

#[async_trait]
impl FeedConnection for RpcConnection {
    async fn subscribe_heads(&self) -> Result<FeedStream<BlockHead>, FeedError> {
        let sub = self
            .provider()?
            .subscribe_blocks()
            .await
            .map_err(|e| FeedError::Subscribe(e.to_string()))?;

        Ok(sub
            .into_stream()
            .map(|header| Ok(BlockHead { number: header.inner.number, hash: header.hash }))
            .boxed())
    }

    async fn subscribe_pending(&self) -> Result<FeedStream<TxHash>, FeedError> {
        let sub = self
            .provider()?
            .subscribe_pending_transactions()
            .await
            .map_err(|e| FeedError::Subscribe(e.to_string()))?;

        Ok(sub.into_stream().map(Ok).boxed())
    }

    async fn transaction_by_hash(
        &self,
        hash: TxHash,
    ) -> Result<Option<FetchedTransaction>, FeedError> {
        let provider = self.provider()?;
        let result = timeout(self.request_timeout, provider.get_transaction_by_hash(hash))
            .await
            .map_err(|_| FeedError::Timeout(self.request_timeout.as_millis() as u64))?
            .map_err(|e| FeedError::Request(e.to_string()))?;

        Ok(result.map(|tx| map_transaction(hash, tx)))
    }

    async fn close(&self) {
        let taken = self.provider.lock().unwrap_or_else(|e| e.into_inner()).take();
        if taken.is_some() {
            debug!("node connection released");
        }
    }
}

fn map_transaction(hash: TxHash, tx: Transaction) -> FetchedTransaction {
    // signing hash commits to the chain id, so recovery is chain-aware
    let sender = match tx.inner.inner().recover_signer() {
        Ok(address) => Some(address),
        Err(err) => {
            warn!(%hash, error = %err, "sender recovery failed");
            None
        }
    };

    FetchedTransaction {
        hash,
        sender,
        to: tx.to(),
        value: tx.value(),
        gas_price: tx.gas_price().unwrap_or_else(|| tx.max_fee_per_gas()),
        gas_limit: tx.gas_limit(),
        input: tx.input().clone(),
        nonce: tx.nonce(),
        chain_id: tx.chain_id(),
        is_pending: tx.block_number.is_none(),
    }
}
