//! Upstream feed interface
//!
//! The Event Source and the fetch stage only talk to the node through these
//! traits. `rpc` provides the alloy-backed implementation; tests script their
//! own.

use std::sync::Arc;

use alloy::primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::types::BlockHead;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Subscription failed: {0}")]
    Subscribe(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Connection closed")]
    Closed,

    #[error("Timed out after {0}ms")]
    Timeout(u64),
}

/// Stream of subscription notifications. `Err` items and end-of-stream both
/// mean the subscription is gone.
pub type FeedStream<T> = BoxStream<'static, Result<T, FeedError>>;

/// Raw by-hash lookup result before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedTransaction {
    pub hash: TxHash,
    /// Signer recovered from the signature, `None` if recovery failed
    pub sender: Option<Address>,
    pub to: Option<Address>,
    pub value: U256,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub input: Bytes,
    pub nonce: u64,
    pub chain_id: Option<u64>,
    /// `false` once the transaction has been included in a block
    pub is_pending: bool,
}

/// An open connection to the node.
#[async_trait]
pub trait FeedConnection: Send + Sync {
    async fn subscribe_heads(&self) -> Result<FeedStream<BlockHead>, FeedError>;

    async fn subscribe_pending(&self) -> Result<FeedStream<TxHash>, FeedError>;

    /// `Ok(None)` when the node does not know the hash.
    async fn transaction_by_hash(
        &self,
        hash: TxHash,
    ) -> Result<Option<FetchedTransaction>, FeedError>;

    /// Release the underlying transport. Must be safe to call more than once.
    async fn close(&self);
}

/// Opens fresh connections for the Event Source's reconnect loop.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    fn endpoint(&self) -> &str;

    async fn connect(&self) -> Result<Arc<dyn FeedConnection>, FeedError>;
}
