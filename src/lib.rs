//! Mempool Sniper Library
//!
//! Streams pending transactions from a node, keeps swaps sent to known DEX
//! routers, scores them for profit and hands the worthwhile ones to a sink.

pub mod backoff;
pub mod config;
pub mod decoder;
pub mod estimator;
pub mod feed;
pub mod fetch;
pub mod filter;
pub mod pipeline;
pub mod publisher;
pub mod rpc;
pub mod sink;
pub mod source;
pub mod stats;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigError, SniperConfig};
pub use decoder::{decode_transaction, FilterReason};
pub use estimator::{Estimator, HeuristicProfitModel, ProfitModel, ProfitScore};
pub use feed::{FeedConnection, FeedConnector, FeedError};
pub use filter::{get_method_name, is_swap_method, DexMethodId, RouterRegistry};
pub use pipeline::Pipeline;
pub use publisher::{OpportunityMessage, RedisPublisher};
pub use rpc::RpcConnector;
pub use sink::{LogHandler, OpportunityHandler, SinkError};
pub use source::{EventSource, SourceError, SourceState, SourceStats};
pub use stats::{StatsRegistry, StatsSnapshot};
pub use types::{DecodedEvent, ProfitEstimate, RiskLevel, SwapDirection, TransactionRecord};
