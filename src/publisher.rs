//! Redis Publisher
//!
//! Publishes surfaced opportunities to a Redis pub/sub channel as JSON for
//! consumption by downstream executors.

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::DEFAULT_REDIS_CHANNEL;
use crate::sink::{OpportunityHandler, SinkError};
use crate::types::{current_timestamp_millis, ProfitEstimate};

/// Errors that can occur during publishing
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Opportunity message format for Redis publication
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityMessage {
    /// Transaction hash with 0x prefix
    pub hash: String,
    /// Router the swap was sent to
    pub target: String,
    /// Human-readable method name (e.g., "swapExactETHForTokens")
    pub method: String,
    /// Wei amounts as decimal strings
    pub gross_profit: String,
    pub gas_cost: String,
    pub net_profit: String,
    pub gas_price: String,
    pub gas_limit: u64,
    pub success_rate: f64,
    /// "low", "medium" or "high"
    pub risk: String,
    pub latency_us: u64,
    /// Unix timestamp in milliseconds when the opportunity was published
    pub timestamp: u64,
}

impl OpportunityMessage {
    pub fn from_estimate(estimate: &ProfitEstimate) -> Self {
        Self {
            hash: format_hash(estimate.tx_hash),
            target: format_address(estimate.target),
            method: estimate.method.to_string(),
            gross_profit: format_value(estimate.gross_profit),
            gas_cost: format_value(estimate.gas_cost),
            net_profit: format_value(estimate.net_profit),
            gas_price: estimate.gas_price.to_string(),
            gas_limit: estimate.gas_limit,
            success_rate: estimate.success_rate,
            risk: estimate.risk.as_str().to_string(),
            latency_us: estimate.latency.as_micros() as u64,
            timestamp: current_timestamp_millis(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Redis publisher for opportunity messages
#[derive(Clone)]
pub struct RedisPublisher {
    connection: MultiplexedConnection,
    channel: String,
}

impl RedisPublisher {
    /// Wrap an established multiplexed connection
    pub fn new(connection: MultiplexedConnection, channel: impl Into<String>) -> Self {
        Self {
            connection,
            channel: channel.into(),
        }
    }

    /// Open a connection to `url` and publish on `channel`
    pub async fn connect(url: &str, channel: impl Into<String>) -> Result<Self, PublishError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        let publisher = Self::new(connection, channel);
        info!(channel = %publisher.channel, "connected to redis");
        Ok(publisher)
    }

    pub fn with_default_channel(connection: MultiplexedConnection) -> Self {
        Self::new(connection, DEFAULT_REDIS_CHANNEL)
    }

    /// Publish a message, returning the number of subscribers that received it
    pub async fn publish_message(&self, message: &OpportunityMessage) -> Result<i64, PublishError> {
        let json = message.to_json()?;
        let mut connection = self.connection.clone();
        let subscribers: i64 = connection.publish(&self.channel, &json).await?;
        Ok(subscribers)
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl OpportunityHandler for RedisPublisher {
    async fn handle(&self, estimate: &ProfitEstimate) -> Result<(), SinkError> {
        let message = OpportunityMessage::from_estimate(estimate);
        let subscribers = self.publish_message(&message).await?;
        debug!(hash = %message.hash, subscribers, "published opportunity");
        Ok(())
    }
}

/// Format an address as a 0x-prefixed hex string
pub fn format_address(address: Address) -> String {
    format!("{:#x}", address)
}

/// Format a transaction hash as hex string with 0x prefix
pub fn format_hash(hash: TxHash) -> String {
    format!("{:#x}", hash)
}

/// Format a U256 value as decimal string
pub fn format_value(value: U256) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RiskLevel;
    use alloy::primitives::{address, b256};
    use std::time::Duration;

    fn estimate() -> ProfitEstimate {
        ProfitEstimate {
            tx_hash: b256!("1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef"),
            target: address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D"),
            method: "swapExactETHForTokens",
            gross_profit: U256::from(10_000_000_000_000_000u64),
            gas_cost: U256::from(1_420_000_000_000_000u64),
            net_profit: U256::from(8_580_000_000_000_000u64),
            success_rate: 0.8,
            risk: RiskLevel::Medium,
            latency: Duration::from_micros(125),
            gas_price: 20_000_000_000,
            gas_limit: 250_000,
        }
    }

    #[test]
    fn test_message_from_estimate() {
        let message = OpportunityMessage::from_estimate(&estimate());

        assert_eq!(
            message.hash,
            "0x1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef"
        );
        assert_eq!(message.target, "0x7a250d5630b4cf539739df2c5dacb4c659f2488d");
        assert_eq!(message.method, "swapExactETHForTokens");
        assert_eq!(message.gross_profit, "10000000000000000");
        assert_eq!(message.net_profit, "8580000000000000");
        assert_eq!(message.gas_price, "20000000000");
        assert_eq!(message.risk, "medium");
        assert_eq!(message.latency_us, 125);
        assert!(message.timestamp > 1_600_000_000_000);
    }

    #[test]
    fn test_message_uses_camel_case_keys() {
        let json = OpportunityMessage::from_estimate(&estimate()).to_json().unwrap();

        for key in ["\"grossProfit\"", "\"gasCost\"", "\"netProfit\"", "\"gasPrice\"", "\"gasLimit\"", "\"successRate\"", "\"latencyUs\""] {
            assert!(json.contains(key), "missing {key} in {json}");
        }
        assert!(!json.contains("net_profit"));
    }

    #[test]
    fn test_message_from_json() {
        let json = r#"{
            "hash": "0x1234",
            "target": "0xabcd",
            "method": "swapExactTokensForTokens",
            "grossProfit": "1000",
            "gasCost": "400",
            "netProfit": "600",
            "gasPrice": "2000",
            "gasLimit": 210000,
            "successRate": 0.72,
            "risk": "medium",
            "latencyUs": 80,
            "timestamp": 1234567890
        }"#;

        let message = OpportunityMessage::from_json(json).unwrap();
        assert_eq!(message.method, "swapExactTokensForTokens");
        assert_eq!(message.net_profit, "600");
        assert_eq!(message.gas_limit, 210_000);
        assert_eq!(message.timestamp, 1234567890);
    }

    #[test]
    fn test_wei_amounts_are_decimal_strings() {
        let message = OpportunityMessage::from_estimate(&estimate());
        for amount in [&message.gross_profit, &message.gas_cost, &message.net_profit, &message.gas_price] {
            assert!(!amount.starts_with("0x"));
            assert!(amount.parse::<u128>().is_ok());
        }
    }

    #[test]
    fn test_format_address() {
        let formatted = format_address(address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266"));
        assert!(formatted.starts_with("0x"));
        assert_eq!(formatted.len(), 42);
    }

    #[test]
    fn test_format_hash() {
        let formatted = format_hash(TxHash::repeat_byte(0xab));
        assert!(formatted.starts_with("0x"));
        assert_eq!(formatted.len(), 66);
    }

    #[test]
    fn test_format_value_large() {
        // 1000 ETH in wei
        let value = U256::from(1000u64) * U256::from(10u64).pow(U256::from(18));
        assert_eq!(format_value(value), "1000000000000000000000");
        assert_eq!(format_value(U256::ZERO), "0");
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        let result = RedisPublisher::connect("not-a-redis-url", DEFAULT_REDIS_CHANNEL).await;
        assert!(matches!(result, Err(PublishError::Connection(_))));
    }
}
