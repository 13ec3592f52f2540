//! Pipeline data model
//!
//! Values that flow stage-to-stage through the bounded channels. Each is
//! built once by the stage that owns it and moved into the next channel.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy::primitives::{Address, Bytes, TxHash, B256, U256};
use serde::{Deserialize, Serialize};

use crate::filter::DexMethodId;

/// A pending transaction resolved from the upstream feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub hash: TxHash,
    /// Recovered sender, `Address::ZERO` when recovery failed
    pub from: Address,
    /// Recipient, `None` for contract creation
    pub to: Option<Address>,
    /// Value in wei
    pub value: U256,
    /// Legacy gas price, or max fee per gas for typed transactions
    pub gas_price: u128,
    pub gas_limit: u64,
    pub input: Bytes,
    pub nonce: u64,
    pub chain_id: Option<u64>,
    /// Unix timestamp in milliseconds when the record was built
    pub observed_at_ms: u64,
}

impl TransactionRecord {
    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapDirection {
    /// Native currency in, tokens out
    Buy,
    /// Tokens in, native currency out
    Sell,
    /// Token to token, no native leg
    Swap,
}

impl SwapDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapDirection::Buy => "buy",
            SwapDirection::Sell => "sell",
            SwapDirection::Swap => "swap",
        }
    }
}

impl fmt::Display for SwapDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transaction that matched a known router swap method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    pub tx: TransactionRecord,
    pub method: DexMethodId,
    pub selector: [u8; 4],
    pub target: Address,
    pub is_swap: bool,
    pub direction: SwapDirection,
    /// `Address::ZERO` stands for the native currency
    pub token_in: Option<Address>,
    pub token_out: Option<Address>,
    /// Approximated as the transaction value for every direction
    pub amount_in: U256,
    pub amount_out_min: Option<U256>,
}

impl DecodedEvent {
    pub fn method_name(&self) -> &'static str {
        self.method.name()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Bucket a success rate: >= 0.9 low, >= 0.7 medium, else high.
    pub fn from_success_rate(rate: f64) -> Self {
        if rate >= 0.9 {
            RiskLevel::Low
        } else if rate >= 0.7 {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scored decoded event.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfitEstimate {
    pub tx_hash: TxHash,
    pub target: Address,
    pub method: &'static str,
    pub gross_profit: U256,
    pub gas_cost: U256,
    /// `gross_profit - gas_cost`, floored at zero
    pub net_profit: U256,
    pub success_rate: f64,
    pub risk: RiskLevel,
    pub latency: Duration,
    pub gas_price: u128,
    pub gas_limit: u64,
}

impl ProfitEstimate {
    pub fn is_profitable(&self) -> bool {
        !self.net_profit.is_zero()
    }
}

/// New block header notification, reduced to what the pipeline logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHead {
    pub number: u64,
    pub hash: B256,
}

/// Current Unix time in milliseconds
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
