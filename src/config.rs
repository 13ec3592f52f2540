//! Sniper configuration
//!
//! Loaded once at startup (environment plus an optional `.env` file) and
//! shared read-only afterwards.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::U256;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::backoff::{BackoffPolicy, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS};

/// Placeholder endpoint shipped in sample env files
pub const PLACEHOLDER_WSS_URL: &str = "wss://mainnet.infura.io/ws/v3/YOUR_INFURA_PROJECT_ID";

pub const DEFAULT_CHAIN_ID: u64 = 1;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_DECODE_WORKERS: usize = 5;
pub const DEFAULT_ESTIMATE_WORKERS: usize = 3;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 256;
pub const DEFAULT_FETCH_ATTEMPTS: u32 = 3;
pub const DEFAULT_FETCH_RETRY_STEP_MS: u64 = 100;
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 30;

pub const DEFAULT_BASE_GAS: u64 = 21_000;
pub const DEFAULT_SWAP_GAS: u64 = 50_000;
/// 30 gwei
pub const DEFAULT_FALLBACK_GAS_PRICE: u128 = 30_000_000_000;
/// Gross profit is `value / DEFAULT_PROFIT_DIVISOR` (1%)
pub const DEFAULT_PROFIT_DIVISOR: u64 = 100;
pub const DEFAULT_BASE_SUCCESS_RATE: f64 = 0.8;
/// 1 ETH
pub const DEFAULT_LARGE_VALUE_THRESHOLD: u128 = 1_000_000_000_000_000_000;
pub const DEFAULT_LARGE_VALUE_PENALTY: f64 = 0.7;
/// 100 gwei
pub const DEFAULT_HIGH_GAS_PRICE_THRESHOLD: u128 = 100_000_000_000;
pub const DEFAULT_HIGH_GAS_PRICE_PENALTY: f64 = 0.9;

/// 0.001 ETH
pub const DEFAULT_MIN_PROFIT: u128 = 1_000_000_000_000_000;
/// 50 gwei
pub const DEFAULT_MAX_GAS_PRICE: u128 = 50_000_000_000;
pub const DEFAULT_MAX_GAS_LIMIT: u64 = 300_000;
pub const DEFAULT_REDIS_CHANNEL: &str = "mempool_opportunities";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },

    #[error("{0} must be configured")]
    Missing(&'static str),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{key} must not exceed {max}, got {value}")]
    TooLarge { key: &'static str, value: usize, max: usize },

    #[error("initial backoff {initial:?} exceeds maximum {max:?}")]
    BackoffRange { initial: Duration, max: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    /// Subscription endpoint: ws(s):// URL or IPC socket path
    pub ws_url: String,
    pub chain_id: u64,
    pub backoff: BackoffPolicy,
    pub connect_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            chain_id: DEFAULT_CHAIN_ID,
            backoff: BackoffPolicy::new(INITIAL_BACKOFF_MS, MAX_BACKOFF_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub decode_workers: usize,
    pub estimate_workers: usize,
    pub tx_channel_capacity: usize,
    pub decoded_channel_capacity: usize,
    pub estimate_channel_capacity: usize,
    /// Bound on in-flight identifier lookups
    pub max_concurrent_fetches: usize,
    pub stats_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decode_workers: DEFAULT_DECODE_WORKERS,
            estimate_workers: DEFAULT_ESTIMATE_WORKERS,
            tx_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            decoded_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            estimate_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            stats_interval: Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    pub attempts: u32,
    /// Delay after attempt `n` (1-based) is `n * retry_step`
    pub retry_step: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_FETCH_ATTEMPTS,
            retry_step: Duration::from_millis(DEFAULT_FETCH_RETRY_STEP_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorConfig {
    pub base_gas: u64,
    pub swap_gas: u64,
    pub fallback_gas_price: u128,
    pub profit_divisor: u64,
    pub base_success_rate: f64,
    pub large_value_threshold: U256,
    pub large_value_penalty: f64,
    pub high_gas_price_threshold: u128,
    pub high_gas_price_penalty: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            base_gas: DEFAULT_BASE_GAS,
            swap_gas: DEFAULT_SWAP_GAS,
            fallback_gas_price: DEFAULT_FALLBACK_GAS_PRICE,
            profit_divisor: DEFAULT_PROFIT_DIVISOR,
            base_success_rate: DEFAULT_BASE_SUCCESS_RATE,
            large_value_threshold: U256::from(DEFAULT_LARGE_VALUE_THRESHOLD),
            large_value_penalty: DEFAULT_LARGE_VALUE_PENALTY,
            high_gas_price_threshold: DEFAULT_HIGH_GAS_PRICE_THRESHOLD,
            high_gas_price_penalty: DEFAULT_HIGH_GAS_PRICE_PENALTY,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    pub min_profit: U256,
    pub max_gas_price: u128,
    pub max_gas_limit: u64,
    pub redis_url: Option<String>,
    pub redis_channel: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            min_profit: U256::from(DEFAULT_MIN_PROFIT),
            max_gas_price: DEFAULT_MAX_GAS_PRICE,
            max_gas_limit: DEFAULT_MAX_GAS_LIMIT,
            redis_url: None,
            redis_channel: DEFAULT_REDIS_CHANNEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SniperConfig {
    pub feed: FeedConfig,
    pub pipeline: PipelineConfig,
    pub fetch: FetchConfig,
    pub estimator: EstimatorConfig,
    pub sink: SinkConfig,
    pub log_level: String,
    /// Optional file that receives a copy of the log output
    pub log_file: Option<PathBuf>,
}

impl Default for SniperConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            pipeline: PipelineConfig::default(),
            fetch: FetchConfig::default(),
            estimator: EstimatorConfig::default(),
            sink: SinkConfig::default(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_file: None,
        }
    }
}

impl SniperConfig {
    /// Build from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let config = Self::from_lookup(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build from an arbitrary key lookup, defaults for anything unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = get("ETH_WSS_URL") {
            config.feed.ws_url = url;
        }
        parse_into(&get, "ETH_CHAIN_ID", &mut config.feed.chain_id)?;

        parse_into(&get, "WORKER_POOL_SIZE", &mut config.pipeline.decode_workers)?;
        parse_into(&get, "ESTIMATE_POOL_SIZE", &mut config.pipeline.estimate_workers)?;
        if let Some(capacity) = parse::<usize>(&get, "CHANNEL_CAPACITY")? {
            config.pipeline.tx_channel_capacity = capacity;
            config.pipeline.decoded_channel_capacity = capacity;
            config.pipeline.estimate_channel_capacity = capacity;
        }
        parse_into(&get, "MAX_CONCURRENT_FETCHES", &mut config.pipeline.max_concurrent_fetches)?;

        parse_into(&get, "MIN_PROFIT", &mut config.sink.min_profit)?;
        parse_into(&get, "MAX_GAS_PRICE", &mut config.sink.max_gas_price)?;
        parse_into(&get, "MAX_GAS_LIMIT", &mut config.sink.max_gas_limit)?;
        config.sink.redis_url = get("REDIS_URL");
        if let Some(channel) = get("REDIS_CHANNEL") {
            config.sink.redis_channel = channel;
        }

        if let Some(level) = get("LOG_LEVEL") {
            config.log_level = level;
        }
        config.log_file = get("LOG_FILE").map(PathBuf::from);

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feed.ws_url.is_empty() || self.feed.ws_url == PLACEHOLDER_WSS_URL {
            return Err(ConfigError::Missing("ETH_WSS_URL"));
        }
        if self.sink.min_profit.is_zero() {
            return Err(ConfigError::Zero("MIN_PROFIT"));
        }
        if self.sink.max_gas_price == 0 {
            return Err(ConfigError::Zero("MAX_GAS_PRICE"));
        }
        if self.sink.max_gas_limit == 0 {
            return Err(ConfigError::Zero("MAX_GAS_LIMIT"));
        }
        if self.pipeline.decode_workers == 0 {
            return Err(ConfigError::Zero("WORKER_POOL_SIZE"));
        }
        if self.pipeline.estimate_workers == 0 {
            return Err(ConfigError::Zero("ESTIMATE_POOL_SIZE"));
        }
        if self.pipeline.tx_channel_capacity == 0
            || self.pipeline.decoded_channel_capacity == 0
            || self.pipeline.estimate_channel_capacity == 0
        {
            return Err(ConfigError::Zero("CHANNEL_CAPACITY"));
        }
        if self.pipeline.max_concurrent_fetches == 0 {
            return Err(ConfigError::Zero("MAX_CONCURRENT_FETCHES"));
        }
        // tokio semaphores (and bounded channels built on them) panic above this
        let sizes = [
            ("CHANNEL_CAPACITY", self.pipeline.tx_channel_capacity),
            ("CHANNEL_CAPACITY", self.pipeline.decoded_channel_capacity),
            ("CHANNEL_CAPACITY", self.pipeline.estimate_channel_capacity),
            ("MAX_CONCURRENT_FETCHES", self.pipeline.max_concurrent_fetches),
        ];
        for (key, value) in sizes {
            if value > Semaphore::MAX_PERMITS {
                return Err(ConfigError::TooLarge { key, value, max: Semaphore::MAX_PERMITS });
            }
        }
        if self.pipeline.stats_interval.is_zero() {
            return Err(ConfigError::Zero("stats interval"));
        }
        if self.fetch.attempts == 0 {
            return Err(ConfigError::Zero("fetch attempts"));
        }
        let backoff = &self.feed.backoff;
        if backoff.initial > backoff.max {
            return Err(ConfigError::BackoffRange { initial: backoff.initial, max: backoff.max });
        }
        Ok(())
    }
}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(None),
    }
}

fn parse_into<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = parse(get, key)? {
        *slot = value;
    }
    Ok(())
}
