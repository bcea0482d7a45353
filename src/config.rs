//! Engine and search configuration.

use crate::error::SearchError;
use crate::oracle::abi;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const RPC_URL_ENV: &str = "TWAP_GUARD_RPC_URL";

/// Knobs of the bracketing search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Upper end of the first bracket, USD
    pub initial_high: Decimal,
    /// Stop once the bracket is narrower than this fraction of its top
    pub tolerance: Decimal,
    /// Bracket subdivisions; `ranges - 1` samples per round
    pub ranges: usize,
    /// Stop once the bracket top falls below this many USD
    pub min_bracket: Decimal,
    /// Factor applied to the bracket top when round 0 saturates
    pub expansion_factor: Decimal,
    /// Hard stop on rounds; the closest sample so far is kept
    pub max_rounds: usize,
    /// Charted samples always include everything below this notional
    pub chart_floor: Decimal,
    /// ...and everything below `best.value * chart_headroom`
    pub chart_headroom: Decimal,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            initial_high: Decimal::from(1_000_000_000u64),
            tolerance: Decimal::new(1, 2),
            ranges: 20,
            min_bracket: Decimal::from(100),
            expansion_factor: Decimal::from(1_000_000u64),
            max_rounds: 64,
            chart_floor: Decimal::from(10_000_000u64),
            chart_headroom: Decimal::new(12, 1),
        }
    }
}

impl SearchConfig {
    /// Largest notional the search will ever sample.
    pub fn ceiling(&self) -> Decimal {
        self.initial_high
            .checked_mul(self.expansion_factor)
            .unwrap_or(Decimal::MAX)
    }

    pub fn samples_per_round(&self) -> usize {
        self.ranges.saturating_sub(1)
    }

    pub fn validate(&self) -> std::result::Result<(), SearchError> {
        if self.ranges < 3 {
            return Err(SearchError::InvalidInput(format!(
                "ranges must be at least 3, got {}",
                self.ranges
            )));
        }
        if self.tolerance <= Decimal::ZERO || self.tolerance >= Decimal::ONE {
            return Err(SearchError::InvalidInput(format!(
                "tolerance must be in (0, 1), got {}",
                self.tolerance
            )));
        }
        if self.initial_high <= self.min_bracket {
            return Err(SearchError::InvalidInput(format!(
                "initial bracket {} must exceed the minimum bracket {}",
                self.initial_high, self.min_bracket
            )));
        }
        if self.expansion_factor <= Decimal::ONE {
            return Err(SearchError::InvalidInput(format!(
                "expansion factor must exceed 1, got {}",
                self.expansion_factor
            )));
        }
        if self.max_rounds == 0 {
            return Err(SearchError::InvalidInput("max_rounds must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration for the RPC client, the search engine and the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ethereum JSON-RPC endpoint
    pub rpc_url: String,
    /// Uniswap V3 QuoterV2
    pub quoter_address: Address,
    /// Uniswap V3 factory
    pub factory_address: Address,
    /// Quote asset every market is priced in
    pub weth_address: Address,
    /// Stablecoin whose pool against the quote asset gives USD per ETH
    pub usd_quote_address: Address,
    pub usd_quote_decimals: u8,
    pub usd_quote_fee: u32,
    /// Fee tiers probed for live pools
    pub fee_tiers: Vec<u32>,
    /// RPC timeout in seconds
    pub rpc_timeout_seconds: u64,
    /// Retry attempts for idempotent state reads; quotes are never retried
    pub rpc_retry_attempts: usize,
    /// Rate limit requests per second
    pub rate_limit_requests_per_second: u32,
    /// Adaptive error rate window size
    pub adaptive_error_rate_window: usize,
    /// Error rate above which the RPC quota shrinks
    pub adaptive_error_threshold: f64,
    /// Cache TTL in seconds
    pub cache_ttl_seconds: u64,
    /// Maximum cache entries
    pub max_cache_entries: u64,
    /// Attack-block scenarios searched at the same time
    pub max_concurrent_scenarios: usize,
    /// Report covers attack blocks `1..=report_max_attack_blocks`
    pub report_max_attack_blocks: u64,
    /// TWAP window used when a market has no configuration
    pub default_twap_window_blocks: u64,
    pub seconds_per_block: u64,
    /// Collateral factor used when a market has no configuration
    pub default_collateral_factor: Decimal,
    /// Optional JSON table of lending market parameters
    pub market_config_path: Option<String>,
    pub search: SearchConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            quoter_address: abi::QUOTER_V2,
            factory_address: abi::FACTORY,
            weth_address: abi::WETH,
            usd_quote_address: abi::USDC,
            usd_quote_decimals: 6,
            usd_quote_fee: 500,
            fee_tiers: vec![100, 500, 3000, 10000],
            rpc_timeout_seconds: 10,
            rpc_retry_attempts: 3,
            rate_limit_requests_per_second: 20,
            adaptive_error_rate_window: 100,
            adaptive_error_threshold: 0.2,
            cache_ttl_seconds: 300,
            max_cache_entries: 1000,
            max_concurrent_scenarios: 2,
            report_max_attack_blocks: 10,
            default_twap_window_blocks: 144,
            seconds_per_block: 12,
            default_collateral_factor: Decimal::new(88, 2),
            market_config_path: None,
            search: SearchConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Override fields from the environment.
    pub fn apply_env(mut self) -> Self {
        if let Ok(url) = std::env::var(RPC_URL_ENV) {
            if !url.trim().is_empty() {
                self.rpc_url = url;
            }
        }
        self
    }

    /// TWAP window in blocks for a window length in seconds, at least one.
    pub fn window_blocks(&self, twap_window_seconds: u64) -> u64 {
        (twap_window_seconds / self.seconds_per_block.max(1)).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SearchConfig::default();
        assert_eq!(config.samples_per_round(), 19);
        assert_eq!(config.ceiling(), Decimal::from(1_000_000_000_000_000u64));
        assert!(config.validate().is_ok());

        let engine = EngineConfig::default();
        assert_eq!(engine.max_concurrent_scenarios, 2);
        assert_eq!(engine.default_twap_window_blocks, 144);
    }

    #[test]
    fn test_validate_rejects_bad_knobs() {
        let mut config = SearchConfig::default();
        config.ranges = 2;
        assert!(config.validate().is_err());

        let mut config = SearchConfig::default();
        config.tolerance = Decimal::ZERO;
        assert!(config.validate().is_err());

        let mut config = SearchConfig::default();
        config.initial_high = Decimal::from(50);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "rpc_url": "http://node:8545", "search": { "ranges": 10 } }"#)
                .unwrap();
        assert_eq!(config.rpc_url, "http://node:8545");
        assert_eq!(config.search.ranges, 10);
        assert_eq!(config.search.tolerance, Decimal::new(1, 2));
        assert_eq!(config.fee_tiers, vec![100, 500, 3000, 10000]);
    }

    #[test]
    fn test_window_blocks() {
        let config = EngineConfig::default();
        assert_eq!(config.window_blocks(1800), 150);
        assert_eq!(config.window_blocks(5), 1);
    }
}
