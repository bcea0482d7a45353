//! twap-guard - AMM oracle-manipulation cost estimator
//!
//! Estimates how large a trade must be to push a Uniswap V3 pool's spot price,
//! or its TWAP over a window of blocks, to a target, and what that trade costs.

pub mod config;
pub mod cost;
pub mod decimal_math;
pub mod engine;
pub mod error;
pub mod oracle;
pub mod price;
pub mod report;
pub mod twap;
pub mod types;

// Re-export main types for convenience
pub use config::{EngineConfig, SearchConfig};
pub use cost::cost_of_attack;
pub use engine::{CancellationToken, PairCancellation, SearchEngine, SearchHandle, TradeSimulator};
pub use error::SearchError;
pub use oracle::{MarketDataSource, QuoteOracle};
pub use report::{LegOutcome, LiquidityReport, ReportRunner};
pub use twap::{TwapBounds, TwapWindow};
pub use types::{Direction, MarketSnapshot, PumpAndDump, SearchResult, SearchTarget, Token, Trade};

use std::sync::Arc;

/// Engine builder for convenient construction with sensible defaults.
pub struct EngineBuilder {
    config: EngineConfig,
}

impl EngineBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    /// Start from an existing configuration.
    pub fn from_config(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Set the RPC endpoint.
    pub fn with_rpc_url(mut self, url: impl Into<String>) -> Self {
        self.config.rpc_url = url.into();
        self
    }

    /// Set the search knobs.
    pub fn with_search(mut self, search: SearchConfig) -> Self {
        self.config.search = search;
        self
    }

    /// Set the convergence tolerance.
    pub fn with_tolerance(mut self, tolerance: rust_decimal::Decimal) -> Self {
        self.config.search.tolerance = tolerance;
        self
    }

    /// Set rate limiting.
    pub fn with_rate_limit(mut self, requests_per_second: u32) -> Self {
        self.config.rate_limit_requests_per_second = requests_per_second;
        self
    }

    /// Set the number of report scenarios searched at once.
    pub fn with_max_concurrent_scenarios(mut self, scenarios: usize) -> Self {
        self.config.max_concurrent_scenarios = scenarios;
        self
    }

    /// Set the largest attack-block count in the report.
    pub fn with_report_max_attack_blocks(mut self, blocks: u64) -> Self {
        self.config.report_max_attack_blocks = blocks;
        self
    }

    /// Set cache TTL in seconds.
    pub fn with_cache_ttl(mut self, ttl_seconds: u64) -> Self {
        self.config.cache_ttl_seconds = ttl_seconds;
        self
    }

    /// Build the configuration.
    pub fn build_config(self) -> EngineConfig {
        self.config
    }

    /// Build a search engine over `oracle`.
    pub fn build(self, oracle: Arc<dyn QuoteOracle>) -> Result<SearchEngine, SearchError> {
        self.config.search.validate()?;
        Ok(SearchEngine::new(TradeSimulator::new(oracle), self.config.search))
    }

    /// Build the report runner over `oracle`.
    pub fn build_report(self, oracle: Arc<dyn QuoteOracle>) -> Result<ReportRunner, SearchError> {
        let scenarios = self.config.max_concurrent_scenarios;
        let blocks = self.config.report_max_attack_blocks;
        Ok(ReportRunner::new(self.build(oracle)?, scenarios, blocks))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_engine_builder() {
        let config = EngineBuilder::new()
            .with_rpc_url("http://node:8545")
            .with_tolerance(Decimal::new(5, 3))
            .with_rate_limit(50)
            .with_max_concurrent_scenarios(3)
            .build_config();

        assert_eq!(config.rpc_url, "http://node:8545");
        assert_eq!(config.search.tolerance, Decimal::new(5, 3));
        assert_eq!(config.rate_limit_requests_per_second, 50);
        assert_eq!(config.max_concurrent_scenarios, 3);
    }

    #[test]
    fn test_engine_builder_defaults() {
        let config = EngineBuilder::new().build_config();

        assert_eq!(config.cache_ttl_seconds, 300);
        assert_eq!(config.rate_limit_requests_per_second, 20);
        assert_eq!(config.search.ranges, 20);
        assert_eq!(config.report_max_attack_blocks, 10);
    }
}
