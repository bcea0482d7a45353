//! Collaborator boundary: quotes, pool state and market configuration.
//!
//! The search engine only ever sees the traits defined here. [`UniswapV3Rpc`]
//! is the JSON-RPC implementation used by the binary; tests substitute an
//! in-process pool.

pub mod abi;
pub mod market_config;
pub mod rate_limit;
pub mod rpc;

use crate::price;
use crate::types::Token;
use alloy_primitives::{Address, U256};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use abi::compute_pool_address;
pub use market_config::{break_even_factors, BreakEvenFactors, StaticMarketConfigs};
pub use rate_limit::{AdaptiveRateLimiter, RateLimitStats};
pub use rpc::UniswapV3Rpc;

/// Exact-input single-pool quote request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub token_in: Address,
    pub token_out: Address,
    pub fee: u32,
    pub amount_in: U256,
}

/// Quoted outcome of a swap, evaluated against the current pool state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub amount_out: U256,
    /// Pool sqrt price after the swap (Q64.96)
    pub sqrt_price_after: U256,
    pub gas_estimate: U256,
}

/// Pool state header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot0 {
    pub sqrt_price: U256,
    pub tick: i32,
    pub observation_cardinality: u16,
}

/// Lending market parameters for one collateral token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConfig {
    pub borrow_factor: Decimal,
    pub collateral_factor: Decimal,
    pub twap_window_seconds: u64,
}

/// Source of swap quotes.
///
/// Implementations must return the same answer for the same request while
/// the underlying pool state is unchanged; a search issues many quotes
/// against one snapshot. Errors are passed to the caller untouched.
#[async_trait]
pub trait QuoteOracle: Send + Sync {
    async fn quote(&self, request: QuoteRequest) -> Result<Quote>;
}

/// Source of pool state.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn slot0(&self, token: &Token, fee: u32) -> Result<Slot0>;

    /// Fee tiers with a live pool against the quote asset.
    async fn pool_fees(&self, token: &Token) -> Result<Vec<u32>>;
}

/// Source of lending market parameters.
#[async_trait]
pub trait MarketConfigSource: Send + Sync {
    async fn market_config(&self, token: Address) -> Result<Option<MarketConfig>>;
}

/// USD per unit of the quote asset, read from a stablecoin pool.
pub async fn usd_per_eth(
    source: &dyn MarketDataSource,
    stablecoin: &Token,
    fee: u32,
    quote_asset: Address,
) -> Result<Decimal> {
    let slot0 = source.slot0(stablecoin, fee).await?;
    let inverted = price::is_inverted(stablecoin.address, quote_asset);
    let stable_in_eth = price::format_price(
        price::sqrt_price_to_price(slot0.sqrt_price, inverted),
        stablecoin,
    );
    if stable_in_eth.is_zero() {
        return Err(anyhow!("{} pool reports a zero price", stablecoin.symbol));
    }
    Ok(Decimal::ONE / stable_in_eth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    struct FixedPool(U256);

    #[async_trait]
    impl MarketDataSource for FixedPool {
        async fn slot0(&self, _token: &Token, _fee: u32) -> Result<Slot0> {
            Ok(Slot0 {
                sqrt_price: self.0,
                tick: 0,
                observation_cardinality: 1,
            })
        }

        async fn pool_fees(&self, _token: &Token) -> Result<Vec<u32>> {
            Ok(vec![500])
        }
    }

    #[tokio::test]
    async fn test_usd_per_eth_from_stablecoin_pool() {
        let weth = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
        let usdc = Token {
            address: address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
            decimals: 6,
            symbol: "USDC".to_string(),
        };
        // USDC is token0: pool price is 5e8 wei per base unit at 2000 USD/ETH
        let sqrt_price = price::price_to_sqrt_price(price::WAD * U256::from(500_000_000u64), false);
        let usd = usd_per_eth(&FixedPool(sqrt_price), &usdc, 500, weth).await.unwrap();
        assert!((usd - Decimal::from(2000)).abs() < Decimal::new(1, 6), "{usd}");
    }

    #[tokio::test]
    async fn test_usd_per_eth_rejects_empty_pool() {
        let usdc = Token {
            address: Address::repeat_byte(0x01),
            decimals: 6,
            symbol: "USDC".to_string(),
        };
        let err = usd_per_eth(&FixedPool(U256::ZERO), &usdc, 500, Address::repeat_byte(0xc0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("zero price"));
    }
}
