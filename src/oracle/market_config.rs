//! Lending market parameters loaded from a JSON table.

use super::{MarketConfig, MarketConfigSource};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;

/// Market parameters keyed by collateral token address.
///
/// File format: `{ "0xToken...": { "borrow_factor": "0.9", "collateral_factor": "0.8", "twap_window_seconds": 1800 } }`
#[derive(Debug, Clone, Default)]
pub struct StaticMarketConfigs {
    markets: HashMap<Address, MarketConfig>,
}

impl StaticMarketConfigs {
    pub fn new(markets: HashMap<Address, MarketConfig>) -> Self {
        Self { markets }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading market configs from {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let markets: HashMap<Address, MarketConfig> = serde_json::from_str(raw)?;
        Ok(Self { markets })
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}

#[async_trait]
impl MarketConfigSource for StaticMarketConfigs {
    async fn market_config(&self, token: Address) -> Result<Option<MarketConfig>> {
        Ok(self.markets.get(&token).cloned())
    }
}

/// Factors behind a report's break-even TWAP move.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakEvenFactors {
    /// Market of the collateral token; supplies the collateral factor and
    /// TWAP window
    pub collateral: Option<MarketConfig>,
    /// Borrow factor of the borrowed asset's market
    pub borrow_factor: Option<Decimal>,
}

/// Collateral side from `collateral_token`'s market, borrow side from
/// `borrowed_asset`'s market.
pub async fn break_even_factors(
    source: &dyn MarketConfigSource,
    collateral_token: Address,
    borrowed_asset: Address,
) -> Result<BreakEvenFactors> {
    let collateral = source.market_config(collateral_token).await?;
    let borrow_factor = source
        .market_config(borrowed_asset)
        .await?
        .map(|market| market.borrow_factor);
    Ok(BreakEvenFactors {
        collateral,
        borrow_factor,
    })
}
