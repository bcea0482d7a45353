//! Core types and data structures for trade-size searches.

use crate::oracle::MarketDataSource;
use crate::price;
use alloy_primitives::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An ERC-20 token as supplied by the token list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Contract address
    pub address: Address,
    /// Native decimal count
    pub decimals: u8,
    /// Ticker symbol
    pub symbol: String,
}

/// Pool selector: one token against the quote asset at one fee tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub token: Token,
    /// Fee tier in hundredths of a basis point (500 = 0.05%)
    pub fee: u32,
}

/// Trade direction measured on the token's price in the quote asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Buy the token, raising its price
    Pump,
    /// Sell the token, lowering its price
    Dump,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Pump => Direction::Dump,
            Direction::Dump => Direction::Pump,
        }
    }

    /// Translate between the token's price frame and the pool's sqrt-price
    /// frame. The mapping is its own inverse.
    pub fn pool_frame(self, inverted: bool) -> Self {
        if inverted {
            self.opposite()
        } else {
            self
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Pump => "pump",
            Direction::Dump => "dump",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One simulated trade at a fixed USD notional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// USD notional
    pub value: Decimal,
    pub direction: Direction,
    /// Post-trade token price in the quote asset, token units
    pub price: Decimal,
    /// Signed percentage change of the token price
    pub price_impact: Decimal,
    /// Post-trade pool sqrt price (Q64.96)
    pub sqrt_price_after: U256,
    pub amount_in: U256,
    pub amount_out: U256,
    pub token_out: Address,
    pub gas_estimate: U256,
}

impl Trade {
    /// Zero-impact trade for markets where quoting is meaningless.
    pub fn placeholder(value: Decimal, direction: Direction, token_out: Address) -> Self {
        Self {
            value,
            direction,
            price: Decimal::ZERO,
            price_impact: Decimal::ZERO,
            sqrt_price_after: U256::ZERO,
            amount_in: U256::ZERO,
            amount_out: U256::ZERO,
            token_out,
            gas_estimate: U256::ZERO,
        }
    }
}

/// What a search tries to hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SearchTarget {
    /// Absolute price impact in percent
    PriceImpact(Decimal),
    /// Token price in the quote asset, token units
    SpotPrice(Decimal),
    /// Pool sqrt price after the trade
    PostTradeFixedPrice(U256),
}

/// Outcome of one directional search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Smallest trade meeting the target, `None` when nothing was searched
    pub best: Option<Trade>,
    /// Samples ascending by notional, truncated for charting
    pub trades: Vec<Trade>,
}

impl SearchResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.best.is_none() && self.trades.is_empty()
    }
}

/// A value computed for both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpAndDump<T> {
    pub pump: T,
    pub dump: T,
}

impl<T> PumpAndDump<T> {
    /// Order two pool-frame results (price up, price down) into token-frame
    /// pump and dump slots.
    pub fn from_pool_legs(up: T, down: T, inverted: bool) -> Self {
        if inverted {
            Self { pump: down, dump: up }
        } else {
            Self { pump: up, dump: down }
        }
    }
}

/// Price snapshot every quote of a search is evaluated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub token: Token,
    pub fee: u32,
    /// Quote asset (WETH)
    pub quote_asset: Address,
    /// Token price in the quote asset, 18-decimal fixed point
    pub current_price: U256,
    /// Pool sqrt price (Q64.96)
    pub current_sqrt_price: U256,
    /// USD per unit of the quote asset
    pub usd_per_eth: Decimal,
}

impl MarketSnapshot {
    /// Build a snapshot from a pool sqrt price.
    pub fn from_sqrt_price(
        token: Token,
        fee: u32,
        quote_asset: Address,
        current_sqrt_price: U256,
        usd_per_eth: Decimal,
    ) -> Self {
        let current_price = if token.address == quote_asset {
            price::WAD
        } else {
            price::sqrt_price_to_price(
                current_sqrt_price,
                price::is_inverted(token.address, quote_asset),
            )
        };
        Self {
            token,
            fee,
            quote_asset,
            current_price,
            current_sqrt_price,
            usd_per_eth,
        }
    }

    /// Read `slot0` for the market and build a snapshot from it.
    pub async fn load(
        source: &dyn MarketDataSource,
        token: Token,
        fee: u32,
        quote_asset: Address,
        usd_per_eth: Decimal,
    ) -> anyhow::Result<Self> {
        let slot0 = source.slot0(&token, fee).await?;
        Ok(Self::from_sqrt_price(
            token,
            fee,
            quote_asset,
            slot0.sqrt_price,
            usd_per_eth,
        ))
    }

    /// Whether the pool quotes this token inverted (token is `token1`).
    pub fn inverted(&self) -> bool {
        price::is_inverted(self.token.address, self.quote_asset)
    }

    /// Current token price in token units.
    pub fn formatted_price(&self) -> Decimal {
        price::format_price(self.current_price, &self.token)
    }
}
