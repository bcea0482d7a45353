//! Single-trade simulation against the quote oracle.

use crate::error::{Result, SearchError};
use crate::oracle::{QuoteOracle, QuoteRequest};
use crate::price;
use crate::types::{Direction, MarketSnapshot, PumpAndDump, Trade};
use alloy_primitives::U256;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, instrument};

/// USD notionals of the standard liquidity ladder: 100k..900k, then 1M..10M.
pub fn standard_notionals() -> Vec<Decimal> {
    let hundred_k = (1..10u64).map(|step| Decimal::from(step * 100_000));
    let million = (1..=10u64).map(|step| Decimal::from(step * 1_000_000));
    hundred_k.chain(million).collect()
}

/// Turns a USD notional into a quoted [`Trade`].
#[derive(Clone)]
pub struct TradeSimulator {
    oracle: Arc<dyn QuoteOracle>,
}

impl TradeSimulator {
    pub fn new(oracle: Arc<dyn QuoteOracle>) -> Self {
        Self { oracle }
    }

    /// Quote one trade of `value` USD in `direction` against `snapshot`.
    ///
    /// A pump spends the quote asset, a dump spends the token. Oracle
    /// failures are returned unchanged.
    #[instrument(level = "debug", skip(self, snapshot), fields(token = %snapshot.token.symbol))]
    pub async fn simulate(
        &self,
        snapshot: &MarketSnapshot,
        value: Decimal,
        direction: Direction,
    ) -> Result<Trade> {
        let token = snapshot.token.address;
        let quote_asset = snapshot.quote_asset;
        let (token_in, token_out) = match direction {
            Direction::Pump => (quote_asset, token),
            Direction::Dump => (token, quote_asset),
        };

        if token == quote_asset || snapshot.current_price.is_zero() {
            return Ok(Trade::placeholder(value, direction, token_out));
        }
        if value.is_sign_negative() {
            return Err(SearchError::InvalidInput(format!("negative notional {value}")));
        }
        if snapshot.usd_per_eth <= Decimal::ZERO {
            return Err(SearchError::InvalidInput(format!(
                "USD per ETH must be positive, got {}",
                snapshot.usd_per_eth
            )));
        }

        let eth_in = price::decimal_to_fixed(value / snapshot.usd_per_eth, 18)
            .ok_or_else(|| SearchError::InvalidInput(format!("notional {value} overflows")))?;
        let amount_in = match direction {
            Direction::Pump => eth_in,
            Direction::Dump => eth_in
                .checked_mul(price::WAD)
                .map(|scaled| scaled / snapshot.current_price)
                .ok_or_else(|| SearchError::InvalidInput(format!("notional {value} overflows")))?,
        };

        let quote = self
            .oracle
            .quote(QuoteRequest {
                token_in,
                token_out,
                fee: snapshot.fee,
                amount_in,
            })
            .await?;

        let after = price::sqrt_price_to_price(quote.sqrt_price_after, snapshot.inverted());
        let price_impact = price_impact_percent(snapshot.current_price, after);
        debug!(%value, %direction, %price_impact, "simulated trade");

        Ok(Trade {
            value,
            direction,
            price: price::format_price(after, &snapshot.token),
            price_impact,
            sqrt_price_after: quote.sqrt_price_after,
            amount_in,
            amount_out: quote.amount_out,
            token_out,
            gas_estimate: quote.gas_estimate,
        })
    }

    /// Both directions for one notional, quoted concurrently.
    pub async fn get_pump_and_dump(
        &self,
        snapshot: &MarketSnapshot,
        value: Decimal,
    ) -> Result<PumpAndDump<Trade>> {
        let (pump, dump) = tokio::try_join!(
            self.simulate(snapshot, value, Direction::Pump),
            self.simulate(snapshot, value, Direction::Dump),
        )?;
        Ok(PumpAndDump { pump, dump })
    }

    /// [`get_pump_and_dump`](Self::get_pump_and_dump) over the standard
    /// ladder, ascending by notional.
    #[instrument(skip(self, snapshot), fields(token = %snapshot.token.symbol))]
    pub async fn standard_trades(&self, snapshot: &MarketSnapshot) -> Result<Vec<PumpAndDump<Trade>>> {
        let snapshot = Arc::new(snapshot.clone());
        let notionals = standard_notionals();

        let mut set = JoinSet::new();
        for (index, value) in notionals.iter().copied().enumerate() {
            let simulator = self.clone();
            let snapshot = Arc::clone(&snapshot);
            set.spawn(async move { (index, simulator.get_pump_and_dump(&snapshot, value).await) });
        }

        let mut rows: Vec<Option<PumpAndDump<Trade>>> = vec![None; notionals.len()];
        while let Some(joined) = set.join_next().await {
            let (index, outcome) = match joined {
                Ok(joined) => joined,
                Err(e) => {
                    set.abort_all();
                    return Err(e.into());
                }
            };
            match outcome {
                Ok(row) => rows[index] = Some(row),
                Err(e) => {
                    set.abort_all();
                    return Err(e);
                }
            }
        }
        Ok(rows.into_iter().flatten().collect())
    }
}

/// `(after - before) / before * 100`, computed in 18-decimal fixed point.
fn price_impact_percent(before: U256, after: U256) -> Decimal {
    let hundred = U256::from(100u8);
    let (diff, negative) = if after >= before {
        (after - before, false)
    } else {
        (before - after, true)
    };
    let scaled = diff
        .checked_mul(price::WAD)
        .map(|scaled| scaled / before)
        .and_then(|ratio| ratio.checked_mul(hundred))
        .unwrap_or(U256::MAX);
    let magnitude = price::fixed_to_decimal(scaled, 18);
    if negative {
        -magnitude
    } else {
        magnitude
    }
}
