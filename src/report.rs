//! Attack-blocks liquidity report.
//!
//! For each number of manipulated blocks the report asks: what trade moves
//! the TWAP far enough to make a collateral position profitable to attack,
//! and what does holding it cost?

use crate::cost::cost_of_attack;
use crate::engine::{CancellationToken, SearchEngine};
use crate::error::{Result, SearchError};
use crate::price;
use crate::twap::{self, TwapWindow};
use crate::types::{Direction, MarketSnapshot, SearchTarget, Token, Trade};
use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument};

/// TWAP move at which borrowing against the manipulated collateral breaks
/// even: `1 / (collateral_factor * borrow_factor) - 1`.
pub fn break_even_twap_change(collateral_factor: Decimal, borrow_factor: Decimal) -> Result<Decimal> {
    let product = collateral_factor * borrow_factor;
    if product <= Decimal::ZERO {
        return Err(SearchError::InvalidInput(format!(
            "collateral factor {collateral_factor} and borrow factor {borrow_factor} must be positive"
        )));
    }
    Ok(Decimal::ONE / product - Decimal::ONE)
}

/// Result for one direction of one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LegOutcome {
    Found {
        trade: Trade,
        cost_per_block: Decimal,
        total_cost: Decimal,
    },
    /// Target TWAP is beyond what the pool's price range allows
    MaxTarget,
    /// Reaching the target needs more than the search ceiling
    MaxTrade,
    /// Target is already on the wrong side of the current price
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub attack_blocks: u64,
    /// Pump target TWAP in token units
    pub pump_target_twap: Decimal,
    /// Dump target TWAP in token units
    pub dump_target_twap: Decimal,
    pub pump: LegOutcome,
    pub dump: LegOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityReport {
    pub token: Token,
    pub fee: u32,
    pub generated_at: DateTime<Utc>,
    /// Token price in the quote asset, token units
    pub current_price: Decimal,
    pub usd_per_eth: Decimal,
    pub window_blocks: u64,
    pub collateral_factor: Decimal,
    pub borrow_factor: Decimal,
    pub break_even_twap_change: Decimal,
    /// Ascending by attack blocks
    pub rows: Vec<ReportRow>,
}

/// Runs the attack-blocks scenarios with a bounded number in flight.
#[derive(Clone)]
pub struct ReportRunner {
    engine: SearchEngine,
    max_concurrent_scenarios: usize,
    max_attack_blocks: u64,
}

impl ReportRunner {
    pub fn new(engine: SearchEngine, max_concurrent_scenarios: usize, max_attack_blocks: u64) -> Self {
        Self {
            engine,
            max_concurrent_scenarios: max_concurrent_scenarios.max(1),
            max_attack_blocks,
        }
    }

    #[instrument(skip(self, snapshot, cancel), fields(token = %snapshot.token.symbol))]
    pub async fn run(
        &self,
        snapshot: &MarketSnapshot,
        window_blocks: u64,
        collateral_factor: Decimal,
        borrow_factor: Decimal,
        cancel: &CancellationToken,
    ) -> Result<LiquidityReport> {
        let change = break_even_twap_change(collateral_factor, borrow_factor)?;
        let last_block = self.max_attack_blocks.min(window_blocks);
        if last_block == 0 {
            return Err(SearchError::InvalidInput("report needs at least one attack block".into()));
        }
        info!(%change, window_blocks, scenarios = last_block, "starting liquidity report");

        let snapshot = Arc::new(snapshot.clone());
        let permits = Arc::new(Semaphore::new(self.max_concurrent_scenarios));
        let mut set = JoinSet::new();

        for attack_blocks in 1..=last_block {
            let window = TwapWindow::new(window_blocks, attack_blocks)?;
            let runner = self.clone();
            let snapshot = Arc::clone(&snapshot);
            let permits = Arc::clone(&permits);
            let cancel = cancel.clone();
            set.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| SearchError::InvalidInput(e.to_string()))?;
                runner.scenario(&snapshot, window, change, &cancel).await
            });
        }

        let mut rows = Vec::with_capacity(last_block as usize);
        while let Some(joined) = set.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    set.abort_all();
                    return Err(e.into());
                }
            };
            match outcome {
                Ok(row) => {
                    info!(attack_blocks = row.attack_blocks, done = rows.len() + 1, "scenario finished");
                    rows.push(row);
                }
                Err(e) => {
                    set.abort_all();
                    return Err(e);
                }
            }
        }
        rows.sort_by_key(|row| row.attack_blocks);

        Ok(LiquidityReport {
            token: snapshot.token.clone(),
            fee: snapshot.fee,
            generated_at: Utc::now(),
            current_price: snapshot.formatted_price(),
            usd_per_eth: snapshot.usd_per_eth,
            window_blocks,
            collateral_factor,
            borrow_factor,
            break_even_twap_change: change,
            rows,
        })
    }

    #[instrument(skip(self, snapshot, cancel), fields(attack_blocks = window.attack_blocks))]
    async fn scenario(
        &self,
        snapshot: &MarketSnapshot,
        window: TwapWindow,
        change: Decimal,
        cancel: &CancellationToken,
    ) -> Result<ReportRow> {
        let pump_target = scale_price(snapshot.current_price, Decimal::ONE + change);
        let dump_target = scale_price(snapshot.current_price, Decimal::ONE - change);

        let (pump, dump) = tokio::try_join!(
            self.leg(snapshot, window, pump_target, Direction::Pump, cancel),
            self.leg(snapshot, window, dump_target, Direction::Dump, cancel),
        )?;

        let format = |target: Option<U256>| {
            target
                .map(|raw| price::format_price(raw, &snapshot.token))
                .unwrap_or(Decimal::ZERO)
        };
        Ok(ReportRow {
            attack_blocks: window.attack_blocks,
            pump_target_twap: format(pump_target),
            dump_target_twap: format(dump_target),
            pump,
            dump,
        })
    }

    async fn leg(
        &self,
        snapshot: &MarketSnapshot,
        window: TwapWindow,
        target_twap: Option<U256>,
        direction: Direction,
        cancel: &CancellationToken,
    ) -> Result<LegOutcome> {
        let Some(target_twap) = target_twap else {
            return Ok(LegOutcome::MaxTarget);
        };
        if !twap::is_achievable_twap(target_twap, snapshot.current_price, window)? {
            return Ok(LegOutcome::MaxTarget);
        }

        let sqrt_target = match twap::twap_target_ratio(
            target_twap,
            snapshot.current_price,
            window,
            snapshot.inverted(),
        ) {
            Ok(sqrt_target) => sqrt_target,
            Err(SearchError::PriceOutOfRange(_)) => return Ok(LegOutcome::MaxTarget),
            Err(e) => return Err(e),
        };

        let target = SearchTarget::PostTradeFixedPrice(sqrt_target);
        match self.engine.search(snapshot, &target, direction, cancel).await {
            Ok(result) => Ok(match result.best {
                Some(trade) => {
                    let cost_per_block = cost_of_attack(&trade, snapshot);
                    let total_cost = cost_per_block
                        .checked_mul(Decimal::from(window.attack_blocks))
                        .unwrap_or(Decimal::MAX);
                    LegOutcome::Found {
                        trade,
                        cost_per_block,
                        total_cost,
                    }
                }
                None => LegOutcome::Unreachable,
            }),
            Err(SearchError::MaxTradeValueExceeded { .. }) => Ok(LegOutcome::MaxTrade),
            Err(e) => Err(e),
        }
    }
}

/// `price * factor`, `None` when the factor is not positive.
fn scale_price(price: U256, factor: Decimal) -> Option<U256> {
    if factor <= Decimal::ZERO {
        return None;
    }
    let factor = price::decimal_to_fixed(factor, 18)?;
    price
        .checked_mul(factor)
        .map(|scaled| scaled / price::WAD)
        .filter(|scaled| !scaled.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_break_even_twap_change() {
        let change = break_even_twap_change(Decimal::new(8, 1), Decimal::new(125, 2)).unwrap();
        assert_eq!(change, Decimal::ZERO);

        let change = break_even_twap_change(Decimal::new(5, 1), Decimal::ONE).unwrap();
        assert_eq!(change, Decimal::ONE);

        assert!(break_even_twap_change(Decimal::ZERO, Decimal::ONE).is_err());
    }

    #[test]
    fn test_scale_price() {
        let price = price::WAD * U256::from(2000u64);
        assert_eq!(
            scale_price(price, Decimal::new(15, 1)),
            Some(price::WAD * U256::from(3000u64))
        );
        assert_eq!(scale_price(price, Decimal::ZERO), None);
        assert_eq!(scale_price(price, Decimal::new(-1, 1)), None);
    }

    #[test]
    fn test_leg_outcome_serialization() {
        let json = serde_json::to_value(LegOutcome::MaxTrade).unwrap();
        assert_eq!(json["outcome"], "max_trade");
    }
}
