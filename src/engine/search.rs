//! Adaptive bracketing search for the trade size that hits a target.
//!
//! Each round samples the interior of the current notional bracket, keeps
//! the sample closest to the target in log space and narrows the bracket
//! around it. A saturated first round widens the bracket once; a second
//! saturation at the widened bracket is reported as
//! [`SearchError::MaxTradeValueExceeded`].

use super::cancel::{CancellationToken, PairCancellation};
use super::simulator::TradeSimulator;
use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::price;
use crate::types::{Direction, MarketSnapshot, PumpAndDump, SearchResult, SearchTarget, Trade};
use alloy_primitives::U256;
use rust_decimal::prelude::*;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};

/// Value a sample is judged by, in the target's units.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Metric {
    Decimal(Decimal),
    Fixed(U256),
}

impl Metric {
    fn of(trade: &Trade, target: &SearchTarget) -> Self {
        match target {
            SearchTarget::PriceImpact(_) => Metric::Decimal(trade.price_impact.abs()),
            SearchTarget::SpotPrice(_) => Metric::Decimal(trade.price),
            SearchTarget::PostTradeFixedPrice(_) => Metric::Fixed(trade.sqrt_price_after),
        }
    }

    fn log10(&self) -> Option<Decimal> {
        match self {
            Metric::Decimal(value) if *value > Decimal::ZERO => crate::decimal_math::log10(*value),
            Metric::Decimal(_) => None,
            Metric::Fixed(value) => price::log10_fixed(*value),
        }
    }
}

impl SearchTarget {
    fn metric(&self) -> Metric {
        match self {
            SearchTarget::PriceImpact(value) | SearchTarget::SpotPrice(value) => Metric::Decimal(*value),
            SearchTarget::PostTradeFixedPrice(value) => Metric::Fixed(*value),
        }
    }
}

/// Whether `trade` has reached `target` when moving in `direction`.
fn has_crossed(trade: &Trade, target: &SearchTarget, direction: Direction, inverted: bool) -> bool {
    match target {
        SearchTarget::PriceImpact(goal) => trade.price_impact.abs() >= *goal,
        SearchTarget::SpotPrice(goal) => match direction {
            Direction::Pump => trade.price >= *goal,
            Direction::Dump => trade.price <= *goal,
        },
        SearchTarget::PostTradeFixedPrice(goal) => match direction.pool_frame(inverted) {
            Direction::Pump => trade.sqrt_price_after >= *goal,
            Direction::Dump => trade.sqrt_price_after <= *goal,
        },
    }
}

/// Reject targets that cannot be reached by trading in `direction`.
///
/// Fails with [`SearchError::UnreachableTarget`] when the target already
/// sits on the wrong side of the current state, and with
/// [`SearchError::InvalidInput`] for non-positive targets.
pub fn check_reachable(snapshot: &MarketSnapshot, target: &SearchTarget, direction: Direction) -> Result<()> {
    let unreachable = match target {
        SearchTarget::PriceImpact(goal) => {
            if *goal <= Decimal::ZERO {
                return Err(SearchError::InvalidInput(format!("price impact target {goal} must be positive")));
            }
            // a price cannot fall by 100% or more
            direction == Direction::Dump && *goal >= Decimal::ONE_HUNDRED
        }
        SearchTarget::SpotPrice(goal) => {
            if *goal <= Decimal::ZERO {
                return Err(SearchError::InvalidInput(format!("price target {goal} must be positive")));
            }
            let current = snapshot.formatted_price();
            match direction {
                Direction::Pump => *goal <= current,
                Direction::Dump => *goal >= current,
            }
        }
        SearchTarget::PostTradeFixedPrice(goal) => {
            if goal.is_zero() {
                return Err(SearchError::InvalidInput("sqrt price target must be positive".into()));
            }
            match direction.pool_frame(snapshot.inverted()) {
                Direction::Pump => *goal <= snapshot.current_sqrt_price,
                Direction::Dump => *goal >= snapshot.current_sqrt_price,
            }
        }
    };

    if unreachable {
        Err(SearchError::UnreachableTarget(direction))
    } else {
        Ok(())
    }
}

/// Index of the sample closest to the target in log10 space; the earliest
/// wins ties.
fn closest_sample(samples: &[Trade], target: &SearchTarget) -> usize {
    let goal = target.metric().log10();
    let distance = |trade: &Trade| -> Option<Decimal> {
        let goal = goal?;
        Some((Metric::of(trade, target).log10()? - goal).abs())
    };

    let mut best_index = 0;
    let mut best_distance = samples.first().and_then(distance);
    for (index, trade) in samples.iter().enumerate().skip(1) {
        if let Some(candidate) = distance(trade) {
            let closer = match best_distance {
                Some(current) => candidate < current,
                None => true,
            };
            if closer {
                best_index = index;
                best_distance = Some(candidate);
            }
        }
    }
    best_index
}

/// Finds trade sizes that hit price targets.
#[derive(Clone)]
pub struct SearchEngine {
    simulator: TradeSimulator,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(simulator: TradeSimulator, config: SearchConfig) -> Self {
        Self { simulator, config }
    }

    pub fn simulator(&self) -> &TradeSimulator {
        &self.simulator
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Smallest notional whose `direction` trade reaches `target`.
    ///
    /// `direction` is in the token's frame: a pump buys the token. An
    /// unreachable target yields an empty result without touching the
    /// oracle.
    #[instrument(skip(self, snapshot, cancel), fields(token = %snapshot.token.symbol, %direction))]
    pub async fn search(
        &self,
        snapshot: &MarketSnapshot,
        target: &SearchTarget,
        direction: Direction,
        cancel: &CancellationToken,
    ) -> Result<SearchResult> {
        self.config.validate()?;
        match check_reachable(snapshot, target, direction) {
            Ok(()) => {}
            Err(SearchError::UnreachableTarget(_)) => {
                debug!(?target, "target unreachable, skipping search");
                return Ok(SearchResult::empty());
            }
            Err(e) => return Err(e),
        }

        let snapshot = Arc::new(snapshot.clone());
        let inverted = snapshot.inverted();
        let ranges = Decimal::from(self.config.ranges as u64);
        let last = self.config.samples_per_round() - 1;

        let mut low = Decimal::ZERO;
        let mut high = self.config.initial_high;
        let mut round = 0usize;
        let mut closest: Option<Trade> = None;
        let mut all_trades: Vec<Trade> = Vec::new();

        while high - low > high * self.config.tolerance && high >= self.config.min_bracket {
            if round >= self.config.max_rounds {
                warn!(round, %low, %high, "round limit reached, keeping closest sample");
                break;
            }
            if cancel.is_cancelled() {
                debug!(round, "search cancelled");
                return Err(SearchError::Cancelled);
            }

            let step = (high - low) / ranges;
            let ticks: Vec<Decimal> = (1..=last + 1)
                .map(|i| low + step * Decimal::from(i as u64))
                .collect();

            let samples = self.sample(&snapshot, direction, &ticks).await?;
            let best_index = closest_sample(&samples, target);
            let best_metric = Metric::of(&samples[best_index], target);

            if round == 0 && best_index == last {
                high = high
                    .checked_mul(self.config.expansion_factor)
                    .unwrap_or(Decimal::MAX);
                low = ticks[last - 1];
                debug!(%high, "target beyond initial bracket, widening");
            } else if round == 1 && best_index == last && high > self.config.initial_high {
                return Err(SearchError::MaxTradeValueExceeded {
                    ceiling: self.config.ceiling(),
                });
            } else if best_index == 0 {
                high = ticks[1];
            } else {
                // skip a flat run of samples left of the best one
                for j in 0..best_index {
                    if Metric::of(&samples[j], target) != best_metric {
                        low = ticks[j];
                    }
                }
                high = ticks.get(best_index + 1).copied().unwrap_or(high);
            }

            closest = Some(samples[best_index].clone());
            all_trades.extend(samples);
            round += 1;
        }

        all_trades.sort_by(|a, b| a.value.cmp(&b.value));

        let best = all_trades
            .iter()
            .find(|trade| has_crossed(trade, target, direction, inverted))
            .cloned()
            .or(closest);

        let trades = match &best {
            Some(best) => {
                let bound = self
                    .config
                    .chart_floor
                    .max(best.value * self.config.chart_headroom);
                all_trades.into_iter().filter(|t| t.value < bound).collect()
            }
            None => all_trades,
        };

        if let Some(best) = &best {
            info!(
                rounds = round,
                value = %best.value,
                price_impact = %best.price_impact,
                "search converged"
            );
        }
        Ok(SearchResult { best, trades })
    }

    /// Quote every tick concurrently; the first failure aborts the rest.
    async fn sample(
        &self,
        snapshot: &Arc<MarketSnapshot>,
        direction: Direction,
        ticks: &[Decimal],
    ) -> Result<Vec<Trade>> {
        let mut set = JoinSet::new();
        for (index, value) in ticks.iter().copied().enumerate() {
            let simulator = self.simulator.clone();
            let snapshot = Arc::clone(snapshot);
            set.spawn(async move { (index, simulator.simulate(&snapshot, value, direction).await) });
        }

        let mut samples: Vec<Option<Trade>> = vec![None; ticks.len()];
        while let Some(joined) = set.join_next().await {
            let (index, outcome) = match joined {
                Ok(joined) => joined,
                Err(e) => {
                    set.abort_all();
                    return Err(e.into());
                }
            };
            match outcome {
                Ok(trade) => samples[index] = Some(trade),
                Err(e) => {
                    set.abort_all();
                    return Err(e);
                }
            }
        }

        samples
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| SearchError::InvalidInput("sample set incomplete".into()))
    }

    /// Pump and dump searches for one target, run concurrently.
    ///
    /// The legs are driven in the pool's price frame (price up, price down)
    /// and handed back in the token's frame.
    #[instrument(skip(self, snapshot, cancel), fields(token = %snapshot.token.symbol))]
    pub async fn binary_search_trade_values(
        &self,
        snapshot: &MarketSnapshot,
        target: &SearchTarget,
        cancel: &PairCancellation,
    ) -> Result<PumpAndDump<SearchResult>> {
        let inverted = snapshot.inverted();
        let up = Direction::Pump.pool_frame(inverted);
        let down = Direction::Dump.pool_frame(inverted);
        let (up_cancel, down_cancel) = if inverted {
            (&cancel.dump, &cancel.pump)
        } else {
            (&cancel.pump, &cancel.dump)
        };

        let (up_result, down_result) = tokio::try_join!(
            self.search(snapshot, target, up, up_cancel),
            self.search(snapshot, target, down, down_cancel),
        )?;
        Ok(PumpAndDump::from_pool_legs(up_result, down_result, inverted))
    }

    /// Run [`search`](Self::search) on its own task.
    pub fn spawn_search(
        &self,
        snapshot: MarketSnapshot,
        target: SearchTarget,
        direction: Direction,
    ) -> SearchHandle<SearchResult> {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let engine = self.clone();
        let task = tokio::spawn(async move { engine.search(&snapshot, &target, direction, &token).await });
        SearchHandle {
            task,
            cancel: vec![cancel],
        }
    }

    /// Run [`binary_search_trade_values`](Self::binary_search_trade_values)
    /// on its own task.
    pub fn spawn_binary_search(
        &self,
        snapshot: MarketSnapshot,
        target: SearchTarget,
    ) -> SearchHandle<PumpAndDump<SearchResult>> {
        let pair = PairCancellation::new();
        let tokens = pair.clone();
        let engine = self.clone();
        let task = tokio::spawn(async move {
            engine
                .binary_search_trade_values(&snapshot, &target, &tokens)
                .await
        });
        SearchHandle {
            task,
            cancel: vec![pair.pump, pair.dump],
        }
    }
}

/// A running search owned by its caller.
///
/// Starting a new search for the same result slot should cancel the previous
/// handle first.
pub struct SearchHandle<T> {
    task: JoinHandle<Result<T>>,
    cancel: Vec<CancellationToken>,
}

impl<T> SearchHandle<T> {
    pub fn cancel(&self) {
        for token in &self.cancel {
            token.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.iter().all(CancellationToken::is_cancelled)
    }

    pub async fn join(self) -> Result<T> {
        self.task.await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Token;
    use alloy_primitives::Address;

    fn trade(value: i64, price_impact: Decimal) -> Trade {
        let mut trade = Trade::placeholder(Decimal::from(value), Direction::Pump, Address::ZERO);
        trade.price_impact = price_impact;
        trade.price = price_impact;
        trade
    }

    fn snapshot(token: Address) -> MarketSnapshot {
        let token = Token {
            address: token,
            decimals: 18,
            symbol: "TKN".to_string(),
        };
        let sqrt = price::price_to_sqrt_price(price::WAD * U256::from(2000u64), false);
        MarketSnapshot::from_sqrt_price(token, 3000, Address::repeat_byte(0xc0), sqrt, Decimal::from(2000))
    }

    #[test]
    fn test_closest_sample_uses_log_distance() {
        let target = SearchTarget::PriceImpact(Decimal::from(10));
        // 5 is log-closer to 10 than 21 is
        let samples = vec![trade(1, Decimal::ONE), trade(2, Decimal::from(5)), trade(3, Decimal::from(21))];
        assert_eq!(closest_sample(&samples, &target), 1);
    }

    #[test]
    fn test_closest_sample_prefers_first_on_ties_and_skips_zero() {
        let target = SearchTarget::PriceImpact(Decimal::from(10));
        let samples = vec![
            trade(1, Decimal::ZERO),
            trade(2, Decimal::from(20)),
            trade(3, Decimal::from(20)),
        ];
        assert_eq!(closest_sample(&samples, &target), 1);

        let flat = vec![trade(1, Decimal::ZERO), trade(2, Decimal::ZERO)];
        assert_eq!(closest_sample(&flat, &target), 0);
    }

    #[test]
    fn test_crossing_rules() {
        let target = SearchTarget::PriceImpact(Decimal::from(10));
        assert!(has_crossed(&trade(1, Decimal::from(-12)), &target, Direction::Dump, false));
        assert!(!has_crossed(&trade(1, Decimal::from(9)), &target, Direction::Pump, false));

        let price = SearchTarget::SpotPrice(Decimal::from(10));
        assert!(has_crossed(&trade(1, Decimal::from(11)), &price, Direction::Pump, false));
        assert!(has_crossed(&trade(1, Decimal::from(9)), &price, Direction::Dump, false));
        assert!(!has_crossed(&trade(1, Decimal::from(9)), &price, Direction::Pump, false));

        let mut moved = trade(1, Decimal::ONE);
        moved.sqrt_price_after = U256::from(50u8);
        let sqrt = SearchTarget::PostTradeFixedPrice(U256::from(60u8));
        assert!(!has_crossed(&moved, &sqrt, Direction::Pump, false));
        // an inverted pump pushes the pool price down
        assert!(has_crossed(&moved, &sqrt, Direction::Pump, true));
    }

    #[test]
    fn test_check_reachable() {
        let straight = snapshot(Address::repeat_byte(0x11));
        let below = SearchTarget::SpotPrice(Decimal::from(1500));
        assert!(matches!(
            check_reachable(&straight, &below, Direction::Pump),
            Err(SearchError::UnreachableTarget(Direction::Pump))
        ));
        assert!(check_reachable(&straight, &below, Direction::Dump).is_ok());

        let full_crash = SearchTarget::PriceImpact(Decimal::ONE_HUNDRED);
        assert!(check_reachable(&straight, &full_crash, Direction::Dump).is_err());
        assert!(check_reachable(&straight, &full_crash, Direction::Pump).is_ok());

        assert!(matches!(
            check_reachable(&straight, &SearchTarget::PriceImpact(Decimal::ZERO), Direction::Pump),
            Err(SearchError::InvalidInput(_))
        ));

        let higher_sqrt = SearchTarget::PostTradeFixedPrice(straight.current_sqrt_price * U256::from(2u8));
        assert!(check_reachable(&straight, &higher_sqrt, Direction::Pump).is_ok());
        assert!(check_reachable(&straight, &higher_sqrt, Direction::Dump).is_err());

        let inverted = snapshot(Address::repeat_byte(0xee));
        let higher_sqrt = SearchTarget::PostTradeFixedPrice(inverted.current_sqrt_price * U256::from(2u8));
        assert!(check_reachable(&inverted, &higher_sqrt, Direction::Dump).is_ok());
        assert!(check_reachable(&inverted, &higher_sqrt, Direction::Pump).is_err());
    }
}
