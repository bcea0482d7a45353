//! TWAP target derivation.
//!
//! A geometric TWAP over `W` blocks where the last `K` sit at a manipulated
//! spot `S` and the rest at the pre-attack price `P` satisfies
//! `T^W = S^K * P^(W-K)`. Everything here works on natural logs of prices:
//!
//! ```text
//! ln S = ln P + (W / K) * (ln T - ln P)
//! ln T = ln P + (K / W) * (ln S - ln P)
//! ```
//!
//! The achievable range reaches the pool's tick bounds (about e^±88.7),
//! far outside what a `Decimal` or an 18-decimal `U256` can carry, so
//! values only leave log space at the very end.

use crate::error::{Result, SearchError};
use crate::price;
use crate::types::{MarketSnapshot, SearchTarget, Token};
use alloy_primitives::U256;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

/// Sqrt-price units added to a derived target to absorb floor rounding.
pub const SQRT_PRICE_EPSILON: u64 = 2;

/// TWAP window and the trailing blocks an attacker controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwapWindow {
    pub window: u64,
    pub attack_blocks: u64,
}

impl TwapWindow {
    pub fn new(window: u64, attack_blocks: u64) -> Result<Self> {
        if attack_blocks == 0 || attack_blocks > window {
            return Err(SearchError::InvalidInput(format!(
                "attack blocks must be in 1..={window}, got {attack_blocks}"
            )));
        }
        Ok(Self {
            window,
            attack_blocks,
        })
    }

    /// `W / K`
    fn amplification(&self) -> Decimal {
        Decimal::from(self.window) / Decimal::from(self.attack_blocks)
    }

    /// `K / W`
    fn dilution(&self) -> Decimal {
        Decimal::from(self.attack_blocks) / Decimal::from(self.window)
    }

    /// ln of the spot price that drags the TWAP to `ln_target`.
    pub fn ln_required_spot(&self, ln_target: Decimal, ln_current: Decimal) -> Result<Decimal> {
        (ln_target - ln_current)
            .checked_mul(self.amplification())
            .and_then(|shift| ln_current.checked_add(shift))
            .ok_or_else(|| SearchError::PriceOutOfRange("required spot price overflows".into()))
    }

    /// ln of the TWAP after holding `ln_spot` for the attack blocks.
    pub fn ln_twap_after_attack(&self, ln_spot: Decimal, ln_current: Decimal) -> Decimal {
        ln_current + (ln_spot - ln_current) * self.dilution()
    }
}

fn ln_price(price: U256) -> Result<Decimal> {
    price::ln_fixed(price, 18)
        .ok_or_else(|| SearchError::InvalidInput("prices must be positive".into()))
}

/// Spot price (18-decimal, token frame) the attacker must hold for the
/// TWAP to reach `target_twap`.
pub fn required_spot_price(target_twap: U256, current_price: U256, window: TwapWindow) -> Result<U256> {
    let ln_spot = window.ln_required_spot(ln_price(target_twap)?, ln_price(current_price)?)?;
    ln_to_fixed(ln_spot)
}

/// Post-trade sqrt price an attacker must reach for the TWAP to hit
/// `target_twap`, rounded up by [`SQRT_PRICE_EPSILON`].
///
/// Prices are 18-decimal in the token's frame; `inverted` maps the result
/// into the pool's frame.
pub fn twap_target_ratio(
    target_twap: U256,
    current_price: U256,
    window: TwapWindow,
    inverted: bool,
) -> Result<U256> {
    let ln_spot = window.ln_required_spot(ln_price(target_twap)?, ln_price(current_price)?)?;
    let ln_pool_price = if inverted { -ln_spot } else { ln_spot };
    let sqrt_price = price::sqrt_price_from_ln_price(ln_pool_price)?;
    Ok(with_epsilon(sqrt_price))
}

fn with_epsilon(sqrt_price: U256) -> U256 {
    sqrt_price
        .saturating_add(U256::from(SQRT_PRICE_EPSILON))
        .min(price::MAX_SQRT_RATIO)
}

/// Search target for a TWAP given in token units: range-checked against
/// the achievable bounds, then turned into the post-trade sqrt price.
pub fn twap_search_target(target_twap: Decimal, snapshot: &MarketSnapshot, window: TwapWindow) -> Result<SearchTarget> {
    let bounds = min_max_target_twap_spot(snapshot.current_price, window, &snapshot.token)?;
    check_twap_target(target_twap, &bounds)?;
    let scaled = scaled_twap_target(target_twap, &snapshot.token)?;
    let sqrt_price = twap_target_ratio(scaled, snapshot.current_price, window, snapshot.inverted())?;
    Ok(SearchTarget::PostTradeFixedPrice(sqrt_price))
}

/// TWAP (18-decimal, token frame) after holding `spot` for the attack
/// blocks.
pub fn twap_after_attack(spot: U256, current_price: U256, window: TwapWindow) -> Result<U256> {
    let ln_twap = window.ln_twap_after_attack(ln_price(spot)?, ln_price(current_price)?);
    ln_to_fixed(ln_twap)
}

fn ln_to_fixed(ln_value: Decimal) -> Result<U256> {
    let shifted = ln_value + crate::decimal_math::ln_10() * Decimal::from(18);
    price::exp_to_u256(shifted)
        .ok_or_else(|| SearchError::PriceOutOfRange(format!("e^{} does not fit", ln_value.round_dp(4))))
}

/// Achievable TWAP range for a window, from holding the pool at its lowest
/// or highest tick for the attack blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwapBounds {
    /// Lowest reachable TWAP in token units
    pub min_target_twap_spot: Decimal,
    /// Highest reachable TWAP in token units
    pub max_target_twap_spot: Decimal,
    /// Change from the current price, percent
    pub min_target_twap_spot_percentage: Decimal,
    pub max_target_twap_spot_percentage: Decimal,
}

/// [`TwapBounds`] for a token at `current_price`; values that do not fit a
/// `Decimal` saturate.
pub fn min_max_target_twap_spot(current_price: U256, window: TwapWindow, token: &Token) -> Result<TwapBounds> {
    let ln_current = ln_price(current_price)?;
    let ln_bound = price::ln_max_tick_price();
    let ln_min = window.ln_twap_after_attack(-ln_bound, ln_current);
    let ln_max = window.ln_twap_after_attack(ln_bound, ln_current);

    // raw price to token units
    let unit_shift = crate::decimal_math::ln_10() * Decimal::from(18 - i64::from(token.decimals));
    let percentage = |ln_twap: Decimal| {
        saturating_exp(ln_twap - ln_current)
            .checked_mul(Decimal::ONE_HUNDRED)
            .map(|scaled| scaled - Decimal::ONE_HUNDRED)
            .unwrap_or(Decimal::MAX)
    };

    Ok(TwapBounds {
        min_target_twap_spot: saturating_exp(ln_min - unit_shift),
        max_target_twap_spot: saturating_exp(ln_max - unit_shift),
        min_target_twap_spot_percentage: percentage(ln_min),
        max_target_twap_spot_percentage: percentage(ln_max),
    })
}

fn saturating_exp(x: Decimal) -> Decimal {
    crate::decimal_math::exp(x).unwrap_or(Decimal::MAX)
}

/// Reject a TWAP target (token units) outside the achievable range before
/// any quote is spent on it.
pub fn check_twap_target(target_twap: Decimal, bounds: &TwapBounds) -> Result<()> {
    if target_twap < bounds.min_target_twap_spot || target_twap > bounds.max_target_twap_spot {
        return Err(SearchError::PriceOutOfRange(format!(
            "TWAP target {target_twap} outside achievable range [{}, {}]",
            bounds.min_target_twap_spot, bounds.max_target_twap_spot
        )));
    }
    Ok(())
}

/// Whether `target_twap` (18-decimal, token frame) lies inside the range a
/// pool can be pushed to within the window.
pub fn is_achievable_twap(target_twap: U256, current_price: U256, window: TwapWindow) -> Result<bool> {
    let ln_target = ln_price(target_twap)?;
    let ln_current = ln_price(current_price)?;
    let ln_bound = price::ln_max_tick_price();
    let ln_min = window.ln_twap_after_attack(-ln_bound, ln_current);
    let ln_max = window.ln_twap_after_attack(ln_bound, ln_current);
    Ok(ln_target >= ln_min && ln_target <= ln_max)
}

/// TWAP target in token units to the 18-decimal internal price.
pub fn scaled_twap_target(target_twap: Decimal, token: &Token) -> Result<U256> {
    price::decimal_to_fixed(target_twap, 36 - u32::from(token.decimals).min(36))
        .filter(|value| !value.is_zero())
        .ok_or_else(|| SearchError::InvalidInput(format!("TWAP target {target_twap} must be positive")))
}
