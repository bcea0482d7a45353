//! Fixed-point price model.
//!
//! Pools store `sqrt(price) * 2^96` (Q64.96) where price is `token1 / token0`
//! in base units. Everywhere else a price is the token's price in the quote
//! asset, base units, as an 18-decimal fixed-point integer. Pairs are ordered
//! by address, so when the token sorts above the quote asset the pool price
//! is the reciprocal of the token price; [`is_inverted`] is the only place
//! that decides this.

use crate::decimal_math;
use crate::error::{Result, SearchError};
use crate::types::Token;
use alloy_primitives::{Address, U256, U512};
use rust_decimal::prelude::*;

/// 1.0 in 18-decimal fixed point.
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Sqrt price at the lowest usable tick.
pub const MIN_SQRT_RATIO: U256 = U256::from_limbs([4_295_128_739, 0, 0, 0]);

/// Sqrt price at the highest usable tick.
pub const MAX_SQRT_RATIO: U256 = U256::from_limbs([
    6_743_328_256_752_651_558,
    17_280_870_778_742_802_505,
    4_294_805_859,
    0,
]);

pub const MAX_TICK: i32 = 887_272;

/// ln(1.0001^MAX_TICK): the natural log of the largest pool price. The
/// smallest is its negation.
pub fn ln_max_tick_price() -> Decimal {
    Decimal::from_i128_with_scale(8_872_276_393_573_515_330_772_946_734, 26)
}

/// Whether the pool price for `token` against `quote_asset` is the
/// reciprocal of the token price.
pub fn is_inverted(token: Address, quote_asset: Address) -> bool {
    token > quote_asset
}

/// Pool sqrt price to an 18-decimal price, optionally inverted.
///
/// Inverting a zero price saturates to `U256::MAX`.
pub fn sqrt_price_to_price(sqrt_price: U256, invert: bool) -> U256 {
    let wide = widen(sqrt_price);
    let price = narrow((wide * wide * widen(WAD)) >> 192);
    if !invert {
        price
    } else if price.is_zero() {
        U256::MAX
    } else {
        WAD * WAD / price
    }
}

/// 18-decimal price to a pool sqrt price, floored.
pub fn price_to_sqrt_price(price: U256, invert: bool) -> U256 {
    let pool_price = if !invert {
        price
    } else if price.is_zero() {
        U256::MAX
    } else {
        WAD * WAD / price
    };
    narrow(isqrt((widen(pool_price) << 192) / widen(WAD)))
}

/// Pool sqrt price from the natural log of a pool price.
///
/// Works in log space so prices far outside `Decimal`'s range still land
/// on an exact integer sqrt price.
pub fn sqrt_price_from_ln_price(ln_price: Decimal) -> Result<U256> {
    let bound = ln_max_tick_price();
    if ln_price > bound || ln_price < -bound {
        return Err(SearchError::PriceOutOfRange(format!(
            "ln price {} outside [-{bound}, {bound}]",
            ln_price.round_dp(6)
        )));
    }

    let ln_sqrt = ln_price / Decimal::TWO + Decimal::from(96) * decimal_math::ln_2();
    let sqrt_price = exp_to_u256(ln_sqrt)
        .ok_or_else(|| SearchError::PriceOutOfRange(ln_price.to_string()))?;
    Ok(sqrt_price.clamp(MIN_SQRT_RATIO, MAX_SQRT_RATIO))
}

/// `floor(e^x)` as an integer, exact in its leading 28 digits. `None` when
/// it does not fit in 256 bits.
pub fn exp_to_u256(x: Decimal) -> Option<U256> {
    let decades = (x / decimal_math::ln_10()).floor().to_i64()?;
    let shift = u32::try_from((decades - 27).max(0)).ok()?;
    if shift > 77 {
        return None;
    }
    let head = decimal_math::exp(x - decimal_math::ln_10() * Decimal::from(shift))?
        .trunc()
        .to_u128()?;
    U256::from(head).checked_mul(pow10(shift))
}

/// Natural log of the pool price behind a sqrt price.
pub fn ln_price_of_sqrt_price(sqrt_price: U256) -> Option<Decimal> {
    let ln_sqrt = ln_fixed(sqrt_price, 0)?;
    Some((ln_sqrt - Decimal::from(96) * decimal_math::ln_2()) * Decimal::TWO)
}

/// 18-decimal price to a decimal in token units.
pub fn format_price(price: U256, token: &Token) -> Decimal {
    let decimals = u32::from(token.decimals);
    let scaled = if decimals <= 18 {
        price / pow10(18 - decimals)
    } else {
        price.checked_mul(pow10(decimals - 18)).unwrap_or(U256::MAX)
    };
    fixed_to_decimal(scaled, 18)
}

/// Fixed-point integer with `decimals` places to a `Decimal`, saturating at
/// `Decimal::MAX`.
pub fn fixed_to_decimal(value: U256, decimals: u32) -> Decimal {
    let unit = pow10(decimals);
    let whole = value / unit;
    let frac = value % unit;

    let max_mantissa = Decimal::MAX.mantissa() as u128;
    let whole = match u128::try_from(whole) {
        Ok(whole) if whole <= max_mantissa => Decimal::from_i128_with_scale(whole as i128, 0),
        _ => return Decimal::MAX,
    };

    let (frac, scale) = if decimals > 28 {
        (frac / pow10(decimals - 28), 28)
    } else {
        (frac, decimals)
    };
    let frac = u128::try_from(frac)
        .map(|frac| Decimal::from_i128_with_scale(frac as i128, scale))
        .unwrap_or(Decimal::ZERO);

    whole.checked_add(frac).unwrap_or(Decimal::MAX)
}

/// `Decimal` to a fixed-point integer with `decimals` places, floored.
pub fn decimal_to_fixed(value: Decimal, decimals: u32) -> Option<U256> {
    if value.is_sign_negative() && !value.is_zero() {
        return None;
    }
    let mantissa = U256::from(value.mantissa().unsigned_abs());
    let scale = value.scale();
    if decimals >= scale {
        mantissa.checked_mul(pow10(decimals - scale))
    } else {
        Some(mantissa / pow10(scale - decimals))
    }
}

/// Natural log of a fixed-point integer with `decimals` places.
pub fn ln_fixed(value: U256, decimals: u32) -> Option<Decimal> {
    if value.is_zero() {
        return None;
    }
    let digits = value.to_string().len() as u32;
    let shift = digits.saturating_sub(28);
    let head = u128::try_from(value / pow10(shift)).ok()?;
    let ln_head = decimal_math::ln(Decimal::from_i128_with_scale(head as i128, 0))?;
    let exponent = i64::from(shift) - i64::from(decimals);
    Some(ln_head + decimal_math::ln_10() * Decimal::from(exponent))
}

/// Base-10 log of an integer.
pub fn log10_fixed(value: U256) -> Option<Decimal> {
    ln_fixed(value, 0)?.checked_div(decimal_math::ln_10())
}

pub fn pow10(exponent: u32) -> U256 {
    U256::from(10u64).pow(U256::from(exponent))
}

fn widen(value: U256) -> U512 {
    let l = value.as_limbs();
    U512::from_limbs([l[0], l[1], l[2], l[3], 0, 0, 0, 0])
}

fn narrow(value: U512) -> U256 {
    let l = value.as_limbs();
    if l[4..].iter().any(|limb| *limb != 0) {
        return U256::MAX;
    }
    U256::from_limbs([l[0], l[1], l[2], l[3]])
}

fn isqrt(n: U512) -> U512 {
    if n < U512::from(2u8) {
        return n;
    }
    let mut x = U512::from(1u8) << ((n.bit_len() + 1) / 2);
    loop {
        let y = (x + n / x) >> 1;
        if y >= x {
            return x;
        }
        x = y;
    }
}
