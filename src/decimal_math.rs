//! Natural log and exponential on `Decimal` at full 28-digit precision.
//!
//! `rust_decimal`'s own `exp` stops its series at a fixed tolerance and
//! cannot reduce large arguments, which is too coarse when a TWAP window
//! exponent amplifies any error by a factor in the hundreds. These wrappers
//! keep the crate's routines but reduce the argument first.

use rust_decimal::prelude::*;
use rust_decimal::MathematicalOps;

const NEWTON_STEPS: usize = 3;

/// ln(10)
pub fn ln_10() -> Decimal {
    Decimal::from_i128_with_scale(2_302_585_092_994_045_684_017_991_455, 27)
}

/// ln(2)
pub fn ln_2() -> Decimal {
    Decimal::from_i128_with_scale(6_931_471_805_599_453_094_172_321_215, 28)
}

/// Euler's number.
pub fn e() -> Decimal {
    Decimal::from_i128_with_scale(2_718_281_828_459_045_235_360_287_471, 27)
}

fn series_tolerance() -> Decimal {
    Decimal::new(1, 28)
}

/// e^x. `None` on overflow; arguments far below zero underflow to zero.
pub fn exp(x: Decimal) -> Option<Decimal> {
    let whole = x.floor();
    let frac = x - whole;
    let n = whole.to_i64()?;

    let frac_exp = frac.checked_exp_with_tolerance(series_tolerance())?;
    let whole_exp = if n >= 0 {
        e().checked_powi(n)?
    } else {
        match e().checked_powi(-n) {
            Some(denominator) => Decimal::ONE.checked_div(denominator)?,
            None => return Some(Decimal::ZERO),
        }
    };
    Some(whole_exp.checked_mul(frac_exp).unwrap_or(Decimal::ZERO))
}

/// ln(x) for x > 0.
pub fn ln(x: Decimal) -> Option<Decimal> {
    if x <= Decimal::ZERO {
        return None;
    }

    // x = m * 10^k with m in [1, 10)
    let mantissa = x.mantissa();
    let digits = decimal_digits(mantissa.unsigned_abs());
    let k = i64::from(digits) - 1 - i64::from(x.scale());
    let m = Decimal::from_i128_with_scale(mantissa, digits - 1);

    let mut y = m.checked_ln()?;
    for _ in 0..NEWTON_STEPS {
        let inv = exp(-y)?;
        y = y + m.checked_mul(inv)? - Decimal::ONE;
    }
    y.checked_add(ln_10().checked_mul(Decimal::from(k))?)
}

/// log10(x) for x > 0.
pub fn log10(x: Decimal) -> Option<Decimal> {
    ln(x)?.checked_div(ln_10())
}

fn decimal_digits(mut value: u128) -> u32 {
    let mut digits = 1;
    while value >= 10 {
        value /= 10;
        digits += 1;
    }
    digits
}
