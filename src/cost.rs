//! USD cost of a manipulation trade.

use crate::price;
use crate::types::{MarketSnapshot, Trade};
use rust_decimal::Decimal;

/// Round-trip loss of `trade`: the USD notional paid in, minus the USD value
/// of what came out at pre-trade prices. Gas is not included.
pub fn cost_of_attack(trade: &Trade, snapshot: &MarketSnapshot) -> Decimal {
    let received_usd = if trade.token_out == snapshot.quote_asset {
        price::fixed_to_decimal(trade.amount_out, 18).checked_mul(snapshot.usd_per_eth)
    } else {
        let tokens = price::fixed_to_decimal(trade.amount_out, u32::from(snapshot.token.decimals));
        tokens
            .checked_mul(snapshot.formatted_price())
            .and_then(|eth| eth.checked_mul(snapshot.usd_per_eth))
    };
    trade
        .value
        .checked_sub(received_usd.unwrap_or(Decimal::MAX))
        .unwrap_or(Decimal::MIN)
}
