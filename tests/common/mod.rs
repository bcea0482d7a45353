//! In-process constant-liquidity pool shared by the integration tests.

#![allow(dead_code)]

use alloy_primitives::{Address, U256};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use twap_guard::oracle::{Quote, QuoteRequest};
use twap_guard::{CancellationToken, EngineBuilder, MarketSnapshot, QuoteOracle, SearchEngine, Token};

pub const LIQUIDITY: f64 = 1e21;
pub const USD_PER_ETH: i64 = 2000;
/// Token price in ETH for both test tokens.
pub const TOKEN_PRICE_ETH: f64 = 2000.0;

/// 2^96
const Q96: f64 = 79_228_162_514_264_337_593_543_950_336.0;

pub fn weth() -> Address {
    Address::repeat_byte(0xc0)
}

/// Sorts below WETH, so the pool quotes it directly.
pub fn token() -> Token {
    Token {
        address: Address::repeat_byte(0x11),
        decimals: 18,
        symbol: "TKN".to_string(),
    }
}

/// Sorts above WETH, so the pool quotes it inverted.
pub fn inverted_token() -> Token {
    Token {
        address: Address::repeat_byte(0xee),
        decimals: 18,
        symbol: "INV".to_string(),
    }
}

/// Pool sqrt price (not Q96 scaled) for `token` at [`TOKEN_PRICE_ETH`].
pub fn pool_sqrt_price(token: &Token) -> f64 {
    if token.address < weth() {
        TOKEN_PRICE_ETH.sqrt()
    } else {
        (1.0 / TOKEN_PRICE_ETH).sqrt()
    }
}

fn to_q96(sqrt_price: f64) -> U256 {
    U256::from((sqrt_price * Q96) as u128)
}

pub fn snapshot(token: Token) -> MarketSnapshot {
    let sqrt_price = to_q96(pool_sqrt_price(&token));
    MarketSnapshot::from_sqrt_price(token, 3000, weth(), sqrt_price, Decimal::from(USD_PER_ETH))
}

/// Uniswap V3 pool with a single liquidity range covering every price.
///
/// Quotes are stateless: each one starts from the same sqrt price.
pub struct MockPool {
    sqrt_price: f64,
    liquidity: f64,
    calls: AtomicUsize,
    cancel_after: Option<(usize, CancellationToken)>,
    fail_after: Option<usize>,
}

impl MockPool {
    pub fn new(token: &Token) -> Self {
        Self {
            sqrt_price: pool_sqrt_price(token),
            liquidity: LIQUIDITY,
            calls: AtomicUsize::new(0),
            cancel_after: None,
            fail_after: None,
        }
    }

    /// Cancel `token` once `calls` quotes have been served.
    pub fn cancel_after(mut self, calls: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    /// Fail every quote after the first `calls`.
    pub fn fail_after(mut self, calls: usize) -> Self {
        self.fail_after = Some(calls);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteOracle for MockPool {
    async fn quote(&self, request: QuoteRequest) -> Result<Quote> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if call >= *after {
                token.cancel();
            }
        }
        if matches!(self.fail_after, Some(after) if call > after) {
            return Err(anyhow!("insufficient liquidity"));
        }

        let amount: f64 = request.amount_in.to_string().parse()?;
        let (l, s) = (self.liquidity, self.sqrt_price);
        let (sqrt_after, amount_out) = if request.token_in < request.token_out {
            // token0 in, price falls
            let after = l * s / (l + amount * s);
            (after, l * (s - after))
        } else {
            let after = s + amount / l;
            (after, l * (1.0 / s - 1.0 / after))
        };
        if !sqrt_after.is_finite() || sqrt_after <= 0.0 {
            return Err(anyhow!("price limit reached"));
        }

        Ok(Quote {
            amount_out: U256::from(amount_out as u128),
            sqrt_price_after: to_q96(sqrt_after),
            gas_estimate: U256::from(120_000u64),
        })
    }
}

pub fn engine(pool: Arc<MockPool>) -> SearchEngine {
    EngineBuilder::new().build(pool).expect("default search config is valid")
}

pub fn decimal(value: f64) -> Decimal {
    Decimal::try_from(value).expect("finite")
}

pub fn to_f64(value: Decimal) -> f64 {
    value.to_string().parse().expect("decimal renders as a number")
}
