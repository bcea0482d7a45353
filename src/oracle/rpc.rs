//! JSON-RPC Uniswap V3 client: quotes through QuoterV2, pool state through
//! `slot0`, fee tiers through the factory.

use super::abi::{
    pool_address, IQuoterV2, IUniswapV3Factory, IUniswapV3Pool, QuoteExactInputSingleParams,
};
use super::rate_limit::{AdaptiveRateLimiter, RateLimitStats};
use super::{MarketDataSource, Quote, QuoteOracle, QuoteRequest, Slot0};
use crate::config::EngineConfig;
use crate::types::Token;
use alloy_primitives::aliases::{U160, U24};
use alloy_primitives::{hex, Address, Bytes, U256};
use alloy_sol_types::SolCall;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tokio_retry::{strategy::ExponentialBackoff, Retry};
use tracing::{debug, info, instrument};

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Uniswap V3 market access over plain Ethereum JSON-RPC.
///
/// Every `eth_call` goes to the pinned block when one is set, so all quotes
/// of a search see the same pool state.
pub struct UniswapV3Rpc {
    http: Client,
    config: EngineConfig,
    limiter: AdaptiveRateLimiter,
    /// Live fee tiers per token
    fee_cache: Cache<Address, Vec<u32>>,
    pinned_block: RwLock<Option<u64>>,
    next_id: AtomicU64,
}

impl UniswapV3Rpc {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.rpc_timeout_seconds))
            .build()
            .context("building HTTP client")?;

        let limiter = AdaptiveRateLimiter::new(
            config.rate_limit_requests_per_second,
            config.adaptive_error_rate_window,
            config.adaptive_error_threshold,
        );

        let fee_cache = Cache::builder()
            .max_capacity(config.max_cache_entries)
            .time_to_live(Duration::from_secs(config.cache_ttl_seconds))
            .build();

        Ok(Self {
            http,
            config,
            limiter,
            fee_cache,
            pinned_block: RwLock::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rate_limit_stats(&self) -> RateLimitStats {
        self.limiter.stats()
    }

    /// Pin all subsequent calls to the current head block.
    #[instrument(skip(self))]
    pub async fn pin_block(&self) -> Result<u64> {
        let block = self.with_retries(|| self.block_number()).await?;
        self.set_pinned_block(Some(block));
        info!(block, "pinned calls to block");
        Ok(block)
    }

    pub fn unpin_block(&self) {
        self.set_pinned_block(None);
    }

    pub fn pinned_block(&self) -> Option<u64> {
        match self.pinned_block.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_pinned_block(&self, block: Option<u64>) {
        match self.pinned_block.write() {
            Ok(mut guard) => *guard = block,
            Err(poisoned) => *poisoned.into_inner() = block,
        }
    }

    pub async fn block_number(&self) -> Result<u64> {
        let raw: String = self.request("eth_blockNumber", json!([])).await?;
        parse_quantity(&raw)
    }

    async fn eth_call(&self, to: Address, data: Vec<u8>) -> Result<Bytes> {
        let block = match self.pinned_block() {
            Some(number) => format!("{number:#x}"),
            None => "latest".to_string(),
        };
        let params = json!([{ "to": to, "data": hex::encode_prefixed(data) }, block]);
        self.request("eth_call", params).await
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        self.limiter.until_ready().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        let response = match self.send::<T>(&body).await {
            Ok(response) => {
                self.limiter.record_success();
                response
            }
            Err(e) => {
                self.limiter.record_failure();
                return Err(e.context(format!("{method} request failed")));
            }
        };

        if let Some(error) = response.error {
            return Err(anyhow!("{} (code {})", error.message, error.code));
        }
        response
            .result
            .ok_or_else(|| anyhow!("{method} returned neither result nor error"))
    }

    async fn send<T: DeserializeOwned>(&self, body: &Value) -> Result<RpcResponse<T>> {
        let response = self
            .http
            .post(&self.config.rpc_url)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<RpcResponse<T>>().await?)
    }

    /// Retry an idempotent state read with exponential backoff.
    async fn with_retries<T, F, Fut>(&self, action: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(5))
            .take(self.config.rpc_retry_attempts);
        Retry::spawn(strategy, action).await
    }

    async fn read_slot0(&self, pool: Address) -> Result<Slot0> {
        let raw = self
            .eth_call(pool, IUniswapV3Pool::slot0Call {}.abi_encode())
            .await?;
        let decoded = IUniswapV3Pool::slot0Call::abi_decode_returns(&raw[..], true)
            .with_context(|| format!("decoding slot0 of {pool}"))?;
        let tick = decoded
            .tick
            .to_string()
            .parse::<i32>()
            .context("slot0 tick out of range")?;
        Ok(Slot0 {
            sqrt_price: widen_u160(decoded.sqrtPriceX96),
            tick,
            observation_cardinality: decoded.observationCardinality,
        })
    }

    async fn read_pool(&self, token: Address, fee: u32) -> Result<Address> {
        let call = IUniswapV3Factory::getPoolCall {
            tokenA: token,
            tokenB: self.config.weth_address,
            fee: to_u24(fee)?,
        };
        let raw = self
            .eth_call(self.config.factory_address, call.abi_encode())
            .await?;
        let decoded = IUniswapV3Factory::getPoolCall::abi_decode_returns(&raw[..], true)
            .context("decoding getPool")?;
        Ok(decoded.pool)
    }
}

#[async_trait]
impl QuoteOracle for UniswapV3Rpc {
    #[instrument(skip(self, request), fields(token_in = %request.token_in, fee = request.fee, amount_in = %request.amount_in))]
    async fn quote(&self, request: QuoteRequest) -> Result<Quote> {
        let call = IQuoterV2::quoteExactInputSingleCall {
            params: QuoteExactInputSingleParams {
                tokenIn: request.token_in,
                tokenOut: request.token_out,
                amountIn: request.amount_in,
                fee: to_u24(request.fee)?,
                sqrtPriceLimitX96: U160::ZERO,
            },
        };
        let raw = self
            .eth_call(self.config.quoter_address, call.abi_encode())
            .await?;
        let decoded = IQuoterV2::quoteExactInputSingleCall::abi_decode_returns(&raw[..], true)
            .context("decoding quoteExactInputSingle")?;

        debug!(amount_out = %decoded.amountOut, "quote");
        Ok(Quote {
            amount_out: decoded.amountOut,
            sqrt_price_after: widen_u160(decoded.sqrtPriceX96After),
            gas_estimate: decoded.gasEstimate,
        })
    }
}

#[async_trait]
impl MarketDataSource for UniswapV3Rpc {
    #[instrument(skip(self, token), fields(token = %token.symbol))]
    async fn slot0(&self, token: &Token, fee: u32) -> Result<Slot0> {
        let pool = pool_address(
            self.config.factory_address,
            token.address,
            self.config.weth_address,
            fee,
        );
        self.with_retries(|| self.read_slot0(pool))
            .await
            .with_context(|| format!("reading slot0 for {} at fee {fee}", token.symbol))
    }

    #[instrument(skip(self, token), fields(token = %token.symbol))]
    async fn pool_fees(&self, token: &Token) -> Result<Vec<u32>> {
        if let Some(fees) = self.fee_cache.get(&token.address).await {
            return Ok(fees);
        }

        let mut fees = Vec::with_capacity(self.config.fee_tiers.len());
        for &fee in &self.config.fee_tiers {
            let pool = self
                .with_retries(|| self.read_pool(token.address, fee))
                .await?;
            if pool != Address::ZERO {
                fees.push(fee);
            }
        }

        debug!(?fees, "live fee tiers");
        self.fee_cache.insert(token.address, fees.clone()).await;
        Ok(fees)
    }
}

fn widen_u160(value: U160) -> U256 {
    U256::from_limbs_slice(value.as_limbs())
}

fn to_u24(fee: u32) -> Result<U24> {
    U24::try_from(fee).map_err(|_| anyhow!("fee tier {fee} does not fit in uint24"))
}

fn parse_quantity(raw: &str) -> Result<u64> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16).with_context(|| format!("invalid quantity {raw}"))
}
