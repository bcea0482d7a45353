//! twap-guard command line.
//!
//! ```text
//! twap-guard report <token> <decimals> <symbol> <fee> [borrow_factor]
//! twap-guard search <token> <decimals> <symbol> <fee> <impact|price> <value>
//! twap-guard search <token> <decimals> <symbol> <fee> twap <target> <attack_blocks>
//! twap-guard trades <token> <decimals> <symbol> <fee>
//! ```
//!
//! Configuration is read from the JSON file named by `TWAP_GUARD_CONFIG` when
//! set; `TWAP_GUARD_RPC_URL` overrides the endpoint. Results go to stdout as
//! JSON.

use alloy_primitives::Address;
use anyhow::{anyhow, bail, Context, Result};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn, Level};
use twap_guard::oracle::{self, BreakEvenFactors, MarketDataSource, StaticMarketConfigs, UniswapV3Rpc};
use twap_guard::twap::{self, TwapWindow};
use twap_guard::{
    EngineBuilder, EngineConfig, CancellationToken, MarketSnapshot, PairCancellation, SearchTarget, Token,
};

const CONFIG_ENV: &str = "TWAP_GUARD_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!("usage: twap-guard <report|search|trades> <token> <decimals> <symbol> <fee> ...");
    };

    let config = load_config()?;
    let rpc = Arc::new(UniswapV3Rpc::new(config.clone())?);
    rpc.pin_block().await?;

    let token = parse_token(&args)?;
    let fee: u32 = arg(&args, 4)?.parse().context("fee must be an integer")?;

    let fees = rpc.pool_fees(&token).await?;
    if !fees.contains(&fee) {
        bail!("no {} pool at fee {fee}, live tiers: {fees:?}", token.symbol);
    }

    let stablecoin = Token {
        address: config.usd_quote_address,
        decimals: config.usd_quote_decimals,
        symbol: "USD".to_string(),
    };
    let usd_per_eth =
        oracle::usd_per_eth(rpc.as_ref(), &stablecoin, config.usd_quote_fee, config.weth_address).await?;
    let snapshot =
        MarketSnapshot::load(rpc.as_ref(), token, fee, config.weth_address, usd_per_eth).await?;
    info!(
        token = %snapshot.token.symbol,
        price = %snapshot.formatted_price(),
        %usd_per_eth,
        "loaded market snapshot"
    );

    let output = match command.as_str() {
        "report" => {
            let borrow_override = args
                .get(5)
                .map(|raw| Decimal::from_str(raw).context("borrow factor must be a decimal"))
                .transpose()?;
            run_report(&config, rpc, &snapshot, borrow_override).await?
        }
        "search" => {
            let kind = arg(&args, 5)?;
            let value = Decimal::from_str(arg(&args, 6)?).context("target must be a decimal")?;
            let target = match kind {
                "impact" => SearchTarget::PriceImpact(value),
                "price" => SearchTarget::SpotPrice(value),
                "twap" => {
                    let attack_blocks: u64 =
                        arg(&args, 7)?.parse().context("attack blocks must be an integer")?;
                    let factors = market_factors(&config, &snapshot).await?;
                    let window_blocks = factors
                        .collateral
                        .map(|market| config.window_blocks(market.twap_window_seconds))
                        .unwrap_or(config.default_twap_window_blocks);
                    let window = TwapWindow::new(window_blocks, attack_blocks)?;
                    twap::twap_search_target(value, &snapshot, window)?
                }
                other => bail!("unknown target kind {other}, expected impact, price or twap"),
            };
            let engine = EngineBuilder::from_config(config.clone()).build(rpc)?;
            let result = engine
                .binary_search_trade_values(&snapshot, &target, &PairCancellation::new())
                .await?;
            serde_json::to_string_pretty(&result)?
        }
        "trades" => {
            let engine = EngineBuilder::from_config(config.clone()).build(rpc)?;
            let rows = engine.simulator().standard_trades(&snapshot).await?;
            serde_json::to_string_pretty(&rows)?
        }
        other => bail!("unknown command {other}"),
    };

    println!("{output}");
    Ok(())
}

async fn run_report(
    config: &EngineConfig,
    rpc: Arc<UniswapV3Rpc>,
    snapshot: &MarketSnapshot,
    borrow_override: Option<Decimal>,
) -> Result<String> {
    let factors = market_factors(config, snapshot).await?;

    let (window_blocks, collateral_factor) = match factors.collateral {
        Some(market) => (config.window_blocks(market.twap_window_seconds), market.collateral_factor),
        None => {
            warn!(
                token = %snapshot.token.symbol,
                "no market config, using default window and collateral factor"
            );
            (config.default_twap_window_blocks, config.default_collateral_factor)
        }
    };
    let borrow_factor = match borrow_override.or(factors.borrow_factor) {
        Some(factor) => factor,
        None => {
            warn!("no market config for the borrowed asset, using borrow factor 1");
            Decimal::ONE
        }
    };

    let runner = EngineBuilder::from_config(config.clone()).build_report(rpc)?;
    let report = runner
        .run(snapshot, window_blocks, collateral_factor, borrow_factor, &CancellationToken::new())
        .await?;
    Ok(serde_json::to_string_pretty(&report)?)
}

/// Collateral factors from the token's market, borrow factor from the
/// stablecoin market the position borrows from.
async fn market_factors(config: &EngineConfig, snapshot: &MarketSnapshot) -> Result<BreakEvenFactors> {
    let Some(path) = &config.market_config_path else {
        return Ok(BreakEvenFactors {
            collateral: None,
            borrow_factor: None,
        });
    };
    let markets = StaticMarketConfigs::from_file(path)?;
    oracle::break_even_factors(&markets, snapshot.token.address, config.usd_quote_address).await
}

fn load_config() -> Result<EngineConfig> {
    let config = match std::env::var(CONFIG_ENV) {
        Ok(path) => EngineConfig::from_file(path)?,
        Err(_) => EngineConfig::default(),
    };
    Ok(config.apply_env())
}

fn arg(args: &[String], index: usize) -> Result<&str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing argument {index}"))
}

fn parse_token(args: &[String]) -> Result<Token> {
    let address = Address::from_str(arg(args, 1)?).context("invalid token address")?;
    let decimals: u8 = arg(args, 2)?.parse().context("decimals must be 0-255")?;
    Ok(Token {
        address,
        decimals,
        symbol: arg(args, 3)?.to_string(),
    })
}
