//! Attack-blocks liquidity report over a constant-liquidity pool.

mod common;

use common::{snapshot, token, MockPool};
use rust_decimal::Decimal;
use std::sync::Arc;
use twap_guard::{CancellationToken, EngineBuilder, LegOutcome, ReportRunner, SearchError, Trade};

fn runner(pool: Arc<MockPool>, max_attack_blocks: u64) -> ReportRunner {
    EngineBuilder::new()
        .with_max_concurrent_scenarios(2)
        .with_report_max_attack_blocks(max_attack_blocks)
        .build_report(pool)
        .unwrap()
}

fn found(outcome: &LegOutcome) -> (&Trade, Decimal, Decimal) {
    match outcome {
        LegOutcome::Found {
            trade,
            cost_per_block,
            total_cost,
        } => (trade, *cost_per_block, *total_cost),
        other => panic!("expected a trade, got {other:?}"),
    }
}

#[tokio::test]
async fn test_report_finds_trades_per_attack_block() {
    let pool = Arc::new(MockPool::new(&token()));
    let report = runner(pool, 3)
        .run(
            &snapshot(token()),
            144,
            Decimal::new(88, 2),
            Decimal::ONE,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.window_blocks, 144);
    assert_eq!(report.rows.len(), 3);
    let change = report.break_even_twap_change;
    assert!(change > Decimal::new(136, 3) && change < Decimal::new(137, 3), "{change}");

    let mut previous: Option<(Decimal, Decimal)> = None;
    for (index, row) in report.rows.iter().enumerate() {
        let blocks = index as u64 + 1;
        assert_eq!(row.attack_blocks, blocks);
        assert!(row.pump_target_twap > Decimal::from(2272) && row.pump_target_twap < Decimal::from(2273));
        assert!(row.dump_target_twap > Decimal::from(1727) && row.dump_target_twap < Decimal::from(1728));

        let (pump, pump_cost, pump_total) = found(&row.pump);
        let (dump, dump_cost, dump_total) = found(&row.dump);
        assert!(pump_cost > Decimal::ZERO);
        assert!(dump_cost > Decimal::ZERO);
        assert_eq!(pump_total, pump_cost * Decimal::from(blocks));
        assert_eq!(dump_total, dump_cost * Decimal::from(blocks));

        // holding the price for longer needs a smaller move
        if let Some((pump_value, dump_value)) = previous {
            assert!(pump.value < pump_value);
            assert!(dump.value < dump_value);
        }
        previous = Some((pump.value, dump.value));
    }
}

#[tokio::test]
async fn test_unachievable_targets_skip_the_oracle() {
    let pool = Arc::new(MockPool::new(&token()));
    // break-even change of 300%: the dump target is negative and the pump
    // target is beyond what two blocks can move a 144-block TWAP
    let report = runner(pool.clone(), 2)
        .run(
            &snapshot(token()),
            144,
            Decimal::new(5, 1),
            Decimal::new(5, 1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.rows.len(), 2);
    for row in &report.rows {
        assert_eq!(row.pump, LegOutcome::MaxTarget);
        assert_eq!(row.dump, LegOutcome::MaxTarget);
        assert_eq!(row.dump_target_twap, Decimal::ZERO);
    }
    assert_eq!(pool.calls(), 0);
}

#[tokio::test]
async fn test_report_rows_stop_at_window() {
    let pool = Arc::new(MockPool::new(&token()));
    let report = runner(pool, 10)
        .run(
            &snapshot(token()),
            2,
            Decimal::new(5, 1),
            Decimal::new(5, 1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let blocks: Vec<u64> = report.rows.iter().map(|row| row.attack_blocks).collect();
    assert_eq!(blocks, vec![1, 2]);
}

#[tokio::test]
async fn test_cancelled_report_returns_cancelled() {
    let pool = Arc::new(MockPool::new(&token()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = runner(pool, 3)
        .run(&snapshot(token()), 144, Decimal::new(88, 2), Decimal::ONE, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, SearchError::Cancelled));
}

#[tokio::test]
async fn test_report_serializes_outcomes() {
    let pool = Arc::new(MockPool::new(&token()));
    let report = runner(pool, 1)
        .run(
            &snapshot(token()),
            144,
            Decimal::new(88, 2),
            Decimal::ONE,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["rows"][0]["pump"]["outcome"], "found");
    assert_eq!(json["token"]["symbol"], "TKN");
}
