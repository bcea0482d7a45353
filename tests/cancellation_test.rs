//! Cooperative cancellation of running searches.

mod common;

use common::{engine, snapshot, token, MockPool};
use rust_decimal::Decimal;
use std::sync::Arc;
use twap_guard::{CancellationToken, Direction, SearchError, SearchTarget};

#[tokio::test]
async fn test_cancellation_stops_at_round_boundary() {
    let cancel = CancellationToken::new();
    let pool = Arc::new(MockPool::new(&token()).cancel_after(1, cancel.clone()));
    let engine = engine(pool.clone());

    let err = engine
        .search(
            &snapshot(token()),
            &SearchTarget::PriceImpact(Decimal::from(90)),
            Direction::Pump,
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SearchError::Cancelled));
    assert!(err.is_silent());
    // the round in flight finishes, no further round starts
    assert_eq!(pool.calls(), 19);
}

#[tokio::test]
async fn test_cancelled_handle_never_quotes() {
    let pool = Arc::new(MockPool::new(&token()));
    let engine = engine(pool.clone());

    let handle = engine.spawn_search(
        snapshot(token()),
        SearchTarget::PriceImpact(Decimal::from(10)),
        Direction::Pump,
    );
    handle.cancel();
    assert!(handle.is_cancelled());

    let err = handle.join().await.unwrap_err();
    assert!(matches!(err, SearchError::Cancelled));
    assert_eq!(pool.calls(), 0);
}

#[tokio::test]
async fn test_spawned_binary_search_completes() {
    let pool = Arc::new(MockPool::new(&token()));
    let engine = engine(pool);

    let handle = engine.spawn_binary_search(snapshot(token()), SearchTarget::PriceImpact(Decimal::from(25)));
    assert!(!handle.is_cancelled());

    let result = handle.join().await.unwrap();
    assert!(result.pump.best.unwrap().price_impact >= Decimal::from(25));
    assert!(result.dump.best.unwrap().price_impact <= Decimal::from(-25));
}

#[tokio::test]
async fn test_cancelled_binary_search_reports_cancellation() {
    let pool = Arc::new(MockPool::new(&token()));
    let engine = engine(pool.clone());

    let handle = engine.spawn_binary_search(snapshot(token()), SearchTarget::PriceImpact(Decimal::from(25)));
    handle.cancel();

    assert!(matches!(handle.join().await, Err(SearchError::Cancelled)));
    assert_eq!(pool.calls(), 0);
}
