//! Failure taxonomy for searches and price-target derivation.

use crate::types::Direction;
use rust_decimal::Decimal;
use thiserror::Error;

/// Everything that can stop a search or a TWAP target derivation.
///
/// `Cancelled` and `UnreachableTarget` are expected outcomes rather than
/// failures; see [`SearchError::is_silent`].
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("search cancelled")]
    Cancelled,

    #[error("Max trade value exceeded ({ceiling} USD)")]
    MaxTradeValueExceeded { ceiling: Decimal },

    #[error("target is already on the wrong side of the current price for a {0}")]
    UnreachableTarget(Direction),

    #[error("price out of representable range: {0}")]
    PriceOutOfRange(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Quote oracle or market data failure, passed through unchanged.
    #[error(transparent)]
    Oracle(#[from] anyhow::Error),

    #[error("search task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SearchError {
    /// True for outcomes the caller should discard instead of reporting.
    pub fn is_silent(&self) -> bool {
        matches!(self, SearchError::Cancelled | SearchError::UnreachableTarget(_))
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
