//! Cooperative cancellation for searches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One-shot cancellation flag shared between a search and its owner.
///
/// The owner calls [`cancel`](Self::cancel); the search polls
/// [`is_cancelled`](Self::is_cancelled) at each round boundary. Quotes
/// already in flight for the current round are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Independent tokens for the pump and dump legs of one request.
#[derive(Debug, Clone, Default)]
pub struct PairCancellation {
    pub pump: CancellationToken,
    pub dump: CancellationToken,
}

impl PairCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.pump.cancel();
        self.dump.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.pump.is_cancelled() && self.dump.is_cancelled()
    }
}
