//! Trade simulation and target search.

pub mod cancel;
pub mod search;
pub mod simulator;

pub use cancel::{CancellationToken, PairCancellation};
pub use search::{check_reachable, SearchEngine, SearchHandle};
pub use simulator::{standard_notionals, TradeSimulator};
