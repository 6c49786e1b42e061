//! Pool accounting module
//!
//! Tracks the underlying capital attributed to each verified pool.

pub mod ledger;

pub use ledger::LiquidityLedger;
