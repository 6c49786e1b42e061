//! Rebalance Module
//!
//! Executes the engine's transfer instruction against the pool service.

pub mod executor;

pub use executor::RebalanceExecutor;
