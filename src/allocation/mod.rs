//! Allocation Module
//!
//! Target weight policy and the engine that turns ledger balances plus
//! weights into a transfer instruction.

pub mod engine;
pub mod policy;

pub use engine::{AllocationEngine, AllocationReport};
pub use policy::WeightPolicy;
