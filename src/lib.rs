//! Two-Pool Yield Allocator Library
//!
//! Attributes deposited capital to two verified liquidity pools and moves
//! excess between them to track owner-set target weights.
//!
//! Layering, leaf-first:
//! - `allocation::policy`   target weights
//! - `filters::registry`    verified pools + whitelist
//! - `pool::ledger`         capital attributed per pool
//! - `allocation::engine`   ideal split and transfer instruction
//! - `rebalance::executor`  runs an instruction against the pool service
//! - `allocator`            the service owning all of the above

pub mod allocation;
pub mod allocator;
pub mod config;
pub mod error;
pub mod events;
pub mod filters;
pub mod pool;
pub mod rebalance;
pub mod services;
pub mod snapshot;
pub mod types;

// Re-export commonly used types
pub use allocation::{AllocationEngine, AllocationReport, WeightPolicy};
pub use allocator::{Allocator, AllocatorSettings};
pub use config::{load_config, AllocatorConfig};
pub use error::{AllocatorError, AllocatorResult};
pub use events::{AllocatorEvent, EventRecord};
pub use filters::PoolRegistry;
pub use pool::LiquidityLedger;
pub use rebalance::RebalanceExecutor;
pub use services::{Custody, InMemoryCustody, InMemoryPoolService, PoolService};
pub use snapshot::AllocatorSnapshot;
pub use types::{
    LedgerBalances, PoolSlot, StrandedRecord, StrandedResolution, TransferInstruction, Weights,
    WithdrawMode,
};
