//! External collaborators
//!
//! The allocator never talks to a pool protocol or token contract directly.
//! It goes through these traits so production adapters and the in-memory
//! simulators used by tests and `pool-allocator simulate` are interchangeable.

pub mod custody;
pub mod pool_service;

pub use custody::{Custody, InMemoryCustody};
pub use pool_service::{InMemoryPoolService, PoolService};
