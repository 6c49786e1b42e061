//! Pool filtering system
//!
//! Verified pools (fixed at construction) and the admin-extensible whitelist.

pub mod registry;

pub use registry::PoolRegistry;
