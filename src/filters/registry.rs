//! Pool Registry
//!
//! Two verified pools, set once, that capital can be attributed to, plus an
//! append-only whitelist the owner can extend. Whitelist entries are unique.
//!
//! Batch whitelisting is fail-fast: entries before the first duplicate stay
//! registered and the remainder of the batch is not processed.

use alloy::primitives::Address;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::error::{AllocatorError, AllocatorResult};
use crate::types::{PoolSlot, VerifiedPools};

#[derive(Debug, Clone)]
pub struct PoolRegistry {
    verified: VerifiedPools,
    /// Whitelisted pools in insertion order
    whitelisted: Vec<Address>,
    /// Lookup set mirroring `whitelisted`
    whitelisted_set: HashSet<Address>,
}

impl PoolRegistry {
    pub fn new(verified: VerifiedPools) -> Self {
        info!(
            "Registry: verified pools A={} B={}",
            verified.a, verified.b
        );
        Self {
            verified,
            whitelisted: Vec::new(),
            whitelisted_set: HashSet::new(),
        }
    }

    /// Build with an initial whitelist, using the same duplicate rule as
    /// `whitelist_pools`.
    pub fn with_whitelist(verified: VerifiedPools, pools: &[Address]) -> AllocatorResult<Self> {
        let mut registry = Self::new(verified);
        registry.whitelist_pools(pools)?;
        Ok(registry)
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Append `pool` unless already whitelisted.
    pub fn add_if_absent(&mut self, pool: Address) -> AllocatorResult<()> {
        if !self.whitelisted_set.insert(pool) {
            warn!("Registry: {} rejected - already whitelisted", pool);
            return Err(AllocatorError::DuplicatePool(pool));
        }
        self.whitelisted.push(pool);
        info!("Registry: whitelisted {} ({} total)", pool, self.whitelisted.len());
        Ok(())
    }

    /// Whitelist each pool in order, stopping at the first duplicate.
    /// Returns how many were added.
    pub fn whitelist_pools(&mut self, pools: &[Address]) -> AllocatorResult<usize> {
        for pool in pools {
            self.add_if_absent(*pool)?;
        }
        Ok(pools.len())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn verified(&self) -> VerifiedPools {
        self.verified
    }

    pub fn whitelisted(&self) -> &[Address] {
        &self.whitelisted
    }

    pub fn is_whitelisted(&self, pool: &Address) -> bool {
        self.whitelisted_set.contains(pool)
    }

    /// Slot of a verified pool, `UnverifiedPool` otherwise
    pub fn slot_of(&self, pool: &Address) -> AllocatorResult<PoolSlot> {
        self.verified.slot_of(pool).ok_or_else(|| {
            debug!("Registry: {} is not a verified pool", pool);
            AllocatorError::UnverifiedPool(*pool)
        })
    }
}
