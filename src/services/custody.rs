//! Custody
//!
//! Holder of the underlying asset. The allocator pulls deposits from callers
//! into its own account and pushes refunds back out.

use alloy::primitives::{Address, U256};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

#[async_trait]
pub trait Custody: Send + Sync {
    /// Move `amount` from `owner` to `recipient`
    async fn transfer_from(&self, owner: Address, recipient: Address, amount: U256) -> Result<()>;

    async fn balance_of(&self, owner: Address) -> Result<U256>;
}

/// In-memory asset ledger for tests and simulation
#[derive(Debug, Default)]
pub struct InMemoryCustody {
    balances: DashMap<Address, U256>,
    /// Next transfer out of this owner fails with this reason
    fail_transfer: DashMap<Address, String>,
    /// Next balance lookup for this owner fails with this reason
    fail_balance: DashMap<Address, String>,
}

impl InMemoryCustody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `owner` some underlying to deposit
    pub fn mint(&self, owner: Address, amount: U256) {
        let mut balance = self.balances.entry(owner).or_insert(U256::ZERO);
        *balance = balance.saturating_add(amount);
    }

    pub fn balance(&self, owner: &Address) -> U256 {
        self.balances.get(owner).map(|b| *b).unwrap_or(U256::ZERO)
    }

    pub fn fail_next_transfer_from(&self, owner: Address, reason: &str) {
        self.fail_transfer.insert(owner, reason.to_string());
    }

    pub fn fail_next_balance_of(&self, owner: Address, reason: &str) {
        self.fail_balance.insert(owner, reason.to_string());
    }
}

#[async_trait]
impl Custody for InMemoryCustody {
    async fn transfer_from(&self, owner: Address, recipient: Address, amount: U256) -> Result<()> {
        if let Some((_, reason)) = self.fail_transfer.remove(&owner) {
            warn!("Simulated custody: transfer from {} failed ({})", owner, reason);
            bail!(reason);
        }

        {
            let mut from = self.balances.entry(owner).or_insert(U256::ZERO);
            if *from < amount {
                bail!("{} holds {}, cannot transfer {}", owner, *from, amount);
            }
            *from -= amount;
        }
        // `from` guard dropped before touching the recipient entry
        let mut to = self.balances.entry(recipient).or_insert(U256::ZERO);
        *to = to
            .checked_add(amount)
            .ok_or_else(|| anyhow!("{} balance overflow", recipient))?;

        debug!("Simulated custody: {} -> {} ({})", owner, recipient, amount);
        Ok(())
    }

    async fn balance_of(&self, owner: Address) -> Result<U256> {
        if let Some((_, reason)) = self.fail_balance.remove(&owner) {
            warn!("Simulated custody: balance lookup for {} failed ({})", owner, reason);
            bail!(reason);
        }
        Ok(self.balance(&owner))
    }
}
