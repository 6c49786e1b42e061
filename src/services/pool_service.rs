//! Pool Service
//!
//! Deposit/withdraw interface of a yield-bearing liquidity pool. Pool tokens
//! are valued 1:1 against the underlying asset.

use alloy::primitives::{Address, U256};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

#[async_trait]
pub trait PoolService: Send + Sync {
    /// Deposit underlying into `pool`, returning pool tokens minted
    async fn deposit(&self, pool: Address, amount: U256) -> Result<U256>;

    /// Balanced withdrawal of `amount`, returning underlying received
    async fn withdraw(&self, pool: Address, amount: U256) -> Result<U256>;

    /// Burn `token_amount` pool tokens for the single reference asset
    async fn withdraw_one_asset(&self, pool: Address, token_amount: U256) -> Result<U256>;
}

/// In-memory pool simulator with one-shot failure injection
#[derive(Debug, Default)]
pub struct InMemoryPoolService {
    /// Underlying held per pool
    balances: DashMap<Address, U256>,
    /// Next deposit into the pool fails with this reason
    fail_deposit: DashMap<Address, String>,
    /// Next withdrawal from the pool fails with this reason
    fail_withdraw: DashMap<Address, String>,
    /// Next withdrawal from the pool returns this much less than requested
    short_withdraw: DashMap<Address, U256>,
    /// Next withdrawal from the pool pays out this much extra
    bonus_withdraw: DashMap<Address, U256>,
}

impl InMemoryPoolService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of_pool(&self, pool: &Address) -> U256 {
        self.balances.get(pool).map(|b| *b).unwrap_or(U256::ZERO)
    }

    pub fn fail_next_deposit(&self, pool: Address, reason: &str) {
        self.fail_deposit.insert(pool, reason.to_string());
    }

    pub fn fail_next_withdraw(&self, pool: Address, reason: &str) {
        self.fail_withdraw.insert(pool, reason.to_string());
    }

    pub fn short_next_withdraw(&self, pool: Address, shortfall: U256) {
        self.short_withdraw.insert(pool, shortfall);
    }

    pub fn bonus_next_withdraw(&self, pool: Address, extra: U256) {
        self.bonus_withdraw.insert(pool, extra);
    }

    fn take_withdraw(&self, pool: Address, amount: U256) -> Result<U256> {
        if let Some((_, reason)) = self.fail_withdraw.remove(&pool) {
            warn!("Simulated pool {}: withdraw failed ({})", pool, reason);
            bail!(reason);
        }

        let mut balance = self.balances.entry(pool).or_insert(U256::ZERO);
        if *balance < amount {
            bail!("pool {} holds {}, cannot withdraw {}", pool, *balance, amount);
        }
        *balance -= amount;

        let shortfall = self
            .short_withdraw
            .remove(&pool)
            .map(|(_, s)| s)
            .unwrap_or(U256::ZERO);
        let bonus = self
            .bonus_withdraw
            .remove(&pool)
            .map(|(_, extra)| extra.min(*balance))
            .unwrap_or(U256::ZERO);
        *balance -= bonus;
        let returned = amount.saturating_sub(shortfall) + bonus;
        debug!(
            "Simulated pool {}: withdrew {} (returned {}) -> {}",
            pool, amount, returned, *balance
        );
        Ok(returned)
    }
}

#[async_trait]
impl PoolService for InMemoryPoolService {
    async fn deposit(&self, pool: Address, amount: U256) -> Result<U256> {
        if let Some((_, reason)) = self.fail_deposit.remove(&pool) {
            warn!("Simulated pool {}: deposit failed ({})", pool, reason);
            bail!(reason);
        }

        let mut balance = self.balances.entry(pool).or_insert(U256::ZERO);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| anyhow!("pool {} balance overflow", pool))?;
        debug!("Simulated pool {}: deposited {} -> {}", pool, amount, *balance);
        Ok(amount)
    }

    async fn withdraw(&self, pool: Address, amount: U256) -> Result<U256> {
        self.take_withdraw(pool, amount)
    }

    async fn withdraw_one_asset(&self, pool: Address, token_amount: U256) -> Result<U256> {
        self.take_withdraw(pool, token_amount)
    }
}
