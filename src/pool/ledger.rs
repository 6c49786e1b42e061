//! Liquidity Ledger
//!
//! Capital attributed to pool A and pool B. Credits only add; transfers move
//! between the two fields so the total never changes outside a deposit.
//! Every mutation validates first and writes last, so a failed call leaves
//! both balances untouched.

use alloy::primitives::U256;
use tracing::debug;

use crate::error::{AllocatorError, AllocatorResult};
use crate::types::{LedgerBalances, PoolSlot};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiquidityLedger {
    liquidity_a: U256,
    liquidity_b: U256,
}

impl LiquidityLedger {
    /// Create a zeroed ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from persisted balances
    pub fn from_balances(balances: LedgerBalances) -> Self {
        Self {
            liquidity_a: balances.a,
            liquidity_b: balances.b,
        }
    }

    pub fn balance(&self, slot: PoolSlot) -> U256 {
        match slot {
            PoolSlot::A => self.liquidity_a,
            PoolSlot::B => self.liquidity_b,
        }
    }

    pub fn balances(&self) -> LedgerBalances {
        LedgerBalances::new(self.liquidity_a, self.liquidity_b)
    }

    pub fn total(&self) -> AllocatorResult<U256> {
        self.balances().total()
    }

    fn slot_mut(&mut self, slot: PoolSlot) -> &mut U256 {
        match slot {
            PoolSlot::A => &mut self.liquidity_a,
            PoolSlot::B => &mut self.liquidity_b,
        }
    }

    /// Attribute `amount` of new capital to `slot`
    pub fn credit(&mut self, slot: PoolSlot, amount: U256) -> AllocatorResult<()> {
        if amount.is_zero() {
            return Err(AllocatorError::ZeroAmount);
        }
        // Keep the total representable, not just the slot
        self.total()?
            .checked_add(amount)
            .ok_or(AllocatorError::AmountOverflow)?;

        let balance = self.slot_mut(slot);
        *balance += amount;
        debug!("Ledger: credit {} to {} -> {}", amount, slot, balance);
        Ok(())
    }

    /// Move `amount` of attributed capital from one pool to the other
    pub fn transfer(&mut self, from: PoolSlot, to: PoolSlot, amount: U256) -> AllocatorResult<()> {
        if from == to {
            return Err(AllocatorError::SelfTransfer(from));
        }
        if amount.is_zero() {
            return Err(AllocatorError::ZeroAmount);
        }
        let available = self.balance(from);
        if amount > available {
            return Err(AllocatorError::InsufficientLiquidity {
                slot: from,
                available,
                requested: amount,
            });
        }

        *self.slot_mut(from) -= amount;
        *self.slot_mut(to) += amount;
        debug!(
            "Ledger: moved {} {} -> {} | balances=({}, {})",
            amount, from, to, self.liquidity_a, self.liquidity_b
        );
        Ok(())
    }
}
