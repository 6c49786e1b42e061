// Core data structures shared by the policy, ledger, engine and executor

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AllocatorError, AllocatorResult};

/// Position of a verified pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolSlot {
    A,
    B,
}

impl PoolSlot {
    pub fn other(&self) -> PoolSlot {
        match self {
            PoolSlot::A => PoolSlot::B,
            PoolSlot::B => PoolSlot::A,
        }
    }
}

impl fmt::Display for PoolSlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PoolSlot::A => write!(f, "A"),
            PoolSlot::B => write!(f, "B"),
        }
    }
}

/// Target allocation weights, whole percentages summing to 100
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weights {
    pub a: u8,
    pub b: u8,
}

impl Weights {
    /// Validate and build. The sum is taken in u16 so 200+56 can't wrap to 0.
    pub fn new(a: u8, b: u8) -> AllocatorResult<Self> {
        if u16::from(a) + u16::from(b) != 100 {
            return Err(AllocatorError::InvalidWeights { a, b });
        }
        Ok(Self { a, b })
    }

    pub fn as_tuple(&self) -> (u8, u8) {
        (self.a, self.b)
    }
}

impl Default for Weights {
    fn default() -> Self {
        Self { a: 50, b: 50 }
    }
}

impl fmt::Display for Weights {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.a, self.b)
    }
}

/// The two pools fixed at construction, in slot order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedPools {
    pub a: Address,
    pub b: Address,
}

impl VerifiedPools {
    pub fn new(a: Address, b: Address) -> AllocatorResult<Self> {
        if a == b {
            return Err(AllocatorError::DuplicatePool(b));
        }
        Ok(Self { a, b })
    }

    pub fn pool(&self, slot: PoolSlot) -> Address {
        match slot {
            PoolSlot::A => self.a,
            PoolSlot::B => self.b,
        }
    }

    pub fn slot_of(&self, pool: &Address) -> Option<PoolSlot> {
        if *pool == self.a {
            Some(PoolSlot::A)
        } else if *pool == self.b {
            Some(PoolSlot::B)
        } else {
            None
        }
    }
}

/// Ledger balances read out for the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerBalances {
    pub a: U256,
    pub b: U256,
}

impl LedgerBalances {
    pub fn new(a: U256, b: U256) -> Self {
        Self { a, b }
    }

    pub fn total(&self) -> AllocatorResult<U256> {
        self.a.checked_add(self.b).ok_or(AllocatorError::AmountOverflow)
    }
}

/// One move of excess capital between the two pools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferInstruction {
    pub from: PoolSlot,
    pub to: PoolSlot,
    pub amount: U256,
}

impl TransferInstruction {
    pub fn new(from: PoolSlot, amount: U256) -> Self {
        Self {
            from,
            to: from.other(),
            amount,
        }
    }
}

impl fmt::Display for TransferInstruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} -> {}: {}", self.from, self.to, self.amount)
    }
}

/// How underlying is pulled out of a pool during a rebalance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawMode {
    /// Single reference asset withdrawal (preferred)
    #[default]
    OneAsset,
    /// Balanced withdrawal across the pool's assets
    Proportional,
}

/// Result of an executed rebalance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalanceOutcome {
    pub instruction: TransferInstruction,
    pub from_pool: Address,
    pub to_pool: Address,
    /// Pool tokens minted by the destination pool
    pub pool_tokens_minted: U256,
    pub balances_after: LedgerBalances,
}

/// Capital a rebalance withdrew but never placed. Kept in slot terms so it
/// survives a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrandedRecord {
    pub from: PoolSlot,
    pub to: PoolSlot,
    pub amount: U256,
    pub reason: String,
}

impl StrandedRecord {
    /// Record for a `StrandedFundsAfterPartialRebalance`, `None` for any
    /// other error.
    pub fn from_error(err: &AllocatorError, verified: &VerifiedPools) -> Option<Self> {
        match err {
            AllocatorError::StrandedFundsAfterPartialRebalance {
                from,
                to,
                amount,
                reason,
            } => Some(Self {
                from: verified.slot_of(from)?,
                to: verified.slot_of(to)?,
                amount: *amount,
                reason: reason.clone(),
            }),
            _ => None,
        }
    }

    pub fn to_error(&self, verified: &VerifiedPools) -> AllocatorError {
        AllocatorError::StrandedFundsAfterPartialRebalance {
            from: verified.pool(self.from),
            to: verified.pool(self.to),
            amount: self.amount,
            reason: self.reason.clone(),
        }
    }
}

/// Where an operator put stranded funds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrandedResolution {
    /// Back into the pool they were withdrawn from; ledger unchanged
    ReturnedToSource,
    /// Into the intended destination; the interrupted transfer is booked
    DepositedToDestination,
}
