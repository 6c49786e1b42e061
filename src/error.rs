//! Allocator Error Taxonomy
//!
//! Every failure an allocator operation can report. Validation variants are
//! raised before any state is touched. The two stranded variants mean funds
//! are sitting in the allocator's custody account outside any pool and an
//! operator has to move them by hand.

use alloy::primitives::{Address, U256};
use thiserror::Error;

use crate::types::PoolSlot;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocatorError {
    #[error("Invalid weights: {a} + {b} must equal 100")]
    InvalidWeights { a: u8, b: u8 },

    #[error("Weights already set to {a}/{b}")]
    NoOpUpdate { a: u8, b: u8 },

    #[error("Pool {0} is already registered")]
    DuplicatePool(Address),

    #[error("Pool {0} is not one of the verified pools")]
    UnverifiedPool(Address),

    #[error("Invalid pool: {0}")]
    InvalidPool(Address),

    #[error("Insufficient funds: {owner} holds {available}, needs {required}")]
    InsufficientFunds {
        owner: Address,
        available: U256,
        required: U256,
    },

    #[error("Custody lookup for {owner} failed: {reason}")]
    CustodyUnavailable { owner: Address, reason: String },

    #[error("Insufficient liquidity in pool {slot}: {available} available, {requested} requested")]
    InsufficientLiquidity {
        slot: PoolSlot,
        available: U256,
        requested: U256,
    },

    #[error("Cannot transfer pool {0} to itself")]
    SelfTransfer(PoolSlot),

    #[error("Withdrawal from {pool} failed: {reason}")]
    WithdrawalFailed { pool: Address, reason: String },

    #[error("Deposit into {pool} failed: {reason}")]
    DepositFailed { pool: Address, reason: String },

    #[error("Stranded funds: {amount} withdrawn from {from} but deposit into {to} failed: {reason}")]
    StrandedFundsAfterPartialRebalance {
        from: Address,
        to: Address,
        amount: U256,
        reason: String,
    },

    #[error("Stranded deposit: {amount} from {caller} held in custody, refund failed: {reason}")]
    StrandedDeposit {
        caller: Address,
        amount: U256,
        reason: String,
    },

    #[error("Caller {0} is not the owner")]
    Unauthorized(Address),

    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Amount overflow")]
    AmountOverflow,
}

impl AllocatorError {
    /// True for conditions that need manual recovery rather than a retry.
    pub fn is_stranded(&self) -> bool {
        matches!(
            self,
            AllocatorError::StrandedFundsAfterPartialRebalance { .. }
                | AllocatorError::StrandedDeposit { .. }
        )
    }
}

pub type AllocatorResult<T> = std::result::Result<T, AllocatorError>;
