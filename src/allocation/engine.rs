//! Allocation Engine
//!
//! Computes the ideal split of ledger capital for the current weights and the
//! single transfer that converges to it.
//!
//! Algorithm:
//!     total   = bal_a + bal_b
//!     ideal_a = floor(total * w_a / 100)
//!             = (total / 100) * w_a + (total % 100) * w_a / 100
//!     ideal_b = total - ideal_a          (never rounded on its own)
//!     bal_a > ideal_a  ->  A -> B, bal_a - ideal_a
//!     bal_b > ideal_b  ->  B -> A, bal_b - ideal_b
//!
//! Because ideal_a + ideal_b == total, at most one side can hold an excess.

use alloy::primitives::U256;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::{AllocatorError, AllocatorResult};
use crate::types::{LedgerBalances, PoolSlot, TransferInstruction, Weights};

/// Basis points in 100%
const BPS_SCALE: u64 = 10_000;

/// Right shift applied to both operands when `balance * BPS_SCALE` would
/// overflow. 2^14 > BPS_SCALE, so the shifted product always fits.
const BPS_OVERFLOW_SHIFT: usize = 14;

/// Read-only view of where capital sits versus where it should sit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationReport {
    pub balances: LedgerBalances,
    pub total: U256,
    pub weights: Weights,
    /// Current share of pool A in basis points (floor)
    pub current_a_bps: u64,
    /// Current share of pool B in basis points (floor)
    pub current_b_bps: u64,
    pub ideal: LedgerBalances,
    pub instruction: Option<TransferInstruction>,
}

impl AllocationReport {
    /// Current share of pool A as a percentage with two decimals
    pub fn current_a_percent(&self) -> Decimal {
        Decimal::new(self.current_a_bps as i64, 2)
    }

    pub fn current_b_percent(&self) -> Decimal {
        Decimal::new(self.current_b_bps as i64, 2)
    }

    pub fn is_balanced(&self) -> bool {
        self.instruction.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AllocationEngine {
    /// Excess below this is left in place. Zero moves any excess.
    min_rebalance_amount: U256,
}

impl AllocationEngine {
    pub fn new(min_rebalance_amount: U256) -> Self {
        Self {
            min_rebalance_amount,
        }
    }

    /// Ideal balances for `total` under `weights`. Exact floor for every
    /// representable total.
    pub fn ideal(&self, total: U256, weights: Weights) -> LedgerBalances {
        let hundred = U256::from(100u64);
        let w_a = U256::from(weights.a);
        // (total / 100) * w_a <= total, and the remainder term is below 100
        let ideal_a = (total / hundred) * w_a + (total % hundred) * w_a / hundred;
        let ideal_b = total - ideal_a;
        LedgerBalances::new(ideal_a, ideal_b)
    }

    /// Produce zero or one transfer instruction
    pub fn compute(
        &self,
        balances: LedgerBalances,
        weights: Weights,
    ) -> AllocatorResult<Option<TransferInstruction>> {
        let total = balances.total()?;
        if total.is_zero() {
            debug!("Allocation: nothing to rebalance (ledger empty)");
            return Ok(None);
        }

        let ideal = self.ideal(total, weights);

        let instruction = if balances.a > ideal.a {
            Some(TransferInstruction::new(PoolSlot::A, balances.a - ideal.a))
        } else if balances.b > ideal.b {
            Some(TransferInstruction::new(PoolSlot::B, balances.b - ideal.b))
        } else {
            None
        };

        match instruction {
            Some(ix) if ix.amount < self.min_rebalance_amount => {
                debug!(
                    "Allocation: excess {} below minimum {}, skipping",
                    ix.amount, self.min_rebalance_amount
                );
                Ok(None)
            }
            Some(ix) => {
                debug!(
                    "Allocation: balances=({}, {}) ideal=({}, {}) weights={} -> {}",
                    balances.a, balances.b, ideal.a, ideal.b, weights, ix
                );
                Ok(Some(ix))
            }
            None => {
                debug!("Allocation: already balanced at {}", weights);
                Ok(None)
            }
        }
    }

    /// Full report: current shares, ideal split and the pending instruction
    pub fn report(
        &self,
        balances: LedgerBalances,
        weights: Weights,
    ) -> AllocatorResult<AllocationReport> {
        let total = balances.total()?;
        let ideal = self.ideal(total, weights);
        let instruction = self.compute(balances, weights)?;

        Ok(AllocationReport {
            balances,
            total,
            weights,
            current_a_bps: allocation_bps(balances.a, total)?,
            current_b_bps: allocation_bps(balances.b, total)?,
            ideal,
            instruction,
        })
    }
}

/// Share of `balance` in `total` in basis points, rounded down. Zero when
/// there is no capital. Balances near `U256::MAX` are scaled down first and
/// may read one basis point low.
pub fn allocation_bps(balance: U256, total: U256) -> AllocatorResult<u64> {
    if total.is_zero() {
        return Ok(0);
    }
    let scale = U256::from(BPS_SCALE);
    let bps = match balance.checked_mul(scale) {
        Some(scaled) => scaled / total,
        None => {
            let divisor = total >> BPS_OVERFLOW_SHIFT;
            ((balance >> BPS_OVERFLOW_SHIFT) * scale) / divisor
        }
    };
    u64::try_from(bps).map_err(|_| AllocatorError::AmountOverflow)
}
