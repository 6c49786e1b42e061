//! Rebalance Executor
//!
//! Moves one transfer instruction's worth of capital between the verified
//! pools: withdraw from the source, deposit into the destination, then
//! update the ledger. Two separate pool calls means leg risk; a failed
//! second leg is reported as stranded funds and never retried here.
//!
//! Ordering:
//!     1. guard amount against the ledger (before any external call)
//!     2. withdraw from source         -> WithdrawalFailed on error
//!        short payout is re-deposited into the source, surplus likewise
//!     3. deposit into destination     -> StrandedFundsAfterPartialRebalance on error
//!     4. ledger transfer

use alloy::primitives::{Address, U256};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{AllocatorError, AllocatorResult};
use crate::pool::LiquidityLedger;
use crate::services::PoolService;
use crate::types::{RebalanceOutcome, TransferInstruction, VerifiedPools, WithdrawMode};

pub struct RebalanceExecutor {
    pools: Arc<dyn PoolService>,
    withdraw_mode: WithdrawMode,
}

impl RebalanceExecutor {
    pub fn new(pools: Arc<dyn PoolService>, withdraw_mode: WithdrawMode) -> Self {
        Self {
            pools,
            withdraw_mode,
        }
    }

    /// Execute `instruction` and apply it to `ledger`
    pub async fn execute(
        &self,
        instruction: TransferInstruction,
        verified: VerifiedPools,
        ledger: &mut LiquidityLedger,
    ) -> AllocatorResult<RebalanceOutcome> {
        let TransferInstruction { from, to, amount } = instruction;
        let from_pool = verified.pool(from);
        let to_pool = verified.pool(to);

        if amount.is_zero() {
            return Err(AllocatorError::ZeroAmount);
        }
        let available = ledger.balance(from);
        if amount > available {
            return Err(AllocatorError::InsufficientLiquidity {
                slot: from,
                available,
                requested: amount,
            });
        }

        info!(
            "Rebalance: moving {} from {} ({}) to {} ({}) via {:?}",
            amount, from, from_pool, to, to_pool, self.withdraw_mode
        );

        // Leg 1: withdraw
        let withdrawn = match self.withdraw_mode {
            WithdrawMode::OneAsset => self.pools.withdraw_one_asset(from_pool, amount).await,
            WithdrawMode::Proportional => self.pools.withdraw(from_pool, amount).await,
        }
        .map_err(|e| {
            warn!("Rebalance: withdrawal from {} failed: {}", from_pool, e);
            AllocatorError::WithdrawalFailed {
                pool: from_pool,
                reason: e.to_string(),
            }
        })?;

        if withdrawn < amount {
            return Err(self.restore_short_withdrawal(instruction, verified, withdrawn).await);
        }
        if withdrawn > amount {
            self.return_surplus(from_pool, withdrawn - amount).await;
        }

        // Leg 2: deposit
        let minted = match self.pools.deposit(to_pool, amount).await {
            Ok(minted) => minted,
            Err(e) => {
                error!(
                    "🚨 Rebalance: {} withdrawn from {} but deposit into {} failed: {} - manual recovery required",
                    amount, from_pool, to_pool, e
                );
                return Err(AllocatorError::StrandedFundsAfterPartialRebalance {
                    from: from_pool,
                    to: to_pool,
                    amount,
                    reason: e.to_string(),
                });
            }
        };

        ledger.transfer(from, to, amount)?;
        let balances_after = ledger.balances();
        info!(
            "✅ Rebalance complete: {} | ledger=({}, {})",
            instruction, balances_after.a, balances_after.b
        );

        Ok(RebalanceOutcome {
            instruction,
            from_pool,
            to_pool,
            pool_tokens_minted: minted,
            balances_after,
        })
    }

    /// Extra payout was never ledger capital; send it back to its pool. A
    /// failed return leaves it in custody and does not fail the rebalance.
    async fn return_surplus(&self, pool: Address, surplus: U256) {
        warn!(
            "Rebalance: {} paid out {} more than requested, re-depositing",
            pool, surplus
        );
        if let Err(e) = self.pools.deposit(pool, surplus).await {
            error!(
                "🚨 Rebalance: surplus {} from {} left in custody: {}",
                surplus, pool, e
            );
        }
    }

    /// Put a short withdrawal back where it came from. The ledger is left as
    /// it was; the returned error describes what happened.
    async fn restore_short_withdrawal(
        &self,
        instruction: TransferInstruction,
        verified: VerifiedPools,
        withdrawn: U256,
    ) -> AllocatorError {
        let from_pool = verified.pool(instruction.from);
        let reason = format!(
            "pool returned {} of {} requested",
            withdrawn, instruction.amount
        );
        warn!("Rebalance: {} from {}, re-depositing", reason, from_pool);

        if withdrawn.is_zero() {
            return AllocatorError::WithdrawalFailed {
                pool: from_pool,
                reason,
            };
        }

        match self.pools.deposit(from_pool, withdrawn).await {
            Ok(_) => AllocatorError::WithdrawalFailed {
                pool: from_pool,
                reason,
            },
            Err(e) => {
                error!(
                    "🚨 Rebalance: could not return {} to {}: {} - manual recovery required",
                    withdrawn, from_pool, e
                );
                AllocatorError::StrandedFundsAfterPartialRebalance {
                    from: from_pool,
                    to: from_pool,
                    amount: withdrawn,
                    reason: format!("{}; re-deposit failed: {}", reason, e),
                }
            }
        }
    }
}
