//! Allocator Service
//!
//! Owns the weight policy, pool registry and liquidity ledger behind a single
//! lock and exposes the public and administrative operations. Each operation
//! holds the lock for its full duration, external calls included, so no two
//! operations interleave and a rebalance never acts on a stale balance read.
//!
//! Administrative operations take the caller's address explicitly and check
//! it against the owner before doing anything else.
//!
//! A rebalance that strands funds latches the allocator: the ledger no longer
//! matches the pools, so further rebalances are refused until the owner
//! reports where the funds went via `resolve_stranded`.

use alloy::primitives::{Address, U256};
use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::sync::broadcast::Receiver;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::allocation::{AllocationEngine, AllocationReport, WeightPolicy};
use crate::error::{AllocatorError, AllocatorResult};
use crate::events::{AllocatorEvent, EventBus, EventRecord};
use crate::filters::PoolRegistry;
use crate::pool::LiquidityLedger;
use crate::rebalance::RebalanceExecutor;
use crate::services::{Custody, PoolService};
use crate::snapshot::AllocatorSnapshot;
use crate::types::{
    PoolSlot, RebalanceOutcome, StrandedRecord, StrandedResolution, VerifiedPools, Weights,
    WithdrawMode,
};

/// Construction parameters, usually built from `AllocatorConfig`
#[derive(Debug, Clone)]
pub struct AllocatorSettings {
    /// Only principal allowed to change weights or the whitelist
    pub owner: Address,
    /// Custody account deposits are pulled into
    pub account: Address,
    pub pool_a: Address,
    pub pool_b: Address,
    pub weights: Weights,
    pub whitelist: Vec<Address>,
    pub withdraw_mode: WithdrawMode,
    pub min_rebalance_amount: U256,
}

/// Everything mutable, guarded together
#[derive(Debug)]
struct AllocatorState {
    policy: WeightPolicy,
    registry: PoolRegistry,
    ledger: LiquidityLedger,
    /// Set by a stranded rebalance, cleared only by the owner
    stranded: Option<StrandedRecord>,
}

pub struct Allocator {
    owner: Address,
    account: Address,
    verified: VerifiedPools,
    state: Mutex<AllocatorState>,
    engine: AllocationEngine,
    executor: RebalanceExecutor,
    pools: Arc<dyn PoolService>,
    custody: Arc<dyn Custody>,
    events: EventBus,
}

impl Allocator {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Fresh allocator with a zeroed ledger
    pub fn new(
        settings: AllocatorSettings,
        pools: Arc<dyn PoolService>,
        custody: Arc<dyn Custody>,
    ) -> AllocatorResult<Self> {
        let verified = VerifiedPools::new(settings.pool_a, settings.pool_b)?;
        let registry = PoolRegistry::with_whitelist(verified, &settings.whitelist)?;
        let state = AllocatorState {
            policy: WeightPolicy::new(settings.weights),
            registry,
            ledger: LiquidityLedger::new(),
            stranded: None,
        };
        Ok(Self::assemble(settings, verified, state, pools, custody))
    }

    /// Rebuild from a persisted snapshot. The snapshot must describe the
    /// same verified pools as `settings`.
    pub fn from_snapshot(
        snapshot: &AllocatorSnapshot,
        settings: AllocatorSettings,
        pools: Arc<dyn PoolService>,
        custody: Arc<dyn Custody>,
    ) -> Result<Self> {
        let restored = snapshot.restore()?;
        let verified = restored.registry.verified();
        if verified.a != settings.pool_a || verified.b != settings.pool_b {
            bail!(
                "Snapshot pools ({}, {}) do not match configured pools ({}, {})",
                verified.a,
                verified.b,
                settings.pool_a,
                settings.pool_b
            );
        }

        info!(
            "Allocator restored: weights={} ledger=({}, {}) whitelisted={}",
            restored.policy.weights(),
            restored.ledger.balance(PoolSlot::A),
            restored.ledger.balance(PoolSlot::B),
            restored.registry.whitelisted().len()
        );
        if let Some(record) = &restored.stranded {
            warn!(
                "Allocator restored with {} stranded ({} -> {}), rebalancing disabled",
                record.amount, record.from, record.to
            );
        }
        let state = AllocatorState {
            policy: restored.policy,
            registry: restored.registry,
            ledger: restored.ledger,
            stranded: restored.stranded,
        };
        Ok(Self::assemble(settings, verified, state, pools, custody))
    }

    fn assemble(
        settings: AllocatorSettings,
        verified: VerifiedPools,
        state: AllocatorState,
        pools: Arc<dyn PoolService>,
        custody: Arc<dyn Custody>,
    ) -> Self {
        Self {
            owner: settings.owner,
            account: settings.account,
            verified,
            state: Mutex::new(state),
            engine: AllocationEngine::new(settings.min_rebalance_amount),
            executor: RebalanceExecutor::new(Arc::clone(&pools), settings.withdraw_mode),
            pools,
            custody,
            events: EventBus::default(),
        }
    }

    fn ensure_owner(&self, caller: Address) -> AllocatorResult<()> {
        if caller != self.owner {
            warn!("Rejected admin call from {}", caller);
            return Err(AllocatorError::Unauthorized(caller));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Administrative surface
    // ------------------------------------------------------------------

    pub async fn set_weights(&self, caller: Address, a: u8, b: u8) -> AllocatorResult<()> {
        self.ensure_owner(caller)?;
        let mut state = self.state.lock().await;
        let previous = state.policy.set_weights(a, b)?;
        self.events.publish(AllocatorEvent::WeightsUpdated {
            previous,
            current: state.policy.weights(),
        });
        Ok(())
    }

    /// Whitelist `pools` in order. Stops at the first duplicate; pools
    /// before it stay whitelisted and have already been announced.
    pub async fn whitelist_pools(&self, caller: Address, pools: &[Address]) -> AllocatorResult<()> {
        self.ensure_owner(caller)?;
        let mut state = self.state.lock().await;
        for pool in pools {
            state.registry.add_if_absent(*pool)?;
            self.events
                .publish(AllocatorEvent::PoolWhitelisted { pool: *pool });
        }
        Ok(())
    }

    /// Clear a stranded rebalance once the funds have been moved by hand.
    /// `DepositedToDestination` books the interrupted transfer in the ledger.
    /// Returns the cleared record, `None` if nothing was stranded.
    pub async fn resolve_stranded(
        &self,
        caller: Address,
        resolution: StrandedResolution,
    ) -> AllocatorResult<Option<StrandedRecord>> {
        self.ensure_owner(caller)?;
        let mut state = self.state.lock().await;
        let record = match state.stranded.clone() {
            Some(record) => record,
            None => return Ok(None),
        };

        if resolution == StrandedResolution::DepositedToDestination {
            state.ledger.transfer(record.from, record.to, record.amount)?;
        }
        state.stranded = None;

        info!(
            "Stranded {} ({} -> {}) resolved as {:?}",
            record.amount, record.from, record.to, resolution
        );
        self.events.publish(AllocatorEvent::StrandedResolved {
            amount: record.amount,
            resolution,
        });
        Ok(Some(record))
    }

    // ------------------------------------------------------------------
    // Public surface
    // ------------------------------------------------------------------

    /// Pull `amount` from `caller`, deposit it into `pool` and attribute it
    /// to that pool in the ledger.
    pub async fn add_liquidity(
        &self,
        caller: Address,
        pool: Address,
        amount: U256,
    ) -> AllocatorResult<()> {
        let mut state = self.state.lock().await;

        let slot = self
            .verified
            .slot_of(&pool)
            .ok_or(AllocatorError::InvalidPool(pool))?;
        if amount.is_zero() {
            return Err(AllocatorError::ZeroAmount);
        }
        // The credit below must not fail once funds have moved
        state
            .ledger
            .total()?
            .checked_add(amount)
            .ok_or(AllocatorError::AmountOverflow)?;

        let available = self.custody.balance_of(caller).await.map_err(|e| {
            warn!("Deposit: balance lookup for {} failed: {}", caller, e);
            AllocatorError::CustodyUnavailable {
                owner: caller,
                reason: e.to_string(),
            }
        })?;
        if available < amount {
            return Err(AllocatorError::InsufficientFunds {
                owner: caller,
                available,
                required: amount,
            });
        }

        if let Err(e) = self.custody.transfer_from(caller, self.account, amount).await {
            warn!("Deposit: transfer from {} failed: {}", caller, e);
            return Err(AllocatorError::InsufficientFunds {
                owner: caller,
                available,
                required: amount,
            });
        }

        if let Err(e) = self.pools.deposit(pool, amount).await {
            return Err(self.refund(caller, pool, amount, e.to_string()).await);
        }

        state.ledger.credit(slot, amount)?;
        info!(
            "Deposit: {} from {} into {} ({}) | ledger=({}, {})",
            amount,
            caller,
            slot,
            pool,
            state.ledger.balance(PoolSlot::A),
            state.ledger.balance(PoolSlot::B)
        );
        self.events.publish(AllocatorEvent::Deposited {
            caller,
            pool,
            amount,
        });
        Ok(())
    }

    /// Return custody of a deposit the pool refused
    async fn refund(
        &self,
        caller: Address,
        pool: Address,
        amount: U256,
        reason: String,
    ) -> AllocatorError {
        warn!("Deposit: pool {} rejected {}: {}, refunding {}", pool, amount, reason, caller);
        match self.custody.transfer_from(self.account, caller, amount).await {
            Ok(()) => AllocatorError::DepositFailed { pool, reason },
            Err(e) => {
                error!(
                    "🚨 Deposit: refund of {} to {} failed: {} - manual recovery required",
                    amount, caller, e
                );
                AllocatorError::StrandedDeposit {
                    caller,
                    amount,
                    reason: format!("{}; refund failed: {}", reason, e),
                }
            }
        }
    }

    /// Move excess capital toward the target weights. Anyone may call this;
    /// `None` means the ledger was already balanced (or empty).
    pub async fn rebalance(&self) -> AllocatorResult<Option<RebalanceOutcome>> {
        let mut state = self.state.lock().await;
        if let Some(record) = &state.stranded {
            warn!(
                "Rebalance refused: {} stranded ({} -> {}) awaiting resolution",
                record.amount, record.from, record.to
            );
            return Err(record.to_error(&self.verified));
        }

        let weights = state.policy.weights();
        let balances = state.ledger.balances();

        let instruction = match self.engine.compute(balances, weights)? {
            Some(ix) => ix,
            None => {
                info!(
                    "Rebalance: nothing to do at {} (ledger=({}, {}))",
                    weights, balances.a, balances.b
                );
                return Ok(None);
            }
        };

        let result = self
            .executor
            .execute(instruction, self.verified, &mut state.ledger)
            .await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Some(record) = StrandedRecord::from_error(&e, &self.verified) {
                    state.stranded = Some(record);
                }
                return Err(e);
            }
        };

        self.events.publish(AllocatorEvent::Rebalanced {
            amount: instruction.amount,
            from_pool: outcome.from_pool,
            to_pool: outcome.to_pool,
        });
        Ok(Some(outcome))
    }

    pub async fn weights(&self) -> Weights {
        self.state.lock().await.policy.weights()
    }

    /// Capital attributed to a verified pool
    pub async fn ledger_balance(&self, pool: Address) -> AllocatorResult<U256> {
        let state = self.state.lock().await;
        let slot = state.registry.slot_of(&pool)?;
        Ok(state.ledger.balance(slot))
    }

    pub async fn whitelisted_pools(&self) -> Vec<Address> {
        self.state.lock().await.registry.whitelisted().to_vec()
    }

    pub async fn is_whitelisted(&self, pool: &Address) -> bool {
        self.state.lock().await.registry.is_whitelisted(pool)
    }

    pub async fn stranded(&self) -> Option<StrandedRecord> {
        self.state.lock().await.stranded.clone()
    }

    pub async fn allocation_report(&self) -> AllocatorResult<AllocationReport> {
        let state = self.state.lock().await;
        self.engine
            .report(state.ledger.balances(), state.policy.weights())
    }

    pub async fn snapshot(&self) -> AllocatorSnapshot {
        let state = self.state.lock().await;
        AllocatorSnapshot::capture(
            &state.policy,
            &state.registry,
            &state.ledger,
            state.stranded.as_ref(),
        )
    }

    pub fn subscribe(&self) -> Receiver<EventRecord> {
        self.events.subscribe()
    }

    pub fn verified_pools(&self) -> VerifiedPools {
        self.verified
    }

    pub fn account(&self) -> Address {
        self.account
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{InMemoryCustody, InMemoryPoolService};

    const OWNER: u8 = 0x01;
    const ACCOUNT: u8 = 0x02;
    const ALICE: u8 = 0x03;

    struct Harness {
        allocator: Allocator,
        pools: Arc<InMemoryPoolService>,
        custody: Arc<InMemoryCustody>,
        pool_a: Address,
        pool_b: Address,
        owner: Address,
        alice: Address,
    }

    fn settings(weights: (u8, u8)) -> AllocatorSettings {
        AllocatorSettings {
            owner: Address::with_last_byte(OWNER),
            account: Address::with_last_byte(ACCOUNT),
            pool_a: Address::with_last_byte(0xa),
            pool_b: Address::with_last_byte(0xb),
            weights: Weights::new(weights.0, weights.1).unwrap(),
            whitelist: Vec::new(),
            withdraw_mode: WithdrawMode::OneAsset,
            min_rebalance_amount: U256::ZERO,
        }
    }

    fn harness(weights: (u8, u8)) -> Harness {
        let pools = Arc::new(InMemoryPoolService::new());
        let custody = Arc::new(InMemoryCustody::new());
        let alice = Address::with_last_byte(ALICE);
        custody.mint(alice, U256::from(1_000_000));
        let settings = settings(weights);
        let allocator = Allocator::new(settings.clone(), pools.clone(), custody.clone()).unwrap();
        Harness {
            allocator,
            pools,
            custody,
            pool_a: settings.pool_a,
            pool_b: settings.pool_b,
            owner: settings.owner,
            alice,
        }
    }

    async fn ledger(h: &Harness) -> (U256, U256) {
        (
            h.allocator.ledger_balance(h.pool_a).await.unwrap(),
            h.allocator.ledger_balance(h.pool_b).await.unwrap(),
        )
    }

    #[tokio::test]
    async fn test_set_weights_roundtrip_and_event() {
        let h = harness((50, 50));
        let mut rx = h.allocator.subscribe();

        h.allocator.set_weights(h.owner, 70, 30).await.unwrap();

        assert_eq!(h.allocator.weights().await.as_tuple(), (70, 30));
        assert_eq!(
            rx.recv().await.unwrap().event,
            AllocatorEvent::WeightsUpdated {
                previous: Weights::new(50, 50).unwrap(),
                current: Weights::new(70, 30).unwrap(),
            }
        );
    }

    #[tokio::test]
    async fn test_set_weights_validation() {
        let h = harness((50, 50));
        assert_eq!(
            h.allocator.set_weights(h.owner, 60, 50).await,
            Err(AllocatorError::InvalidWeights { a: 60, b: 50 })
        );
        assert_eq!(
            h.allocator.set_weights(h.owner, 50, 50).await,
            Err(AllocatorError::NoOpUpdate { a: 50, b: 50 })
        );
    }

    #[tokio::test]
    async fn test_admin_requires_owner() {
        let h = harness((50, 50));
        assert_eq!(
            h.allocator.set_weights(h.alice, 70, 30).await,
            Err(AllocatorError::Unauthorized(h.alice))
        );
        assert_eq!(
            h.allocator
                .whitelist_pools(h.alice, &[Address::with_last_byte(9)])
                .await,
            Err(AllocatorError::Unauthorized(h.alice))
        );
        assert_eq!(h.allocator.weights().await.as_tuple(), (50, 50));
        assert!(h.allocator.whitelisted_pools().await.is_empty());
    }

    #[tokio::test]
    async fn test_whitelist_twice_fails() {
        let h = harness((50, 50));
        let pool = Address::with_last_byte(0x42);
        h.allocator.whitelist_pools(h.owner, &[pool]).await.unwrap();
        assert_eq!(
            h.allocator.whitelist_pools(h.owner, &[pool]).await,
            Err(AllocatorError::DuplicatePool(pool))
        );
        assert_eq!(h.allocator.whitelisted_pools().await, vec![pool]);
    }

    #[tokio::test]
    async fn test_whitelist_fail_fast_announces_prefix() {
        let h = harness((50, 50));
        let p1 = Address::with_last_byte(0x41);
        let p2 = Address::with_last_byte(0x42);
        let mut rx = h.allocator.subscribe();

        assert!(h.allocator.whitelist_pools(h.owner, &[p1, p1, p2]).await.is_err());

        assert_eq!(h.allocator.whitelisted_pools().await, vec![p1]);
        assert_eq!(rx.recv().await.unwrap().event, AllocatorEvent::PoolWhitelisted { pool: p1 });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deposit_then_half_split() {
        let h = harness((50, 50));
        let d = U256::from(1000);

        h.allocator.add_liquidity(h.alice, h.pool_a, d).await.unwrap();
        assert_eq!(ledger(&h).await, (d, U256::ZERO));

        let outcome = h.allocator.rebalance().await.unwrap().unwrap();
        assert_eq!(outcome.instruction.amount, U256::from(500));
        assert_eq!(ledger(&h).await, (U256::from(500), U256::from(500)));
    }

    #[tokio::test]
    async fn test_odd_deposit_floors_ideal_a() {
        let h = harness((50, 50));
        let d = U256::from(101);

        h.allocator.add_liquidity(h.alice, h.pool_a, d).await.unwrap();
        assert_eq!(ledger(&h).await, (d, U256::ZERO));

        let outcome = h.allocator.rebalance().await.unwrap().unwrap();
        assert_eq!(outcome.instruction.from, PoolSlot::A);
        assert_eq!(outcome.instruction.amount, U256::from(51));
        assert_eq!(ledger(&h).await, (U256::from(50), U256::from(51)));
        assert_eq!(h.pools.balance_of_pool(&h.pool_b), U256::from(51));
    }

    #[tokio::test]
    async fn test_seventy_thirty_scenario() {
        let h = harness((70, 30));
        let mut rx = h.allocator.subscribe();
        h.allocator
            .add_liquidity(h.alice, h.pool_a, U256::from(100))
            .await
            .unwrap();

        h.allocator.rebalance().await.unwrap();

        assert_eq!(ledger(&h).await, (U256::from(70), U256::from(30)));
        assert!(matches!(rx.recv().await.unwrap().event, AllocatorEvent::Deposited { .. }));
        assert_eq!(
            rx.recv().await.unwrap().event,
            AllocatorEvent::Rebalanced {
                amount: U256::from(30),
                from_pool: h.pool_a,
                to_pool: h.pool_b,
            }
        );
    }

    #[tokio::test]
    async fn test_rebalance_idempotent() {
        let h = harness((50, 50));
        h.allocator
            .add_liquidity(h.alice, h.pool_b, U256::from(1000))
            .await
            .unwrap();

        assert!(h.allocator.rebalance().await.unwrap().is_some());
        let after_first = ledger(&h).await;
        assert!(h.allocator.rebalance().await.unwrap().is_none());
        assert_eq!(ledger(&h).await, after_first);
    }

    #[tokio::test]
    async fn test_rebalance_empty_is_noop() {
        let h = harness((70, 30));
        assert_eq!(h.allocator.rebalance().await, Ok(None));
        assert_eq!(ledger(&h).await, (U256::ZERO, U256::ZERO));
    }

    #[tokio::test]
    async fn test_conservation_across_sequence() {
        let h = harness((50, 50));
        let deposits: [(bool, u64); 6] = [
            (true, 1000),
            (false, 7),
            (true, 333),
            (true, 1),
            (false, 4096),
            (true, 59),
        ];
        let mut total = U256::ZERO;

        for (i, (to_a, amount)) in deposits.iter().enumerate() {
            let pool = if *to_a { h.pool_a } else { h.pool_b };
            h.allocator
                .add_liquidity(h.alice, pool, U256::from(*amount))
                .await
                .unwrap();
            total += U256::from(*amount);

            if i % 2 == 1 {
                h.allocator.rebalance().await.unwrap();
            }
            if i == 3 {
                h.allocator.set_weights(h.owner, 20, 80).await.unwrap();
            }

            let (a, b) = ledger(&h).await;
            assert_eq!(a + b, total);
        }

        // ledger matches what the pools actually hold
        let (a, b) = ledger(&h).await;
        assert_eq!(h.pools.balance_of_pool(&h.pool_a), a);
        assert_eq!(h.pools.balance_of_pool(&h.pool_b), b);
    }

    #[tokio::test]
    async fn test_deposit_validation() {
        let h = harness((50, 50));
        assert_eq!(
            h.allocator.add_liquidity(h.alice, h.pool_a, U256::ZERO).await,
            Err(AllocatorError::ZeroAmount)
        );

        let stranger = Address::with_last_byte(0x99);
        assert_eq!(
            h.allocator.add_liquidity(h.alice, stranger, U256::from(1)).await,
            Err(AllocatorError::InvalidPool(stranger))
        );

        let broke = Address::with_last_byte(0x77);
        assert!(matches!(
            h.allocator.add_liquidity(broke, h.pool_a, U256::from(1)).await,
            Err(AllocatorError::InsufficientFunds { .. })
        ));
        assert_eq!(ledger(&h).await, (U256::ZERO, U256::ZERO));
    }

    #[tokio::test]
    async fn test_ledger_balance_unverified() {
        let h = harness((50, 50));
        let stranger = Address::with_last_byte(0x99);
        assert_eq!(
            h.allocator.ledger_balance(stranger).await,
            Err(AllocatorError::UnverifiedPool(stranger))
        );
    }

    #[tokio::test]
    async fn test_pool_deposit_failure_refunds() {
        let h = harness((50, 50));
        h.pools.fail_next_deposit(h.pool_a, "paused");
        let before = h.custody.balance(&h.alice);

        let err = h
            .allocator
            .add_liquidity(h.alice, h.pool_a, U256::from(10))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AllocatorError::DepositFailed {
                pool: h.pool_a,
                reason: "paused".to_string(),
            }
        );
        assert_eq!(h.custody.balance(&h.alice), before);
        assert_eq!(ledger(&h).await, (U256::ZERO, U256::ZERO));
    }

    #[tokio::test]
    async fn test_failed_refund_is_stranded() {
        let h = harness((50, 50));
        h.pools.fail_next_deposit(h.pool_a, "paused");
        h.custody
            .fail_next_transfer_from(h.allocator.account(), "frozen");

        let err = h
            .allocator
            .add_liquidity(h.alice, h.pool_a, U256::from(10))
            .await
            .unwrap_err();

        assert!(matches!(err, AllocatorError::StrandedDeposit { .. }));
        assert_eq!(h.custody.balance(&h.allocator.account()), U256::from(10));
    }

    #[tokio::test]
    async fn test_stranded_rebalance_leaves_ledger() {
        let h = harness((50, 50));
        h.allocator
            .add_liquidity(h.alice, h.pool_a, U256::from(100))
            .await
            .unwrap();
        h.pools.fail_next_deposit(h.pool_b, "deposit cap");

        let err = h.allocator.rebalance().await.unwrap_err();

        assert!(matches!(
            err,
            AllocatorError::StrandedFundsAfterPartialRebalance { .. }
        ));
        assert_eq!(ledger(&h).await, (U256::from(100), U256::ZERO));
    }

    #[tokio::test]
    async fn test_withdrawal_failure_then_retry() {
        let h = harness((50, 50));
        h.allocator
            .add_liquidity(h.alice, h.pool_a, U256::from(100))
            .await
            .unwrap();
        h.pools.fail_next_withdraw(h.pool_a, "liquidity unavailable");

        assert!(matches!(
            h.allocator.rebalance().await,
            Err(AllocatorError::WithdrawalFailed { .. })
        ));
        assert_eq!(ledger(&h).await, (U256::from(100), U256::ZERO));

        // caller re-invokes
        h.allocator.rebalance().await.unwrap();
        assert_eq!(ledger(&h).await, (U256::from(50), U256::from(50)));
    }

    #[tokio::test]
    async fn test_concurrent_rebalances_serialize() {
        let h = harness((50, 50));
        h.allocator
            .add_liquidity(h.alice, h.pool_a, U256::from(1000))
            .await
            .unwrap();

        let allocator = Arc::new(h.allocator);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                tokio::spawn(async move { allocator.rebalance().await })
            })
            .collect();

        let mut executed = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                executed += 1;
            }
        }

        assert_eq!(executed, 1);
        assert_eq!(allocator.ledger_balance(h.pool_a).await.unwrap(), U256::from(500));
        assert_eq!(h.pools.balance_of_pool(&h.pool_b), U256::from(500));
    }

    #[tokio::test]
    async fn test_allocation_report() {
        let h = harness((70, 30));
        h.allocator
            .add_liquidity(h.alice, h.pool_b, U256::from(40))
            .await
            .unwrap();

        let report = h.allocator.allocation_report().await.unwrap();
        assert_eq!(report.current_b_bps, 10_000);
        assert_eq!(report.ideal.a, U256::from(28));
        assert_eq!(report.instruction.unwrap().amount, U256::from(28));
    }

    #[tokio::test]
    async fn test_constructor_rejects_duplicate_whitelist() {
        let mut s = settings((50, 50));
        let p = Address::with_last_byte(5);
        s.whitelist = vec![p, p];
        let result = Allocator::new(
            s,
            Arc::new(InMemoryPoolService::new()),
            Arc::new(InMemoryCustody::new()),
        );
        assert!(matches!(result, Err(AllocatorError::DuplicatePool(_))));
    }

    #[tokio::test]
    async fn test_snapshot_restore_carries_state() {
        let h = harness((70, 30));
        h.allocator
            .add_liquidity(h.alice, h.pool_a, U256::from(100))
            .await
            .unwrap();
        h.allocator.rebalance().await.unwrap();
        let snapshot = h.allocator.snapshot().await;

        let restored = Allocator::from_snapshot(
            &snapshot,
            settings((50, 50)),
            h.pools.clone(),
            h.custody.clone(),
        )
        .unwrap();

        // persisted weights win over the configured ones
        assert_eq!(restored.weights().await.as_tuple(), (70, 30));
        assert_eq!(restored.ledger_balance(h.pool_a).await.unwrap(), U256::from(70));
        assert_eq!(restored.ledger_balance(h.pool_b).await.unwrap(), U256::from(30));
        assert_eq!(restored.rebalance().await, Ok(None));
    }

    #[tokio::test]
    async fn test_snapshot_restore_rejects_other_pools() {
        let h = harness((50, 50));
        let snapshot = h.allocator.snapshot().await;
        let mut other = settings((50, 50));
        other.pool_b = Address::with_last_byte(0xc);

        let result = Allocator::from_snapshot(
            &snapshot,
            other,
            Arc::new(InMemoryPoolService::new()),
            Arc::new(InMemoryCustody::new()),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stranded_rebalance_blocks_until_resolved() {
        let h = harness((50, 50));
        h.allocator
            .add_liquidity(h.alice, h.pool_a, U256::from(100))
            .await
            .unwrap();
        h.pools.fail_next_deposit(h.pool_b, "deposit cap");
        let first = h.allocator.rebalance().await.unwrap_err();
        assert!(first.is_stranded());

        // the same instruction must not be executed again
        assert_eq!(h.allocator.rebalance().await, Err(first.clone()));
        assert_eq!(h.pools.balance_of_pool(&h.pool_a), U256::from(50));
        assert_eq!(h.pools.balance_of_pool(&h.pool_b), U256::ZERO);
        assert_eq!(ledger(&h).await, (U256::from(100), U256::ZERO));

        // operator put the 50 back into pool A
        h.pools.deposit(h.pool_a, U256::from(50)).await.unwrap();
        let record = h
            .allocator
            .resolve_stranded(h.owner, StrandedResolution::ReturnedToSource)
            .await
            .unwrap()
            .unwrap();
        assert_eq!((record.from, record.to, record.amount), (PoolSlot::A, PoolSlot::B, U256::from(50)));
        assert_eq!(h.allocator.stranded().await, None);

        h.allocator.rebalance().await.unwrap();
        assert_eq!(ledger(&h).await, (U256::from(50), U256::from(50)));
        assert_eq!(h.pools.balance_of_pool(&h.pool_a), U256::from(50));
        assert_eq!(h.pools.balance_of_pool(&h.pool_b), U256::from(50));
    }

    #[tokio::test]
    async fn test_resolve_into_destination_books_transfer() {
        let h = harness((50, 50));
        h.allocator
            .add_liquidity(h.alice, h.pool_a, U256::from(100))
            .await
            .unwrap();
        h.pools.fail_next_deposit(h.pool_b, "deposit cap");
        h.allocator.rebalance().await.unwrap_err();
        let mut rx = h.allocator.subscribe();

        h.pools.deposit(h.pool_b, U256::from(50)).await.unwrap();
        h.allocator
            .resolve_stranded(h.owner, StrandedResolution::DepositedToDestination)
            .await
            .unwrap();

        assert_eq!(ledger(&h).await, (U256::from(50), U256::from(50)));
        assert_eq!(h.allocator.rebalance().await, Ok(None));
        assert_eq!(
            rx.recv().await.unwrap().event,
            AllocatorEvent::StrandedResolved {
                amount: U256::from(50),
                resolution: StrandedResolution::DepositedToDestination,
            }
        );
    }

    #[tokio::test]
    async fn test_resolve_stranded_is_owner_only() {
        let h = harness((50, 50));
        assert_eq!(
            h.allocator
                .resolve_stranded(h.alice, StrandedResolution::ReturnedToSource)
                .await,
            Err(AllocatorError::Unauthorized(h.alice))
        );
        assert_eq!(
            h.allocator
                .resolve_stranded(h.owner, StrandedResolution::ReturnedToSource)
                .await,
            Ok(None)
        );
    }

    #[tokio::test]
    async fn test_stranded_latch_survives_snapshot() {
        let h = harness((50, 50));
        h.allocator
            .add_liquidity(h.alice, h.pool_a, U256::from(100))
            .await
            .unwrap();
        h.pools.fail_next_deposit(h.pool_b, "deposit cap");
        h.allocator.rebalance().await.unwrap_err();

        let restored = Allocator::from_snapshot(
            &h.allocator.snapshot().await,
            settings((50, 50)),
            h.pools.clone(),
            h.custody.clone(),
        )
        .unwrap();

        assert!(restored.stranded().await.is_some());
        assert!(restored.rebalance().await.unwrap_err().is_stranded());
    }

    #[tokio::test]
    async fn test_huge_deposit_still_rebalances() {
        let h = harness((70, 30));
        let half = U256::MAX / U256::from(2u64);
        h.custody.mint(h.alice, half);

        h.allocator.add_liquidity(h.alice, h.pool_a, half).await.unwrap();
        let outcome = h.allocator.rebalance().await.unwrap().unwrap();

        let (a, b) = ledger(&h).await;
        assert_eq!(outcome.instruction.amount, b);
        assert_eq!(a + b, half);
        assert!(h.allocator.allocation_report().await.unwrap().is_balanced());
    }

    #[tokio::test]
    async fn test_balance_lookup_failure_reported() {
        let h = harness((50, 50));
        h.custody.fail_next_balance_of(h.alice, "rpc timeout");

        assert_eq!(
            h.allocator.add_liquidity(h.alice, h.pool_a, U256::from(10)).await,
            Err(AllocatorError::CustodyUnavailable {
                owner: h.alice,
                reason: "rpc timeout".to_string(),
            })
        );
        assert_eq!(ledger(&h).await, (U256::ZERO, U256::ZERO));
    }

    #[tokio::test]
    async fn test_is_whitelisted() {
        let h = harness((50, 50));
        let pool = Address::with_last_byte(0x42);
        assert!(!h.allocator.is_whitelisted(&pool).await);

        h.allocator.whitelist_pools(h.owner, &[pool]).await.unwrap();

        assert!(h.allocator.is_whitelisted(&pool).await);
        assert_eq!(h.allocator.whitelisted_pools().await, vec![pool]);
    }
}
