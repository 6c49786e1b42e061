//! Allocator Snapshot
//!
//! JSON layout of the persisted allocator state: weights, verified pools,
//! whitelist, ledger balances and any unresolved stranded rebalance. Amounts are decimal strings and addresses
//! hex strings so the file stays readable and lossless.

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::allocation::WeightPolicy;
use crate::filters::PoolRegistry;
use crate::pool::LiquidityLedger;
use crate::types::{LedgerBalances, PoolSlot, StrandedRecord, VerifiedPools, Weights};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllocatorSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub weight_a: u8,
    pub weight_b: u8,
    pub pool_a: String,
    pub pool_b: String,
    #[serde(default)]
    pub whitelisted: Vec<String>,
    pub liquidity_a: String,
    pub liquidity_b: String,
    #[serde(default)]
    pub stranded: Option<StrandedEntry>,
}

/// Persisted form of a `StrandedRecord`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StrandedEntry {
    pub from: PoolSlot,
    pub to: PoolSlot,
    pub amount: String,
    pub reason: String,
}

/// Typed state rebuilt from a snapshot
#[derive(Debug)]
pub struct RestoredState {
    pub policy: WeightPolicy,
    pub registry: PoolRegistry,
    pub ledger: LiquidityLedger,
    pub stranded: Option<StrandedRecord>,
}

impl AllocatorSnapshot {
    pub fn capture(
        policy: &WeightPolicy,
        registry: &PoolRegistry,
        ledger: &LiquidityLedger,
        stranded: Option<&StrandedRecord>,
    ) -> Self {
        let weights = policy.weights();
        let verified = registry.verified();
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            weight_a: weights.a,
            weight_b: weights.b,
            pool_a: verified.a.to_string(),
            pool_b: verified.b.to_string(),
            whitelisted: registry.whitelisted().iter().map(|p| p.to_string()).collect(),
            liquidity_a: ledger.balance(PoolSlot::A).to_string(),
            liquidity_b: ledger.balance(PoolSlot::B).to_string(),
            stranded: stranded.map(|r| StrandedEntry {
                from: r.from,
                to: r.to,
                amount: r.amount.to_string(),
                reason: r.reason.clone(),
            }),
        }
    }

    /// Rebuild typed state, re-checking every invariant
    pub fn restore(&self) -> Result<RestoredState> {
        if self.version != SNAPSHOT_VERSION {
            anyhow::bail!("Unsupported snapshot version {}", self.version);
        }

        let weights = Weights::new(self.weight_a, self.weight_b)
            .context("Snapshot weights are invalid")?;
        let verified = VerifiedPools::new(parse_address(&self.pool_a)?, parse_address(&self.pool_b)?)
            .context("Snapshot verified pools are invalid")?;

        let whitelisted = self
            .whitelisted
            .iter()
            .map(|p| parse_address(p))
            .collect::<Result<Vec<_>>>()?;
        let registry = PoolRegistry::with_whitelist(verified, &whitelisted)
            .context("Snapshot whitelist is invalid")?;

        let balances = LedgerBalances::new(
            parse_amount(&self.liquidity_a)?,
            parse_amount(&self.liquidity_b)?,
        );
        balances.total().context("Snapshot ledger total overflows")?;

        let stranded = match &self.stranded {
            Some(entry) => Some(StrandedRecord {
                from: entry.from,
                to: entry.to,
                amount: parse_amount(&entry.amount)?,
                reason: entry.reason.clone(),
            }),
            None => None,
        };

        Ok(RestoredState {
            policy: WeightPolicy::new(weights),
            registry,
            ledger: LiquidityLedger::from_balances(balances),
            stranded,
        })
    }

    /// Write to JSON file
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize snapshot")?;

        // Write to temp file first, then rename (atomic)
        let temp_path = path.as_ref().with_extension("tmp");
        std::fs::write(&temp_path, &json).context("Failed to write temp file")?;
        std::fs::rename(&temp_path, path.as_ref()).context("Failed to rename temp file")?;

        Ok(())
    }

    /// Read from JSON file
    pub fn read_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read snapshot: {}", path.as_ref().display()))?;
        let snapshot: Self = serde_json::from_str(&json).context("Failed to parse snapshot JSON")?;
        Ok(snapshot)
    }
}

fn parse_address(s: &str) -> Result<Address> {
    s.trim()
        .parse::<Address>()
        .with_context(|| format!("Invalid address in snapshot: {}", s))
}

fn parse_amount(s: &str) -> Result<U256> {
    s.trim()
        .parse::<U256>()
        .with_context(|| format!("Invalid amount in snapshot: {}", s))
}
