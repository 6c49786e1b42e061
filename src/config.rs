//! Configuration management
//!
//! Reads allocator settings from a TOML file, then applies `.env` /
//! environment overrides:
//!
//!   ALLOCATOR_OWNER       owner address
//!   ALLOCATOR_STATE_FILE  snapshot path
//!   ALLOCATOR_WEIGHT_A    initial weight of pool A
//!   ALLOCATOR_WEIGHT_B    initial weight of pool B

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

use crate::allocator::AllocatorSettings;
use crate::types::{Weights, WithdrawMode};

/// Top-level TOML configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AllocatorConfig {
    pub general: GeneralConfig,
    pub pools: PoolsConfig,
}

/// General settings
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    pub owner: String,
    /// Custody account holding deposits in transit
    pub account: String,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    #[serde(default)]
    pub withdraw_mode: WithdrawMode,
    /// Decimal string; excess below this is not moved
    #[serde(default = "default_min_rebalance")]
    pub min_rebalance_amount: String,
}

fn default_state_file() -> String { "data/allocator_state.json".to_string() }
fn default_min_rebalance() -> String { "0".to_string() }

/// Verified pools, target weights and the initial whitelist
#[derive(Debug, Clone, Deserialize)]
pub struct PoolsConfig {
    pub pool_a: String,
    pub pool_b: String,
    pub weight_a: u8,
    pub weight_b: u8,
    #[serde(default)]
    pub whitelist: Vec<String>,
}

impl AllocatorConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;

        Ok(config)
    }

    /// Apply environment overrides on top of file values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(owner) = std::env::var("ALLOCATOR_OWNER") {
            self.general.owner = owner;
        }
        if let Ok(state_file) = std::env::var("ALLOCATOR_STATE_FILE") {
            self.general.state_file = state_file;
        }
        if let Ok(weight_a) = std::env::var("ALLOCATOR_WEIGHT_A") {
            self.pools.weight_a = weight_a.parse().context("ALLOCATOR_WEIGHT_A is not 0-255")?;
        }
        if let Ok(weight_b) = std::env::var("ALLOCATOR_WEIGHT_B") {
            self.pools.weight_b = weight_b.parse().context("ALLOCATOR_WEIGHT_B is not 0-255")?;
        }
        Ok(())
    }

    /// Validate and convert into typed allocator settings
    pub fn to_settings(&self) -> Result<AllocatorSettings> {
        let weights = Weights::new(self.pools.weight_a, self.pools.weight_b)
            .context("Invalid [pools] weights")?;

        let whitelist = self
            .pools
            .whitelist
            .iter()
            .map(|p| parse_address("pools.whitelist", p))
            .collect::<Result<Vec<_>>>()?;

        let min_rebalance_amount = U256::from_str(self.general.min_rebalance_amount.trim())
            .with_context(|| {
                format!(
                    "Invalid general.min_rebalance_amount: {}",
                    self.general.min_rebalance_amount
                )
            })?;

        Ok(AllocatorSettings {
            owner: parse_address("general.owner", &self.general.owner)?,
            account: parse_address("general.account", &self.general.account)?,
            pool_a: parse_address("pools.pool_a", &self.pools.pool_a)?,
            pool_b: parse_address("pools.pool_b", &self.pools.pool_b)?,
            weights,
            whitelist,
            withdraw_mode: self.general.withdraw_mode,
            min_rebalance_amount,
        })
    }
}

/// Load `.env` (if present), the TOML file, and env overrides
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AllocatorConfig> {
    dotenv::dotenv().ok();
    let mut config = AllocatorConfig::load(path)?;
    config.apply_env_overrides()?;
    Ok(config)
}

fn parse_address(field: &str, value: &str) -> Result<Address> {
    Address::from_str(value.trim()).with_context(|| format!("Invalid {}: {}", field, value))
}
