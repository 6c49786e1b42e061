//! Two-Pool Yield Allocator CLI
//!
//! Commands:
//! - `plan`         compute the rebalance for given balances and weights (no state)
//! - `simulate`     run deposits + a rebalance against in-memory pools, persisting
//!                  the allocator snapshot between runs
//! - `show-config`  print the resolved settings

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pool_allocator::{
    load_config, AllocationEngine, AllocationReport, Allocator, AllocatorSnapshot,
    InMemoryCustody, InMemoryPoolService, LedgerBalances, PoolService, PoolSlot,
    StrandedResolution, Weights,
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Two-pool yield allocator
#[derive(Parser)]
#[command(name = "pool-allocator")]
struct Args {
    /// Log level when RUST_LOG is not set
    #[arg(long, env = "ALLOCATOR_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the transfer needed to bring balances to the target weights
    Plan {
        #[arg(long, value_parser = parse_amount)]
        balance_a: U256,
        #[arg(long, value_parser = parse_amount)]
        balance_b: U256,
        #[arg(long)]
        weight_a: u8,
        #[arg(long)]
        weight_b: u8,
    },
    /// Deposit into simulated pools, rebalance, and save the snapshot
    Simulate {
        #[arg(short, long, env = "ALLOCATOR_CONFIG", default_value = "config/allocator.toml")]
        config: PathBuf,
        /// Amount to deposit into pool A
        #[arg(long, default_value = "0", value_parser = parse_amount)]
        deposit_a: U256,
        /// Amount to deposit into pool B
        #[arg(long, default_value = "0", value_parser = parse_amount)]
        deposit_b: U256,
        /// New weight of pool A (owner action before rebalancing)
        #[arg(long, requires = "new_weight_b")]
        new_weight_a: Option<u8>,
        #[arg(long, requires = "new_weight_a")]
        new_weight_b: Option<u8>,
        /// Clear a stranded rebalance recorded in the snapshot (owner action)
        #[arg(long, value_enum)]
        resolve_stranded: Option<ResolveTarget>,
        /// Skip loading and saving the snapshot
        #[arg(long)]
        fresh: bool,
    },
    /// Print the resolved configuration
    ShowConfig {
        #[arg(short, long, env = "ALLOCATOR_CONFIG", default_value = "config/allocator.toml")]
        config: PathBuf,
    },
}

/// Where stranded funds were moved by hand
#[derive(Clone, Copy, ValueEnum)]
enum ResolveTarget {
    /// Back into the pool they were withdrawn from
    Source,
    /// Into the pool the rebalance was depositing into
    Destination,
}

impl From<ResolveTarget> for StrandedResolution {
    fn from(target: ResolveTarget) -> Self {
        match target {
            ResolveTarget::Source => StrandedResolution::ReturnedToSource,
            ResolveTarget::Destination => StrandedResolution::DepositedToDestination,
        }
    }
}

/// Principal used for simulated deposits
fn sim_depositor() -> Address {
    Address::repeat_byte(0xde)
}

fn parse_amount(s: &str) -> Result<U256, String> {
    U256::from_str(s.trim()).map_err(|e| format!("invalid amount '{}': {}", s, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    if args.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    match args.command {
        Command::Plan {
            balance_a,
            balance_b,
            weight_a,
            weight_b,
        } => {
            let weights = Weights::new(weight_a, weight_b)?;
            let report = AllocationEngine::default()
                .report(LedgerBalances::new(balance_a, balance_b), weights)?;
            print_report(&report);
        }
        Command::Simulate {
            config,
            deposit_a,
            deposit_b,
            new_weight_a,
            new_weight_b,
            resolve_stranded,
            fresh,
        } => {
            let new_weights = new_weight_a.zip(new_weight_b);
            simulate(
                &config,
                deposit_a,
                deposit_b,
                new_weights,
                resolve_stranded.map(StrandedResolution::from),
                fresh,
            )
            .await?
        }
        Command::ShowConfig { config } => {
            let config = load_config(&config)?;
            let settings = config.to_settings()?;
            println!("owner:          {}", settings.owner);
            println!("account:        {}", settings.account);
            println!("pool A:         {}", settings.pool_a);
            println!("pool B:         {}", settings.pool_b);
            println!("weights:        {}", settings.weights);
            println!("whitelist:      {} pools", settings.whitelist.len());
            println!("withdraw mode:  {:?}", settings.withdraw_mode);
            println!("min rebalance:  {}", settings.min_rebalance_amount);
            println!("state file:     {}", config.general.state_file);
        }
    }

    Ok(())
}

async fn simulate(
    config_path: &Path,
    deposit_a: U256,
    deposit_b: U256,
    new_weights: Option<(u8, u8)>,
    resolution: Option<StrandedResolution>,
    fresh: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let settings = config.to_settings()?;
    let state_file = PathBuf::from(&config.general.state_file);
    info!("Configuration loaded from {}", config_path.display());

    let pools = Arc::new(InMemoryPoolService::new());
    let custody = Arc::new(InMemoryCustody::new());

    let allocator = if !fresh && state_file.exists() {
        let snapshot = AllocatorSnapshot::read_from_file(&state_file)?;
        let allocator =
            Allocator::from_snapshot(&snapshot, settings.clone(), pools.clone(), custody.clone())?;
        // Simulated pools start empty; seed them with what the ledger says they hold
        for slot in [PoolSlot::A, PoolSlot::B] {
            let pool = verified_pool(&allocator, slot);
            let held = allocator.ledger_balance(pool).await?;
            if !held.is_zero() {
                pools.deposit(pool, held).await?;
            }
        }
        allocator
    } else {
        Allocator::new(settings.clone(), pools.clone(), custody.clone())?
    };

    if let Some(resolution) = resolution {
        match allocator.resolve_stranded(settings.owner, resolution).await? {
            Some(record) => info!("Resolved stranded {} as {:?}", record.amount, resolution),
            None => info!("Nothing stranded to resolve"),
        }
    }

    if let Some((a, b)) = new_weights {
        allocator.set_weights(settings.owner, a, b).await?;
    }

    let total_deposit = deposit_a
        .checked_add(deposit_b)
        .context("Deposit amounts overflow")?;
    custody.mint(sim_depositor(), total_deposit);
    for (slot, amount) in [(PoolSlot::A, deposit_a), (PoolSlot::B, deposit_b)] {
        if amount.is_zero() {
            continue;
        }
        let pool = verified_pool(&allocator, slot);
        allocator.add_liquidity(sim_depositor(), pool, amount).await?;
    }

    let mut stranded = None;
    match allocator.rebalance().await {
        Ok(Some(outcome)) => info!("Rebalanced: {}", outcome.instruction),
        Ok(None) => info!("Already balanced"),
        Err(e) if e.is_stranded() => {
            error!("Rebalance left funds stranded: {}", e);
            stranded = Some(e);
        }
        Err(e) => warn!("Rebalance failed, state unchanged: {}", e),
    }

    print_report(&allocator.allocation_report().await?);

    if !fresh {
        if let Some(parent) = state_file.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        allocator.snapshot().await.write_to_file(&state_file)?;
        info!("Snapshot saved to {}", state_file.display());
    }

    // Saved first so the latch outlives this run
    if let Some(e) = stranded {
        return Err(e.into());
    }
    Ok(())
}

fn verified_pool(allocator: &Allocator, slot: PoolSlot) -> Address {
    allocator.verified_pools().pool(slot)
}

fn print_report(report: &AllocationReport) {
    println!("weights:   {}", report.weights);
    println!(
        "balances:  A={} ({}%)  B={} ({}%)  total={}",
        report.balances.a,
        report.current_a_percent(),
        report.balances.b,
        report.current_b_percent(),
        report.total
    );
    println!("ideal:     A={}  B={}", report.ideal.a, report.ideal.b);
    match &report.instruction {
        Some(ix) => println!("transfer:  {}", ix),
        None => println!("transfer:  none (balanced)"),
    }
}
