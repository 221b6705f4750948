//! # Rebalancer
//!
//! Command-line entry point of the pool rebalancing service.
//!
//! ```bash
//! cargo run --bin rebalancer -- serve
//! cargo run --bin rebalancer -- estimate 0xPair --target-ratio 1.2
//! ```
//!
//! `serve` runs the HTTP API plus periodic discovery until Ctrl+C.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use rsk_rebalancer::{
    accessor::{diagnose_contracts, ChainReader, RpcAccessor},
    api::{self, AppState},
    discovery::InitOutcome,
    estimator::RebalanceEstimate,
    registry::PoolRegistry,
    settings::Settings,
    types::conversions::{f64_to_decimal, string_to_address},
    utils::retry_with_backoff,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[derive(Parser)]
#[command(name = "rebalancer", version, about = "Rootstock liquidity pool rebalancer")]
struct Cli {
    /// Configuration file (TOML). Missing file means defaults plus env.
    #[arg(long, default_value = "Config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API and run discovery periodically.
    Serve,
    /// Scan the factory once and print every pool.
    Discover,
    /// Live ratio of one pair.
    Status { pair: String },
    /// Rebalance estimate for one pair.
    Estimate {
        pair: String,
        #[arg(long)]
        target_ratio: Option<f64>,
    },
    /// Check the configured contract addresses for bytecode.
    Diagnose,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let settings = Settings::from_file(&cli.config)?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(settings.log.level.as_str())).init();

    #[cfg(feature = "observability")]
    if let Some(addr) = &settings.server.metrics_addr {
        rsk_rebalancer::metrics::install_prometheus(addr.parse().context("invalid server.metrics_addr")?)?;
    }

    let reader = Arc::new(RpcAccessor::from_settings(&settings)?);
    wait_for_node(reader.as_ref(), settings.rpc.chain_id).await?;

    match cli.command {
        Command::Serve => serve(settings, reader).await,
        Command::Discover => discover(&settings, reader).await,
        Command::Status { pair } => status(&settings, reader, &pair).await,
        Command::Estimate { pair, target_ratio } => estimate(&settings, reader, &pair, target_ratio).await,
        Command::Diagnose => diagnose(&settings, reader).await,
    }
}

/// Start-up is the one place the node is retried: it may still be booting.
async fn wait_for_node(reader: &RpcAccessor, expected_chain: u64) -> Result<()> {
    let chain_id = retry_with_backoff(Duration::from_millis(500), 5, || reader.chain_id())
        .await
        .context("RPC node unreachable")?;
    if chain_id != expected_chain {
        log::warn!(
            "Node reports chain id {}, configuration says {}",
            chain_id,
            expected_chain
        );
    }
    println!("{} connected to chain {}", "✓".green(), chain_id);
    Ok(())
}

async fn serve(settings: Settings, reader: Arc<RpcAccessor>) -> Result<()> {
    let registry = Arc::new(PoolRegistry::from_settings(&settings.registry)?);
    let state = AppState::build(&settings, reader, registry.clone())?;

    let discovery = state
        .init
        .clone()
        .spawn_periodic(Duration::from_secs(settings.discovery.interval_seconds.max(1)));
    let bind_addr = settings.server.bind_addr.clone();
    let server = tokio::spawn(async move { api::serve(state, &bind_addr).await });

    tokio::select! {
        res = server => {
            discovery.abort();
            res??;
        }
        _ = signal::ctrl_c() => {
            println!("\n{}", "Shutdown signal received".yellow());
            discovery.abort();
        }
    }

    if let Err(e) = registry.save() {
        log::warn!("Final registry save failed: {}", e);
    }
    Ok(())
}

async fn discover(settings: &Settings, reader: Arc<RpcAccessor>) -> Result<()> {
    let registry = Arc::new(PoolRegistry::from_settings(&settings.registry)?);
    let state = AppState::build(settings, reader, registry.clone())?;

    match state.init.run(true).await? {
        InitOutcome::Completed { report } => {
            println!(
                "{} scanned {} of {} pairs ({} new, {} failed)",
                "✓".green(),
                report.scanned,
                report.total_pairs,
                report.discovered,
                report.failed.len()
            );
        }
        InitOutcome::Skipped { skip } => println!("{} skipped: {:?}", "!".yellow(), skip),
    }

    for pool in registry.get_all_pools() {
        let flag = if pool.needs_rebalancing {
            "IMBALANCED".red().bold()
        } else {
            "ok".green()
        };
        println!(
            "{:?}  {}/{}  ratio {:.6}  target {}  tvl {:.4}  {}",
            pool.address, pool.token_a.symbol, pool.token_b.symbol, pool.current_ratio, pool.target_ratio, pool.tvl, flag
        );
    }
    Ok(())
}

async fn status(settings: &Settings, reader: Arc<RpcAccessor>, pair: &str) -> Result<()> {
    let pair = string_to_address(pair)?;
    let registry = Arc::new(PoolRegistry::new());
    let state = AppState::build(settings, reader, registry)?;
    let pool = state.init.discovery().refresh_pool(pair).await?;

    println!("{} {:?}", "Pool".bold(), pool.address);
    println!("  {:<10} {} ({})", "token A", pool.token_a.symbol, pool.reserve_a);
    println!("  {:<10} {} ({})", "token B", pool.token_b.symbol, pool.reserve_b);
    println!("  {:<10} {}", "ratio", pool.current_ratio);
    println!("  {:<10} {}", "target", pool.target_ratio);
    println!("  {:<10} {}", "tvl", pool.tvl);
    let verdict = if pool.needs_rebalancing {
        "needs rebalancing".red()
    } else {
        "within threshold".green()
    };
    println!("  {}", verdict);
    Ok(())
}

async fn estimate(settings: &Settings, reader: Arc<RpcAccessor>, pair: &str, target: Option<f64>) -> Result<()> {
    let pair = string_to_address(pair)?;
    let registry = Arc::new(PoolRegistry::new());
    let state = AppState::build(settings, reader, registry)?;
    let target = target.map(f64_to_decimal).transpose()?;
    let est = state.estimator.estimate(pair, target).await?;
    print_estimate(&est);
    Ok(())
}

fn print_estimate(est: &RebalanceEstimate) {
    println!(
        "{} {:?} ({}/{})",
        "Estimate".bold(),
        est.pool,
        est.token_a.symbol,
        est.token_b.symbol
    );
    println!("  ratio {} -> target {}", est.current_ratio, est.target_ratio);
    match est.swap_leg() {
        Some((from, to, amount)) => println!("  sell {} {} for {}", amount, from.symbol, to.symbol),
        None => println!("  no swap proposed"),
    }
    println!("  price impact {}%", est.price_impact_pct.round_dp(4));
    println!(
        "  gas {} (cost {} wei)",
        est.estimated_gas,
        est.estimated_cost_wei.as_deref().unwrap_or("unknown")
    );
    if est.can_rebalance {
        println!("  {}", "can rebalance".green());
    } else {
        println!(
            "  {} {}",
            "cannot rebalance:".red(),
            est.reason.as_deref().unwrap_or_default()
        );
    }
}

async fn diagnose(settings: &Settings, reader: Arc<RpcAccessor>) -> Result<()> {
    for diag in diagnose_contracts(reader.as_ref(), &settings.contracts).await {
        let mark = if diag.deployed { "✓".green() } else { "✗".red() };
        println!(
            "{} {:<11} {}  {}",
            mark,
            diag.name,
            diag.address,
            diag.error.unwrap_or_default()
        );
    }
    Ok(())
}
