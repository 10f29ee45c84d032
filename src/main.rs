//! Binary entry point: wire configuration, clients, and workers together,
//! run the trade loop, and print the final report.

use anyhow::{Context, Result};
use clap::Parser;
use delta_cycler::account::AccountExecutor;
use delta_cycler::exchange::{AccountClient, DexClient, MarketDataApi};
use delta_cycler::market::{LeverageMode, MarketCatalog};
use delta_cycler::orchestrator::Orchestrator;
use delta_cycler::Config;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "delta-cycler")]
#[command(about = "Delta-neutral trade cycler across two exchange accounts")]
struct Cli {
    /// Path to a configuration file (optional; environment variables with
    /// the DC prefix always apply)
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        base_url = %config.exchange.base_url,
        markets = ?config.trading.market_whitelist,
        dynamic_leverage = config.trading.dynamic_leverage,
        max_trades = config.timing.max_trades,
        "Starting delta cycler"
    );

    let market_data: Arc<dyn MarketDataApi> = Arc::new(DexClient::new(&config.exchange)?);

    let leverage_mode = LeverageMode::from_config(&config.trading);
    let catalog = MarketCatalog::validate(
        market_data.as_ref(),
        &config.trading.market_whitelist,
        &leverage_mode,
    )
    .await?;
    info!(markets = catalog.len(), "Market catalog validated");

    let call_timeout = Duration::from_secs(config.execution.call_timeout_secs);
    let long_client = Arc::new(AccountClient::new(&config.exchange, &config.account_long)?);
    let short_client = Arc::new(AccountClient::new(&config.exchange, &config.account_short)?);
    let (long, long_worker) = AccountExecutor::spawn(
        "long",
        config.account_long.account_index,
        long_client,
        call_timeout,
    );
    let (short, short_worker) = AccountExecutor::spawn(
        "short",
        config.account_short.account_index,
        short_client,
        call_timeout,
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            return;
        }
        info!("Shutdown requested, closing open positions");
        shutdown_signal.store(true, Ordering::SeqCst);
    });

    let orchestrator = Orchestrator::new(
        config,
        catalog,
        market_data,
        long.clone(),
        short.clone(),
        shutdown,
    );
    let stats = orchestrator.stats();

    orchestrator.run().await?;

    // Dropping the handles closes the command channels; the workers drain
    // and exit on their own.
    drop(long);
    drop(short);
    long_worker.await?;
    short_worker.await?;

    info!("Run complete");
    for line in stats.lock().unwrap().summary_lines() {
        info!("{line}");
    }

    Ok(())
}
