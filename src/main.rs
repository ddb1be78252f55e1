//! Paywall watcher (v1)
//!
//! Gates content behind on-chain payments: watches a live notification feed
//! and reports, per registered address, whether the required amount has been
//! paid since the paywall's threshold time.
//!
//! # Architecture Overview
//!
//! ```text
//!   Notification feed (WebSocket)          Indexer (HTTP)
//!            │                                   ▲
//!            ▼                                   │ full tx set
//!   ┌──────────────────┐   events   ┌────────────┴───────────┐
//!   │ subscription     │──────────▶ │ paywall engine         │
//!   │ client           │            │  registry + per-address│
//!   │  reconnect/topics│◀───────────│  workers               │
//!   └──────────────────┘  address   └────────────┬───────────┘
//!                         topics                 │ AggregateResult
//!                                                ▼
//!                                            observer
//!
//!   Cross-cutting: config · observability · resilience · lifecycle
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use paywall_watcher::config::{load_config, WatcherConfig};
use paywall_watcher::lifecycle::{self, signals};
use paywall_watcher::lookup::HttpTxLookup;
use paywall_watcher::observability::{logging, metrics};
use paywall_watcher::AggregateResult;

#[derive(Parser, Debug)]
#[command(name = "paywall-watcher", version, about = "Watch a blockchain feed for paywall payments")]
struct Args {
    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override observability.log_level.
    #[arg(long)]
    log_level: Option<String>,
}

fn report(result: &AggregateResult) -> Result<(), paywall_watcher::paywall::ObserverError> {
    tracing::info!(
        address = %result.entry.address,
        total_paid = result.total_paid,
        required_amount = result.entry.required_amount,
        transactions = result.matching_transactions.len(),
        fulfilled = result.fulfilled,
        "Paywall status"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => WatcherConfig::default(),
    };
    if let Some(level) = args.log_level {
        config.observability.log_level = level;
    }

    logging::init_logging(&config.observability.log_level);
    tracing::info!("paywall-watcher v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        endpoint = %config.subscription.endpoint,
        indexer = %config.lookup.base_url,
        paywalls = config.paywalls.len(),
        remove_on_fulfillment = config.paywall.remove_on_fulfillment,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let lookup = Arc::new(HttpTxLookup::new(&config.lookup)?);
    let watcher = lifecycle::start(&config, lookup, report).await?;

    signals::wait_for_signal().await;

    tracing::info!(best_block = watcher.best_block().height(), "Shutting down");
    watcher.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
