//! x402 payment relay.
//!
//! Sits between buyers and merchants: answers unpaid content requests with a
//! 402 challenge, verifies native-coin payments on chain, forwards the
//! merchant's share minus the platform fee, and issues signed attestation
//! tokens that unlock content.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────────┐
//!                         │                      RELAY                            │
//!     Buyer request       │  ┌─────────┐    ┌──────────────┐    ┌─────────────┐  │
//!     ────────────────────┼─▶│  http   │───▶│    relay     │───▶│  payments   │  │
//!                         │  │ server  │    │ orchestrator │    │  verifier   │──┼──▶ Node (RPC)
//!                         │  └─────────┘    └──────┬───────┘    └─────────────┘  │
//!                         │                        │                              │
//!                         │            ┌───────────┼─────────────┐               │
//!                         │            ▼           ▼             ▼               │
//!                         │      ┌──────────┐ ┌──────────┐ ┌────────────┐        │
//!                         │      │ catalog  │ │attestation│ │ forwarder  │────────┼──▶ Merchant
//!                         │      │ + ledger │ │  codec   │ │ + ledger   │        │
//!                         │      └──────────┘ └──────────┘ └─────▲──────┘        │
//!                         │                                      │               │
//!                         │      ┌──────────┐              ┌─────┴──────┐        │
//!     Chain blocks  ──────┼─────▶│ watcher  │              │ reconciler │        │
//!                         │      └──────────┘              └────────────┘        │
//!                         └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use x402_relay::config::load_config;
use x402_relay::lifecycle::{self, signals, Secrets, Shutdown};
use x402_relay::observability::{logging, metrics};

/// Grace period for background tasks after the server stops.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "x402-relay", version, about = "x402 payment relay")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config/relay.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(&args.config)?;
    logging::init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        bind_address = %config.listener.bind_address,
        network = %config.blockchain.network,
        chain_id = config.blockchain.chain_id,
        "x402-relay starting"
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

    let shutdown = Arc::new(Shutdown::new());
    let runtime = lifecycle::build(&config, &Secrets::from_env(), &shutdown).await?;
    let signal_task = signals::spawn_signal_handler(shutdown.clone());

    let mut background = Vec::new();
    if let Some(watcher) = runtime.watcher {
        background.push(tokio::spawn(watcher.run(shutdown.subscribe())));
    }
    if let Some(reconciler) = runtime.reconciler {
        background.push(tokio::spawn(reconciler.run(shutdown.subscribe())));
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let served = runtime.server.run(listener, shutdown.subscribe()).await;

    // The server can also stop on its own (I/O error); bring the rest down too.
    shutdown.trigger();
    signal_task.abort();

    for task in background {
        if tokio::time::timeout(DRAIN_TIMEOUT, task).await.is_err() {
            tracing::warn!("Background task did not stop before the drain deadline");
        }
    }

    if let Err(e) = runtime.ledger.save_to_file() {
        tracing::error!(error = %e, "Failed to persist forward ledger");
    }

    served?;
    tracing::info!("Shutdown complete");
    Ok(())
}
