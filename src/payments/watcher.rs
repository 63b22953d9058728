//! Polls the chain for direct transfers to the relayer.
//!
//! # Data Flow
//! ```text
//! tick ──▶ block_number ──▶ get_block(cursor+1 ..= head+1-min_conf)
//!                                 │ tx.to == relayer, value > 0, unseen
//!                                 ▼
//!                           get_receipt ──▶ ObservedPaymentHandler
//! ```
//!
//! # Design Decisions
//! - The cursor only moves past a block once every matching transaction in
//!   it was handled; a node error ends the tick and the block is rescanned
//! - A transaction enters the processed set after its receipt was read, so a
//!   receipt error does not lose it
//! - Shutdown is checked between blocks, never inside one

use alloy::primitives::{Address, TxHash};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::blockchain::reader::ChainReader;
use crate::blockchain::types::{BlockchainError, ChainTransaction, ConfirmationStatus};
use crate::observability::metrics;

/// Receives confirmed transfers found by the watcher.
#[async_trait]
pub trait ObservedPaymentHandler: Send + Sync {
    async fn handle_observed(&self, tx: &ChainTransaction, content_id: &str, merchant: Address);
}

/// Scan position owned by one watcher.
#[derive(Debug, Default)]
pub struct WatcherState {
    /// Last fully scanned height.
    pub cursor: Option<u64>,
    pub processed: HashSet<TxHash>,
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub relayer: Address,
    pub merchant: Address,
    pub content_id: String,
    pub interval: Duration,
    pub lookback_blocks: u64,
    pub min_confirmations: u32,
}

/// How a tick ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Scanned up to the confirmed head.
    Completed { handled: usize },
    /// A node error stopped the scan early.
    Interrupted { handled: usize },
    ShutdownRequested,
}

pub struct ChainWatcher {
    reader: Arc<dyn ChainReader>,
    handler: Arc<dyn ObservedPaymentHandler>,
    settings: WatcherSettings,
    state: WatcherState,
}

impl ChainWatcher {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        handler: Arc<dyn ObservedPaymentHandler>,
        settings: WatcherSettings,
    ) -> Self {
        Self {
            reader,
            handler,
            settings,
            state: WatcherState::default(),
        }
    }

    pub fn state(&self) -> &WatcherState {
        &self.state
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            relayer = %self.settings.relayer,
            interval_ms = self.settings.interval.as_millis() as u64,
            "Chain watcher started"
        );
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.tick(&mut shutdown).await == TickOutcome::ShutdownRequested {
                        break;
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
        tracing::info!(cursor = ?self.state.cursor, "Chain watcher stopped");
    }

    pub async fn tick(&mut self, shutdown: &mut broadcast::Receiver<()>) -> TickOutcome {
        let head = match self.reader.block_number().await {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(error = %e, "Watcher could not read head");
                return TickOutcome::Interrupted { handled: 0 };
            }
        };

        let confirmed_head = match (head + 1).checked_sub(u64::from(self.settings.min_confirmations.max(1))) {
            Some(h) => h,
            None => return TickOutcome::Completed { handled: 0 },
        };
        let cursor = *self
            .state
            .cursor
            .get_or_insert_with(|| head.saturating_sub(self.settings.lookback_blocks));

        let mut handled = 0;
        for height in cursor + 1..=confirmed_head {
            if shutdown_requested(shutdown) {
                return TickOutcome::ShutdownRequested;
            }
            match self.scan_block(height).await {
                Ok(n) => {
                    handled += n;
                    self.state.cursor = Some(height);
                    metrics::record_watcher_block(height);
                }
                Err(e) => {
                    tracing::warn!(block = height, error = %e, "Watcher scan interrupted");
                    return TickOutcome::Interrupted { handled };
                }
            }
        }
        TickOutcome::Completed { handled }
    }

    async fn scan_block(&mut self, height: u64) -> Result<usize, BlockchainError> {
        let Some(block) = self.reader.get_block(height, true).await? else {
            return Err(BlockchainError::NotAvailable(format!("block {} not available", height)));
        };

        let mut handled = 0;
        for tx in &block.transactions {
            if tx.to != Some(self.settings.relayer)
                || tx.value.is_zero()
                || self.state.processed.contains(&tx.hash)
            {
                continue;
            }

            let status = self.reader.get_receipt(tx.hash, 1).await?;
            self.state.processed.insert(tx.hash);
            if let ConfirmationStatus::Failed(reason) = status {
                tracing::debug!(tx_hash = %tx.hash, reason = %reason, "Skipping failed transfer");
                continue;
            }

            tracing::info!(
                tx_hash = %tx.hash,
                from = %tx.from,
                block = height,
                "Observed direct payment"
            );
            self.handler
                .handle_observed(tx, &self.settings.content_id, self.settings.merchant)
                .await;
            handled += 1;
        }
        Ok(handled)
    }
}

fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}
