//! Read-side view of the ledger.
//!
//! # Responsibilities
//! - Abstract the node behind a trait so verification, forwarding and the
//!   watcher can be driven by a scripted chain in tests
//! - Bounded confirmation waiting shared by the verifier and the forwarder
//!
//! # Design Decisions
//! - `Ok(None)` from `get_transaction` means "not propagated yet", not invalid
//! - Transient node errors inside a confirmation window are retried until the
//!   deadline; only the deadline itself produces `ConfirmationTimeout`

use alloy::primitives::TxHash;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::blockchain::types::{BlockchainError, BlockchainResult, ChainBlock, ChainTransaction, ConfirmationStatus};

/// Queries against a blockchain node. The only component that reads the ledger.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Current head height.
    async fn block_number(&self) -> BlockchainResult<u64>;

    /// Fetch a transaction by hash.
    async fn get_transaction(&self, hash: TxHash) -> BlockchainResult<Option<ChainTransaction>>;

    /// Fetch the receipt and classify it against `min_confirmations`.
    async fn get_receipt(&self, hash: TxHash, min_confirmations: u32) -> BlockchainResult<ConfirmationStatus>;

    /// Fetch a block, with full transactions when `include_transactions` is set.
    async fn get_block(&self, height: u64, include_transactions: bool) -> BlockchainResult<Option<ChainBlock>>;
}

/// Poll until `hash` reaches `min_confirmations`, fails, or `max_wait` elapses.
///
/// Returns `Confirmed` or `Failed`; the deadline yields
/// `BlockchainError::ConfirmationTimeout`.
pub async fn wait_for_confirmation(
    reader: &dyn ChainReader,
    hash: TxHash,
    min_confirmations: u32,
    max_wait: Duration,
    poll_interval: Duration,
) -> BlockchainResult<ConfirmationStatus> {
    let result = timeout(max_wait, async {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match reader.get_receipt(hash, min_confirmations).await {
                Ok(status @ ConfirmationStatus::Confirmed { .. }) => return status,
                Ok(status @ ConfirmationStatus::Failed(_)) => return status,
                Ok(ConfirmationStatus::Pending) => {
                    tracing::debug!(tx_hash = %hash, "Transaction pending");
                }
                Ok(ConfirmationStatus::Confirming { current, required }) => {
                    tracing::debug!(
                        tx_hash = %hash,
                        confirmations = current,
                        required = required,
                        "Waiting for confirmations"
                    );
                }
                Err(e) => {
                    tracing::warn!(tx_hash = %hash, error = %e, "Receipt lookup failed, retrying");
                }
            }
        }
    })
    .await;

    match result {
        Ok(status) => Ok(status),
        Err(_) => Err(BlockchainError::ConfirmationTimeout(min_confirmations)),
    }
}
