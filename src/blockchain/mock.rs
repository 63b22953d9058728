//! Scripted in-memory chain used by unit tests.

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::blockchain::reader::ChainReader;
use crate::blockchain::transaction::TransferSubmitter;
use crate::blockchain::types::{
    BlockchainError, BlockchainResult, ChainBlock, ChainTransaction, ConfirmationStatus,
};

struct Entry {
    tx: ChainTransaction,
    success: bool,
}

#[derive(Default)]
pub struct MockChain {
    head: AtomicU64,
    entries: Mutex<Vec<Entry>>,
    failures: AtomicU32,
    block_failures: Mutex<Vec<u64>>,
}

impl MockChain {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            ..Default::default()
        }
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn insert_transaction(&self, tx: ChainTransaction, success: bool) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|e| e.tx.hash != tx.hash);
        entries.push(Entry { tx, success });
    }

    /// Include a previously pending transaction at `block`.
    pub fn include(&self, hash: TxHash, block: u64) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.tx.hash == hash) {
            entry.tx.block_number = Some(block);
        }
    }

    /// Make the next `n` reads fail with an RPC error.
    pub fn fail_next_reads(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Make `get_block(height)` fail once.
    pub fn fail_block_once(&self, height: u64) {
        self.block_failures.lock().unwrap().push(height);
    }

    pub fn transactions_to(&self, to: Address) -> Vec<ChainTransaction> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.tx.to == Some(to))
            .map(|e| e.tx.clone())
            .collect()
    }

    fn check_failure(&self) -> BlockchainResult<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BlockchainError::Rpc("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn block_number(&self) -> BlockchainResult<u64> {
        self.check_failure()?;
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_transaction(&self, hash: TxHash) -> BlockchainResult<Option<ChainTransaction>> {
        self.check_failure()?;
        let entries = self.entries.lock().unwrap();
        Ok(entries.iter().find(|e| e.tx.hash == hash).map(|e| e.tx.clone()))
    }

    async fn get_receipt(&self, hash: TxHash, min_confirmations: u32) -> BlockchainResult<ConfirmationStatus> {
        self.check_failure()?;
        let head = self.head.load(Ordering::SeqCst);
        let entries = self.entries.lock().unwrap();
        let status = match entries.iter().find(|e| e.tx.hash == hash) {
            Some(Entry { tx, success }) => match tx.block_number {
                Some(block) if block <= head => {
                    ConfirmationStatus::from_receipt(*success, block, head, min_confirmations)
                }
                _ => ConfirmationStatus::Pending,
            },
            None => ConfirmationStatus::Pending,
        };
        Ok(status)
    }

    async fn get_block(&self, height: u64, include_transactions: bool) -> BlockchainResult<Option<ChainBlock>> {
        self.check_failure()?;
        {
            let mut failing = self.block_failures.lock().unwrap();
            if let Some(pos) = failing.iter().position(|h| *h == height) {
                failing.remove(pos);
                return Err(BlockchainError::Timeout(1));
            }
        }
        if height > self.head.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let transactions = if include_transactions {
            self.entries
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.tx.block_number == Some(height))
                .map(|e| e.tx.clone())
                .collect()
        } else {
            Vec::new()
        };
        Ok(Some(ChainBlock {
            number: height,
            transactions,
        }))
    }
}

/// Records transfers and mines them into a linked [`MockChain`].
pub struct MockSubmitter {
    chain: Arc<MockChain>,
    sender: Address,
    counter: AtomicU64,
    transfers: Mutex<Vec<(Address, U256)>>,
    delay: Duration,
    fail: AtomicU32,
    time_out: AtomicU32,
    revert: std::sync::atomic::AtomicBool,
}

impl MockSubmitter {
    pub fn new(chain: Arc<MockChain>, sender: Address) -> Self {
        Self {
            chain,
            sender,
            counter: AtomicU64::new(0),
            transfers: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            fail: AtomicU32::new(0),
            time_out: AtomicU32::new(0),
            revert: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_next(&self, n: u32) {
        self.fail.store(n, Ordering::SeqCst);
    }

    /// The next `n` transfers reach the chain but the caller sees a timeout.
    pub fn time_out_next(&self, n: u32) {
        self.time_out.store(n, Ordering::SeqCst);
    }

    pub fn revert_transfers(&self, revert: bool) {
        self.revert.store(revert, Ordering::SeqCst);
    }

    pub fn transfers(&self) -> Vec<(Address, U256)> {
        self.transfers.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferSubmitter for MockSubmitter {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn submit_transfer(&self, to: Address, value: U256) -> BlockchainResult<TxHash> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let remaining = self.fail.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail.store(remaining - 1, Ordering::SeqCst);
            return Err(BlockchainError::Rpc("broadcast rejected".to_string()));
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut bytes = [0xeeu8; 32];
        bytes[24..].copy_from_slice(&n.to_be_bytes());
        let hash = TxHash::from(bytes);

        self.transfers.lock().unwrap().push((to, value));
        let head = self.chain.head.load(Ordering::SeqCst);
        self.chain.insert_transaction(
            ChainTransaction {
                hash,
                from: self.sender,
                to: Some(to),
                value,
                block_number: Some(head),
            },
            !self.revert.load(Ordering::SeqCst),
        );

        let timeouts = self.time_out.load(Ordering::SeqCst);
        if timeouts > 0 {
            self.time_out.store(timeouts - 1, Ordering::SeqCst);
            return Err(BlockchainError::Timeout(30));
        }
        Ok(hash)
    }
}
