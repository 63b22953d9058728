//! Shared utilities for integration testing: a scripted chain, a recording
//! submitter, and a relay served on an ephemeral port.

#![allow(dead_code)]

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use x402_relay::attestation::AttestationCodec;
use x402_relay::blockchain::{
    BlockchainResult, ChainBlock, ChainReader, ChainTransaction, ConfirmationStatus, TransferSubmitter,
};
use x402_relay::catalog::{InMemoryCatalog, InMemoryPaymentLedger};
use x402_relay::config::schema::{ListenerConfig, RateLimitConfig};
use x402_relay::config::{ContentEntry, ContentKind};
use x402_relay::http::{AppState, HttpServer};
use x402_relay::lifecycle::Shutdown;
use x402_relay::payments::challenge::ChallengeIssuer;
use x402_relay::payments::forwarder::{ForwardQueue, ForwarderSettings, FundForwarder};
use x402_relay::payments::ledger::ForwardLedger;
use x402_relay::payments::verifier::{ConfirmationPolicy, PaymentVerifier};
use x402_relay::relay::{RelayDeps, RelayOrchestrator};

pub const MILLI: u64 = 1_000_000_000_000_000;
pub const RELAYER: &str = "0xd3ecf2aac5588b445a1fe7a8194bb0f806685275";
pub const MERCHANT: &str = "0xd24a482e965dd2aec07539f36ac0fc7335f4c78d";
pub const BUYER: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const SECRET: &str = "integration-secret";

struct Entry {
    tx: ChainTransaction,
    success: bool,
}

/// In-memory chain whose head and transactions are set by the test.
#[derive(Default)]
pub struct ScriptedChain {
    head: AtomicU64,
    entries: Mutex<Vec<Entry>>,
}

impl ScriptedChain {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            ..Default::default()
        }
    }

    pub fn head(&self) -> u64 {
        self.head.load(Ordering::SeqCst)
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn insert(&self, tx: ChainTransaction, success: bool) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|e| e.tx.hash != tx.hash);
        entries.push(Entry { tx, success });
    }

    /// A transfer from [`BUYER`] of `wei`, included at `block`.
    pub fn pay(&self, seed: u8, to: &str, wei: U256, block: Option<u64>) -> TxHash {
        let hash = TxHash::repeat_byte(seed);
        self.insert(
            ChainTransaction {
                hash,
                from: BUYER.parse().unwrap(),
                to: Some(to.parse().unwrap()),
                value: wei,
                block_number: block,
            },
            true,
        );
        hash
    }

    pub fn include(&self, hash: TxHash, block: u64) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.tx.hash == hash) {
            entry.tx.block_number = Some(block);
        }
    }
}

#[async_trait]
impl ChainReader for ScriptedChain {
    async fn block_number(&self) -> BlockchainResult<u64> {
        Ok(self.head())
    }

    async fn get_transaction(&self, hash: TxHash) -> BlockchainResult<Option<ChainTransaction>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.iter().find(|e| e.tx.hash == hash).map(|e| e.tx.clone()))
    }

    async fn get_receipt(&self, hash: TxHash, min_confirmations: u32) -> BlockchainResult<ConfirmationStatus> {
        let head = self.head();
        let entries = self.entries.lock().unwrap();
        Ok(match entries.iter().find(|e| e.tx.hash == hash) {
            Some(Entry { tx, success }) => match tx.block_number {
                Some(block) if block <= head => {
                    ConfirmationStatus::from_receipt(*success, block, head, min_confirmations)
                }
                _ => ConfirmationStatus::Pending,
            },
            None => ConfirmationStatus::Pending,
        })
    }

    async fn get_block(&self, height: u64, include_transactions: bool) -> BlockchainResult<Option<ChainBlock>> {
        if height > self.head() {
            return Ok(None);
        }
        let transactions = if include_transactions {
            let entries = self.entries.lock().unwrap();
            entries
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

/// Records merchant transfers and mines them at the current head.
pub struct RecordingSubmitter {
    chain: Arc<ScriptedChain>,
    counter: AtomicU64,
    transfers: Mutex<Vec<(Address, U256)>>,
}

impl RecordingSubmitter {
    pub fn new(chain: Arc<ScriptedChain>) -> Self {
        Self {
            chain,
            counter: AtomicU64::new(0),
            transfers: Mutex::new(Vec::new()),
        }
    }

    pub fn transfers(&self) -> Vec<(Address, U256)> {
        self.transfers.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferSubmitter for RecordingSubmitter {
    fn sender(&self) -> Address {
        RELAYER.parse().unwrap()
    }

    async fn submit_transfer(&self, to: Address, value: U256) -> BlockchainResult<TxHash> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut bytes = [0xeeu8; 32];
        bytes[24..].copy_from_slice(&n.to_be_bytes());
        let hash = TxHash::from(bytes);

        self.transfers.lock().unwrap().push((to, value));
        self.chain.insert(
            ChainTransaction {
                hash,
                from: self.sender(),
                to: Some(to),
                value,
                block_number: Some(self.chain.head()),
            },
            true,
        );
        Ok(hash)
    }
}

pub fn entry(id: &str, price: &str, kind: ContentKind, data: Option<&str>) -> ContentEntry {
    ContentEntry {
        id: id.to_string(),
        title: format!("Title of {}", id),
        description: Some("integration content".to_string()),
        price: price.to_string(),
        merchant_address: MERCHANT.to_string(),
        content_type: kind,
        content_data: data.map(str::to_string),
        file_path: None,
        file_name: None,
        file_size: None,
        mime_type: None,
        is_active: true,
    }
}

pub fn default_catalog() -> Vec<ContentEntry> {
    vec![
        entry("guide", "0.001", ContentKind::Text, Some("the secret guide")),
        entry("report", "0.002", ContentKind::Api, Some("https://api.example.com/report")),
    ]
}

pub struct TestRelay {
    pub addr: SocketAddr,
    pub chain: Arc<ScriptedChain>,
    pub submitter: Arc<RecordingSubmitter>,
    pub ledger: Arc<ForwardLedger>,
    pub codec: AttestationCodec,
    pub shutdown: Arc<Shutdown>,
}

impl TestRelay {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn client(&self) -> sdk_rust::RelayClient {
        sdk_rust::RelayClient::new(&self.url())
    }

    /// Wait until the merchant transfer for one payment shows up.
    pub async fn wait_for_transfers(&self, count: usize) -> Vec<(Address, U256)> {
        for _ in 0..100 {
            let transfers = self.submitter.transfers();
            if transfers.len() >= count {
                return transfers;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.submitter.transfers()
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start a relay on `127.0.0.1:0` with `catalog`, a chain at `head`, and
/// one confirmation required.
pub async fn start_relay(catalog: Vec<ContentEntry>, head: u64) -> TestRelay {
    let chain = Arc::new(ScriptedChain::new(head));
    let submitter = Arc::new(RecordingSubmitter::new(chain.clone()));
    let ledger = Arc::new(ForwardLedger::new(None));
    let codec = AttestationCodec::new(SECRET, Duration::from_secs(3600)).unwrap();
    let shutdown = Arc::new(Shutdown::new());

    let reader: Arc<dyn ChainReader> = chain.clone();
    let forwarder = Arc::new(FundForwarder::new(
        Some(submitter.clone() as Arc<dyn TransferSubmitter>),
        reader.clone(),
        ledger.clone(),
        ForwarderSettings {
            fee_bps: 250,
            min_confirmations: 1,
            confirmation_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
        },
    ));
    let queue = ForwardQueue::spawn(forwarder.clone(), 16, shutdown.subscribe());
    let verifier = PaymentVerifier::new(
        reader.clone(),
        codec.clone(),
        ConfirmationPolicy {
            min_confirmations: 1,
            max_wait: Duration::from_millis(200),
            poll_interval: Duration::from_millis(20),
        },
    );

    let orchestrator = Arc::new(RelayOrchestrator::new(RelayDeps {
        catalog: Arc::new(InMemoryCatalog::from_entries(catalog)),
        payments: Arc::new(InMemoryPaymentLedger::new()),
        issuer: ChallengeIssuer::new("bsc"),
        verifier,
        codec: codec.clone(),
        forwarder,
        queue: Some(queue),
        relayer: RELAYER.parse().unwrap(),
        min_confirmations: 1,
    }));

    let server = HttpServer::new(
        &ListenerConfig::default(),
        &RateLimitConfig::default(),
        AppState {
            relay: orchestrator,
            chain: reader,
        },
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestRelay {
        addr,
        chain,
        submitter,
        ledger,
        codec,
        shutdown,
    }
}

pub fn wei(milli: u64) -> U256 {
    U256::from(milli) * U256::from(MILLI)
}
