//! Outbound transfers from the relayer account.
//!
//! # Responsibilities
//! - Build native-coin transfers with gas ceilings and explicit nonces
//! - Serialize every outbound transaction through a single writer task so
//!   nonces are allocated in order
//! - Broadcast and hand the hash back to the caller
//!
//! # Data Flow
//! ```text
//! FundForwarder ──submit_transfer──▶ OutboundQueue (mpsc)
//!                                       │
//!                                       ▼
//!                                 OutboundWorker ── build (nonce, gas) ── sign ── broadcast
//!                                       │
//!                  oneshot reply ◀──────┘
//! ```

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::blockchain::client::BlockchainClient;
use crate::blockchain::types::{BlockchainError, BlockchainResult};
use crate::blockchain::wallet::Wallet;

/// Gas for a plain value transfer.
const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Sends value from the relayer account.
#[async_trait]
pub trait TransferSubmitter: Send + Sync {
    /// Address funds are sent from.
    fn sender(&self) -> Address;

    /// Sign and broadcast a transfer; returns once the node accepted it.
    async fn submit_transfer(&self, to: Address, value: U256) -> BlockchainResult<TxHash>;
}

/// Transaction builder for relayer transfers.
pub struct TxBuilder {
    client: BlockchainClient,
    wallet: Wallet,
}

impl TxBuilder {
    pub fn new(client: BlockchainClient, wallet: Wallet) -> Self {
        Self { client, wallet }
    }

    /// Build a transfer request with nonce reservation and gas checks.
    pub async fn build_transfer(&self, to: Address, value: U256) -> BlockchainResult<TransactionRequest> {
        let gas_price = self.client.get_gas_price().await?;
        let gas_price_gwei = gas_price / 1_000_000_000;

        let config = self.client.config();
        if gas_price_gwei > u128::from(config.max_gas_price_gwei) {
            return Err(BlockchainError::GasPriceTooHigh {
                current_gwei: u64::try_from(gas_price_gwei).unwrap_or(u64::MAX),
                max_gwei: config.max_gas_price_gwei,
            });
        }

        // Apply multiplier for safety margin
        let adjusted_gas_price = (gas_price as f64 * config.gas_price_multiplier) as u128;

        let balance = self.client.get_balance(self.wallet.address()).await?;
        ensure_covers(balance, value, adjusted_gas_price)?;

        let chain_nonce = self.client.get_pending_nonce(self.wallet.address()).await?;
        let nonce = self.wallet.reserve_nonce(chain_nonce);

        Ok(TransactionRequest::default()
            .with_from(self.wallet.address())
            .with_to(to)
            .with_value(value)
            .with_nonce(nonce)
            .with_gas_price(adjusted_gas_price)
            .with_chain_id(self.wallet.chain_id())
            .with_gas_limit(TRANSFER_GAS_LIMIT))
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }
}

/// Value plus the most a plain transfer can spend on gas.
pub fn transfer_cost(value: U256, gas_price: u128) -> U256 {
    value.saturating_add(U256::from(gas_price).saturating_mul(U256::from(TRANSFER_GAS_LIMIT)))
}

fn ensure_covers(balance: U256, value: U256, gas_price: u128) -> BlockchainResult<()> {
    let required = transfer_cost(value, gas_price);
    if balance < required {
        return Err(BlockchainError::InsufficientBalance { balance, required });
    }
    Ok(())
}

struct OutboundRequest {
    to: Address,
    value: U256,
    reply: oneshot::Sender<BlockchainResult<TxHash>>,
}

/// Handle to the single outbound writer.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<OutboundRequest>,
    sender: Address,
}

impl OutboundQueue {
    /// Spawn the writer task for `wallet`, broadcasting through `rpc_url`.
    pub fn spawn(client: BlockchainClient, wallet: Wallet, capacity: usize) -> BlockchainResult<Self> {
        let url: url::Url = client.config().rpc_url.parse().map_err(|e| {
            BlockchainError::Rpc(format!("Invalid RPC URL '{}': {}", client.config().rpc_url, e))
        })?;
        let signing_provider: Arc<dyn Provider + Send + Sync> =
            Arc::new(ProviderBuilder::new().wallet(wallet.ethereum_wallet()).connect_http(url));
        let broadcast_timeout = Duration::from_secs(client.config().rpc_timeout_secs);

        let sender = wallet.address();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = OutboundWorker {
            builder: TxBuilder::new(client.clone(), wallet.clone()),
            client,
            wallet,
            provider: signing_provider,
            broadcast_timeout,
        };
        tokio::spawn(worker.run(rx));

        tracing::info!(sender = %sender, "Outbound transfer queue started");
        Ok(Self { tx, sender })
    }
}

#[async_trait]
impl TransferSubmitter for OutboundQueue {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn submit_transfer(&self, to: Address, value: U256) -> BlockchainResult<TxHash> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(OutboundRequest { to, value, reply })
            .await
            .map_err(|_| BlockchainError::NotAvailable("outbound queue closed".to_string()))?;
        response
            .await
            .map_err(|_| BlockchainError::NotAvailable("outbound worker dropped request".to_string()))?
    }
}

struct OutboundWorker {
    builder: TxBuilder,
    client: BlockchainClient,
    wallet: Wallet,
    provider: Arc<dyn Provider + Send + Sync>,
    broadcast_timeout: Duration,
}

impl OutboundWorker {
    async fn run(self, mut rx: mpsc::Receiver<OutboundRequest>) {
        while let Some(request) = rx.recv().await {
            let result = self.send(request.to, request.value).await;
            if request.reply.send(result).is_err() {
                tracing::warn!(to = %request.to, "Transfer requester went away before reply");
            }
        }
        tracing::info!("Outbound transfer queue stopped");
    }

    async fn send(&self, to: Address, value: U256) -> BlockchainResult<TxHash> {
        let request = self.builder.build_transfer(to, value).await?;
        let nonce = request.nonce;

        match timeout(self.broadcast_timeout, self.provider.send_transaction(request)).await {
            Ok(Ok(pending)) => {
                let hash = *pending.tx_hash();
                tracing::info!(tx_hash = %hash, to = %to, value = %value, nonce = ?nonce, "Transfer broadcast");
                Ok(hash)
            }
            Ok(Err(e)) => {
                tracing::error!(to = %to, error = %e, "Broadcast rejected, resyncing nonce");
                self.resync_nonce().await;
                Err(BlockchainError::Rpc(format!("broadcast failed: {}", e)))
            }
            Err(_) => Err(BlockchainError::Timeout(self.broadcast_timeout.as_secs())),
        }
    }

    async fn resync_nonce(&self) {
        match self.client.get_pending_nonce(self.wallet.address()).await {
            Ok(nonce) => self.wallet.set_nonce(nonce),
            Err(e) => tracing::warn!(error = %e, "Nonce resync failed"),
        }
    }
}
