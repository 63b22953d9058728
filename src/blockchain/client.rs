//! Blockchain RPC client with timeout and error handling.
//!
//! # Responsibilities
//! - Connect to JSON-RPC endpoints (primary + failovers)
//! - Query chain state (blocks, transactions, receipts, balances, nonces)
//! - Handle timeouts and network errors gracefully
//! - Provide health check for blockchain connectivity

use alloy::consensus::Transaction as ConsensusTransaction;
use alloy::eips::BlockNumberOrTag;
use alloy::network::TransactionResponse;
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Block, Transaction, TransactionReceipt};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::blockchain::reader::ChainReader;
use crate::blockchain::types::{
    BlockchainConfig, BlockchainError, BlockchainResult, ChainBlock, ChainId, ChainTransaction,
    ConfirmationStatus,
};
use crate::observability::metrics;

/// Blockchain RPC client wrapper with failover support.
#[derive(Clone)]
pub struct BlockchainClient {
    /// List of providers (primary + failovers).
    providers: Vec<Arc<dyn Provider + Send + Sync>>,
    config: BlockchainConfig,
    /// Per-call timeout.
    timeout_duration: Duration,
}

impl BlockchainClient {
    /// Create a new blockchain client.
    ///
    /// Creation succeeds even when the node is unreachable; chain ID
    /// verification failures are logged, not fatal.
    pub async fn new(config: BlockchainConfig) -> BlockchainResult<Self> {
        let timeout_duration = Duration::from_secs(config.rpc_timeout_secs);
        let mut providers = Vec::new();

        let primary_url: url::Url = config.rpc_url.parse().map_err(|e| {
            BlockchainError::Rpc(format!("Invalid RPC URL '{}': {}", config.rpc_url, e))
        })?;
        providers.push(Arc::new(ProviderBuilder::new().connect_http(primary_url)) as Arc<dyn Provider + Send + Sync>);

        for url_str in &config.failover_urls {
            if let Ok(url) = url_str.parse() {
                providers.push(Arc::new(ProviderBuilder::new().connect_http(url)) as Arc<dyn Provider + Send + Sync>);
            } else {
                tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL");
            }
        }

        let client = Self {
            providers,
            config: config.clone(),
            timeout_duration,
        };

        match client.verify_chain_id().await {
            Ok(()) => {
                tracing::info!(
                    rpc_url = %config.rpc_url,
                    chain_id = config.chain_id,
                    network = %config.network,
                    "Blockchain client initialized"
                );
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Blockchain client initialized but chain verification failed"
                );
            }
        }

        Ok(client)
    }

    /// Verify the connected chain ID matches configuration.
    pub async fn verify_chain_id(&self) -> BlockchainResult<()> {
        let chain_id = self.get_chain_id().await?;
        if chain_id.0 != self.config.chain_id {
            return Err(BlockchainError::ChainMismatch {
                expected: self.config.chain_id,
                actual: chain_id.0,
            });
        }
        Ok(())
    }

    pub async fn get_chain_id(&self) -> BlockchainResult<ChainId> {
        for (i, provider) in self.providers.iter().enumerate() {
            let fut = provider.get_chain_id();
            match timeout(self.timeout_duration, fut).await {
                Ok(Ok(result)) => return Ok(ChainId(result)),
                Ok(Err(e)) => {
                    tracing::warn!(provider_idx = i, error = %e, "RPC error, trying next provider");
                }
                Err(_) => {
                    tracing::warn!(provider_idx = i, "RPC timeout, trying next provider");
                }
            }
        }
        Err(BlockchainError::Rpc("All RPC providers failed".to_string()))
    }

    pub async fn get_block_number(&self) -> BlockchainResult<u64> {
        for (i, provider) in self.providers.iter().enumerate() {
            let fut = provider.get_block_number();
            match timeout(self.timeout_duration, fut).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => tracing::warn!(provider_idx = i, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, "RPC timeout"),
            }
        }
        Err(self.exhausted("block number"))
    }

    pub async fn get_balance(&self, address: Address) -> BlockchainResult<U256> {
        for (i, provider) in self.providers.iter().enumerate() {
            let fut = provider.get_balance(address);
            match timeout(self.timeout_duration, fut).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => tracing::warn!(provider_idx = i, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, "RPC timeout"),
            }
        }
        Err(self.exhausted("balance"))
    }

    /// Transaction count including the node's mempool view.
    pub async fn get_pending_nonce(&self, address: Address) -> BlockchainResult<u64> {
        for (i, provider) in self.providers.iter().enumerate() {
            let fut = provider.get_transaction_count(address).pending();
            match timeout(self.timeout_duration, fut).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => tracing::warn!(provider_idx = i, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, "RPC timeout"),
            }
        }
        Err(self.exhausted("transaction count"))
    }

    pub async fn get_transaction_by_hash(&self, tx_hash: TxHash) -> BlockchainResult<Option<Transaction>> {
        for (i, provider) in self.providers.iter().enumerate() {
            let fut = provider.get_transaction_by_hash(tx_hash);
            match timeout(self.timeout_duration, fut).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => tracing::warn!(provider_idx = i, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, "RPC timeout"),
            }
        }
        Err(self.exhausted("transaction"))
    }

    pub async fn get_transaction_receipt(
        &self,
        tx_hash: TxHash,
    ) -> BlockchainResult<Option<TransactionReceipt>> {
        for (i, provider) in self.providers.iter().enumerate() {
            let fut = provider.get_transaction_receipt(tx_hash);
            match timeout(self.timeout_duration, fut).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => tracing::warn!(provider_idx = i, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, "RPC timeout"),
            }
        }
        Err(self.exhausted("receipt"))
    }

    pub async fn get_block_by_number(&self, height: u64, full: bool) -> BlockchainResult<Option<Block>> {
        for (i, provider) in self.providers.iter().enumerate() {
            let request = provider.get_block_by_number(BlockNumberOrTag::Number(height));
            let fut = if full { request.full() } else { request };
            match timeout(self.timeout_duration, fut).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => tracing::warn!(provider_idx = i, block = height, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, block = height, "RPC timeout"),
            }
        }
        Err(self.exhausted("block"))
    }

    /// Current gas price in wei.
    pub async fn get_gas_price(&self) -> BlockchainResult<u128> {
        for (i, provider) in self.providers.iter().enumerate() {
            let fut = provider.get_gas_price();
            match timeout(self.timeout_duration, fut).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => tracing::warn!(provider_idx = i, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, "RPC timeout"),
            }
        }
        Err(self.exhausted("gas price"))
    }

    /// Returns true if we can query the block number.
    pub async fn is_healthy(&self) -> bool {
        let healthy = self.get_block_number().await.is_ok();
        metrics::record_chain_health(healthy);
        healthy
    }

    pub fn config(&self) -> &BlockchainConfig {
        &self.config
    }

    fn exhausted(&self, what: &str) -> BlockchainError {
        BlockchainError::Rpc(format!("All providers failed to get {}", what))
    }
}

fn to_chain_transaction(tx: &Transaction) -> ChainTransaction {
    ChainTransaction {
        hash: TransactionResponse::tx_hash(tx),
        from: TransactionResponse::from(tx),
        to: ConsensusTransaction::to(tx),
        value: ConsensusTransaction::value(tx),
        block_number: TransactionResponse::block_number(tx),
    }
}

#[async_trait]
impl ChainReader for BlockchainClient {
    async fn block_number(&self) -> BlockchainResult<u64> {
        self.get_block_number().await
    }

    async fn get_transaction(&self, hash: TxHash) -> BlockchainResult<Option<ChainTransaction>> {
        Ok(self
            .get_transaction_by_hash(hash)
            .await?
            .map(|tx| to_chain_transaction(&tx)))
    }

    async fn get_receipt(&self, hash: TxHash, min_confirmations: u32) -> BlockchainResult<ConfirmationStatus> {
        let receipt = match self.get_transaction_receipt(hash).await? {
            Some(r) => r,
            None => return Ok(ConfirmationStatus::Pending),
        };
        let head = self.get_block_number().await?;
        let tx_block = receipt.block_number.unwrap_or(head);
        Ok(ConfirmationStatus::from_receipt(
            receipt.status(),
            tx_block,
            head,
            min_confirmations,
        ))
    }

    async fn get_block(&self, height: u64, include_transactions: bool) -> BlockchainResult<Option<ChainBlock>> {
        let block = match self.get_block_by_number(height, include_transactions).await? {
            Some(b) => b,
            None => return Ok(None),
        };
        let transactions = block
            .transactions
            .as_transactions()
            .map(|txs| txs.iter().map(to_chain_transaction).collect())
            .unwrap_or_default();
        Ok(Some(ChainBlock {
            number: height,
            transactions,
        }))
    }
}

impl std::fmt::Debug for BlockchainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainClient")
            .field("rpc_url", &self.config.rpc_url)
            .field("chain_id", &self.config.chain_id)
            .field("timeout_secs", &self.config.rpc_timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> BlockchainConfig {
        BlockchainConfig {
            rpc_url: "http://localhost:8545".to_string(),
            chain_id: 31337, // Anvil default
            rpc_timeout_secs: 2,
            ..BlockchainConfig::default()
        }
    }

    #[tokio::test]
    async fn test_client_creation() {
        // Client creation should succeed even if RPC is unreachable
        let result = BlockchainClient::new(test_config()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_primary_url_rejected() {
        let mut config = test_config();
        config.rpc_url = "not a url".to_string();
        let err = BlockchainClient::new(config).await.unwrap_err();
        assert!(err.to_string().contains("Invalid RPC URL"));
    }

    #[tokio::test]
    async fn test_rpc_failover() {
        let mut config = test_config();
        config.failover_urls.push("http://invalid:8545".to_string());

        let client = BlockchainClient::new(config).await.unwrap();

        // Both endpoints are unreachable; every provider is tried.
        let result = client.get_chain_id().await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("All RPC providers failed"));
    }
}
