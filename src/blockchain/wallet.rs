//! Relayer wallet: signing key and nonce bookkeeping.
//!
//! # Security
//! - The private key is read ONLY from the environment
//! - Keys are never logged or serialized

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::blockchain::types::{BlockchainError, BlockchainResult};

/// Environment variable name for the relayer private key.
pub const PRIVATE_KEY_ENV_VAR: &str = "RELAYER_PRIVATE_KEY";

/// The relayer's signing identity with a shared local nonce counter.
#[derive(Debug, Clone)]
pub struct Wallet {
    signer: PrivateKeySigner,
    /// Next nonce this process will use.
    nonce: Arc<AtomicU64>,
    /// Chain ID for EIP-155 replay protection.
    chain_id: u64,
}

impl Wallet {
    /// Create a wallet from a hex-encoded private key (with or without `0x`).
    pub fn from_private_key(private_key_hex: &str, chain_id: u64) -> BlockchainResult<Self> {
        let key_hex = private_key_hex.trim();
        let key_hex = key_hex.strip_prefix("0x").unwrap_or(key_hex);

        let signer: PrivateKeySigner = key_hex
            .parse()
            .map_err(|e| BlockchainError::Wallet(format!("Invalid private key format: {}", e)))?;

        tracing::info!(
            address = %signer.address(),
            chain_id = chain_id,
            "Relayer wallet initialized"
        );

        Ok(Self {
            signer,
            nonce: Arc::new(AtomicU64::new(0)),
            chain_id,
        })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Signing wallet for a filler-enabled provider.
    pub fn ethereum_wallet(&self) -> EthereumWallet {
        EthereumWallet::from(self.signer.clone())
    }

    /// Reserve the next nonce given the node's pending count.
    ///
    /// Takes the larger of the chain view and the local counter so back-to-back
    /// transfers never reuse a nonce the node has not yet seen.
    pub fn reserve_nonce(&self, chain_pending: u64) -> u64 {
        let mut current = self.nonce.load(Ordering::SeqCst);
        loop {
            let next = current.max(chain_pending);
            match self.nonce.compare_exchange(current, next + 1, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    /// Set the nonce to a specific value (e.g. after a rejected broadcast).
    pub fn set_nonce(&self, nonce: u64) {
        self.nonce.store(nonce, Ordering::SeqCst);
    }

    pub fn current_nonce(&self) -> u64 {
        self.nonce.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known test private key (Anvil's first account)
    const TEST_PRIVATE_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_wallet_from_private_key() {
        let wallet = Wallet::from_private_key(TEST_PRIVATE_KEY, 56).unwrap();
        assert_eq!(
            wallet.address().to_string().to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        assert_eq!(wallet.chain_id(), 56);
    }

    #[test]
    fn test_wallet_with_0x_prefix() {
        let wallet = Wallet::from_private_key(&format!("0x{}", TEST_PRIVATE_KEY), 1).unwrap();
        assert_eq!(
            wallet.address().to_string().to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn test_nonce_reservation_prefers_higher_view() {
        let wallet = Wallet::from_private_key(TEST_PRIVATE_KEY, 1).unwrap();

        assert_eq!(wallet.reserve_nonce(5), 5);
        // Node has not seen nonce 5 yet; local counter wins.
        assert_eq!(wallet.reserve_nonce(5), 6);
        assert_eq!(wallet.current_nonce(), 7);
        // Node moved ahead (transactions sent elsewhere); chain wins.
        assert_eq!(wallet.reserve_nonce(20), 20);

        wallet.set_nonce(3);
        assert_eq!(wallet.reserve_nonce(0), 3);
    }

    #[test]
    fn test_invalid_private_key() {
        let result = Wallet::from_private_key("invalid_key", 1);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid private key"));
    }
}
