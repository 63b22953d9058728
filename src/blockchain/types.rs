//! Chain-specific types and error definitions.

use alloy::primitives::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Re-export BlockchainConfig from config module to avoid duplication
pub use crate::config::schema::BlockchainConfig;

/// Chain ID type for strong typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId(pub u64);

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ChainId> for u64 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

/// Errors that can occur during blockchain operations.
#[derive(Debug, Clone, Error)]
pub enum BlockchainError {
    /// RPC connection or request failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    /// Transaction was not confirmed within expected time.
    #[error("Transaction not confirmed after {0} blocks")]
    ConfirmationTimeout(u32),

    /// Invalid private key format or derivation error.
    #[error("Wallet error: {0}")]
    Wallet(String),

    /// Gas price exceeded maximum allowed.
    #[error("Gas price {current_gwei} gwei exceeds maximum {max_gwei} gwei")]
    GasPriceTooHigh { current_gwei: u64, max_gwei: u64 },

    /// The relayer cannot fund a transfer.
    #[error("Relayer balance {balance} wei is below required {required} wei")]
    InsufficientBalance { balance: U256, required: U256 },

    /// Chain configuration mismatch.
    #[error("Chain ID mismatch: expected {expected}, got {actual}")]
    ChainMismatch { expected: u64, actual: u64 },

    /// Outbound writer stopped or signing is not configured.
    #[error("Blockchain not available: {0}")]
    NotAvailable(String),
}

impl BlockchainError {
    /// Whether the error is a node availability problem rather than an answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Timeout(_))
    }
}

/// Result type for blockchain operations.
pub type BlockchainResult<T> = Result<T, BlockchainError>;

/// Transaction confirmation status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationStatus {
    /// Transaction is pending in mempool (no receipt yet).
    Pending,
    /// Transaction has been mined but not enough confirmations.
    Confirming { current: u32, required: u32 },
    /// Transaction is confirmed with required block depth.
    Confirmed { block_number: u64, confirmations: u32 },
    /// Transaction executed with a failure status.
    Failed(String),
}

impl ConfirmationStatus {
    /// Derive a status from a receipt's execution result and inclusion height.
    ///
    /// The inclusion block counts as the first confirmation.
    pub fn from_receipt(success: bool, tx_block: u64, head: u64, required: u32) -> Self {
        if !success {
            return Self::Failed("Transaction reverted".to_string());
        }
        let confirmations = u32::try_from(head.saturating_sub(tx_block).saturating_add(1))
            .unwrap_or(u32::MAX);
        if confirmations >= required {
            Self::Confirmed {
                block_number: tx_block,
                confirmations,
            }
        } else {
            Self::Confirming {
                current: confirmations,
                required,
            }
        }
    }
}

/// Read-only view of a transaction as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTransaction {
    pub hash: TxHash,
    pub from: Address,
    /// `None` for contract creations.
    pub to: Option<Address>,
    /// Value in wei.
    pub value: U256,
    /// Inclusion height, `None` while in the mempool.
    pub block_number: Option<u64>,
}

impl ChainTransaction {
    /// Whether the transaction has been included in a block.
    pub fn is_included(&self) -> bool {
        self.block_number.is_some()
    }

    /// Case-insensitive check that the transaction pays `address`.
    pub fn is_addressed_to(&self, address: &str) -> bool {
        self.to
            .map(|to| to.to_string().eq_ignore_ascii_case(address))
            .unwrap_or(false)
    }
}

/// A block and (optionally) its full transactions.
#[derive(Debug, Clone, Default)]
pub struct ChainBlock {
    pub number: u64,
    pub transactions: Vec<ChainTransaction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_conversion() {
        let chain_id = ChainId::from(56u64);
        assert_eq!(chain_id.0, 56);
        assert_eq!(u64::from(chain_id), 56);
    }

    #[test]
    fn test_default_config() {
        let config = BlockchainConfig::default();
        assert_eq!(config.rpc_timeout_secs, 10);
        assert_eq!(config.confirmation_blocks, 1);
        assert_eq!(config.network, "bsc");
    }

    #[test]
    fn test_error_display() {
        let err = BlockchainError::Timeout(10);
        assert_eq!(err.to_string(), "RPC timeout after 10 seconds");
        assert!(err.is_transient());

        let err = BlockchainError::GasPriceTooHigh {
            current_gwei: 600,
            max_gwei: 500,
        };
        assert!(err.to_string().contains("600"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_inclusion_block_counts_as_confirmation() {
        assert_eq!(
            ConfirmationStatus::from_receipt(true, 100, 100, 1),
            ConfirmationStatus::Confirmed {
                block_number: 100,
                confirmations: 1
            }
        );
        assert_eq!(
            ConfirmationStatus::from_receipt(true, 100, 101, 3),
            ConfirmationStatus::Confirming {
                current: 2,
                required: 3
            }
        );
        assert!(matches!(
            ConfirmationStatus::from_receipt(false, 100, 120, 1),
            ConfirmationStatus::Failed(_)
        ));
    }

    #[test]
    fn test_recipient_compare_ignores_case() {
        let to: Address = "0xd3ecf2aac5588b445a1fe7a8194bb0f806685275".parse().unwrap();
        let tx = ChainTransaction {
            hash: TxHash::ZERO,
            from: Address::ZERO,
            to: Some(to),
            value: U256::from(1u64),
            block_number: None,
        };
        assert!(tx.is_addressed_to("0xD3ECF2AAC5588B445A1FE7A8194BB0F806685275"));
        assert!(!tx.is_addressed_to("0xd24a482e965dd2aec07539f36ac0fc7335f4c78d"));
        assert!(!tx.is_included());
    }
}
