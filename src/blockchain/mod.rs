//! Blockchain integration subsystem.
//!
//! # Data Flow
//! ```text
//! Environment Variables (private key, RPC URL)
//!     → wallet.rs (key loading, nonce bookkeeping)
//!     → client.rs (RPC connection with timeouts and failover)
//!     → reader.rs (ChainReader trait, bounded confirmation waits)
//!     → transaction.rs (build, sign, broadcast through one writer)
//! ```
//!
//! # Security Constraints
//! - Private keys ONLY from environment variables
//! - Never log private keys or sensitive data
//! - All RPC calls have configurable timeouts
//! - Graceful degradation when blockchain unreachable

pub mod client;
pub mod reader;
pub mod transaction;
pub mod types;
pub mod wallet;

#[cfg(test)]
pub(crate) mod mock;

pub use client::BlockchainClient;
pub use reader::{wait_for_confirmation, ChainReader};
pub use transaction::{OutboundQueue, TransferSubmitter};
pub use types::{
    BlockchainConfig, BlockchainError, BlockchainResult, ChainBlock, ChainId, ChainTransaction,
    ConfirmationStatus,
};
pub use wallet::Wallet;
