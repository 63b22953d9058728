//! Payment protocol types.

use alloy::primitives::{TxHash, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attestation::AttestationClaim;

/// Protocol version advertised in every 402 body.
pub const X402_VERSION: u32 = 1;

/// Error text of the 402 body.
pub const PAYMENT_REQUIRED_MESSAGE: &str = "Payment required to access this content";

/// Longest accepted content identifier.
pub const MAX_CONTENT_ID_LEN: usize = 128;

/// Payment schemes. Only exact-amount native transfers exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentScheme {
    Exact,
}

/// What a client must pay to unlock one resource.
///
/// Derived from the catalog on every challenge; never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PaymentRequirement {
    pub scheme: PaymentScheme,
    pub network: String,
    /// Decimal native units.
    pub amount: String,
    /// Relayer address, lowercase hex.
    pub pay_to: String,
    pub resource: String,
    pub description: String,
    pub content_id: String,
}

/// The 402 response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredResponse {
    pub x402_version: u32,
    pub error: String,
    pub payment_required: PaymentRequirement,
}

impl PaymentRequiredResponse {
    pub fn new(requirement: PaymentRequirement) -> Self {
        Self {
            x402_version: X402_VERSION,
            error: PAYMENT_REQUIRED_MESSAGE.to_string(),
            payment_required: requirement,
        }
    }
}

/// Proof presented by a client after paying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentProof {
    /// Raw hash of the payment transaction.
    Transaction(TxHash),
    /// A previously issued attestation token.
    Attestation(String),
}

/// Parse a `0x`-prefixed 32-byte transaction hash.
pub fn parse_tx_hash(input: &str) -> Option<TxHash> {
    let input = input.trim();
    let hex = input.strip_prefix("0x").or_else(|| input.strip_prefix("0X"))?;
    if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    format!("0x{}", hex).parse().ok()
}

/// Whether `id` is a well-formed content identifier.
///
/// Identifiers are opaque to the relay but restricted to URL-safe
/// characters because they are embedded in resource paths.
pub fn is_valid_content_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_CONTENT_ID_LEN
        && !id.starts_with('.')
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
}

/// A transaction that satisfied a requirement on-chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPayment {
    pub tx_hash: TxHash,
    pub from: alloy::primitives::Address,
    /// Full value received, which may exceed the price.
    pub value: U256,
    pub block_number: u64,
    pub confirmations: u32,
}

/// Successful verification outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Transaction(VerifiedPayment),
    Attestation(AttestationClaim),
}

/// Why a proof did not satisfy a requirement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationFailure {
    #[error("transaction {tx_hash} not found")]
    TransactionNotFound { tx_hash: TxHash },

    #[error("transaction pays {actual}, expected {expected}")]
    WrongRecipient { expected: String, actual: String },

    #[error("insufficient payment: expected {expected}, received {received}")]
    InsufficientAmount {
        expected: String,
        received: String,
        expected_wei: U256,
        received_wei: U256,
    },

    #[error("transaction {tx_hash} has not reached {required} confirmation(s)")]
    NotConfirmed { tx_hash: TxHash, required: u32 },

    #[error("transaction {tx_hash} failed: {reason}")]
    TransactionFailed { tx_hash: TxHash, reason: String },

    #[error("invalid attestation: {0}")]
    InvalidAttestation(String),

    #[error("attestation expired at {exp}")]
    AttestationExpired { exp: u64 },

    #[error("attestation is for content {actual}, not {expected}")]
    ContentIdMismatch { expected: String, actual: String },

    #[error("chain unavailable: {0}")]
    ChainUnavailable(String),

    #[error("requirement cannot be checked: {0}")]
    InvalidRequirement(String),
}

impl VerificationFailure {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TransactionNotFound { .. } => "TRANSACTION_NOT_FOUND",
            Self::WrongRecipient { .. } => "WRONG_RECIPIENT",
            Self::InsufficientAmount { .. } => "INSUFFICIENT_AMOUNT",
            Self::NotConfirmed { .. } => "NOT_CONFIRMED",
            Self::TransactionFailed { .. } => "TRANSACTION_FAILED",
            Self::InvalidAttestation(_) => "INVALID_ATTESTATION",
            Self::AttestationExpired { .. } => "ATTESTATION_EXPIRED",
            Self::ContentIdMismatch { .. } => "CONTENT_ID_MISMATCH",
            Self::ChainUnavailable(_) => "CHAIN_UNAVAILABLE",
            Self::InvalidRequirement(_) => "INVALID_REQUIREMENT",
        }
    }

    /// Whether resubmitting the same proof later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransactionNotFound { .. } | Self::NotConfirmed { .. } | Self::ChainUnavailable(_)
        )
    }
}
