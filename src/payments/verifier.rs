//! Payment verification against a requirement.
//!
//! # Data Flow
//! ```text
//! PaymentProof::Transaction(hash)
//!     → ChainReader::get_transaction   (absent → TransactionNotFound)
//!     → recipient == payTo              (case-insensitive)
//!     → value >= price                  (integer wei)
//!     → wait_for_confirmation           (bounded → NotConfirmed / TransactionFailed)
//!
//! PaymentProof::Attestation(token)
//!     → AttestationCodec::verify        (InvalidAttestation / AttestationExpired)
//!     → claim.contentId == requirement.contentId
//! ```
//!
//! # Design Decisions
//! - Node errors map to `ChainUnavailable`, never to a permanent rejection
//! - Cheap checks run before the confirmation wait so a wrong or short
//!   payment is rejected without blocking

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::TxHash;

use crate::attestation::{AttestationCodec, AttestationError};
use crate::blockchain::reader::{wait_for_confirmation, ChainReader};
use crate::blockchain::types::{BlockchainError, ConfirmationStatus};
use crate::observability::metrics;
use crate::payments::amount::{format_native_amount, parse_native_amount};
use crate::payments::types::{
    PaymentProof, PaymentRequirement, Verification, VerificationFailure, VerifiedPayment,
};

/// Confirmation policy for direct transaction proofs.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationPolicy {
    pub min_confirmations: u32,
    pub max_wait: Duration,
    pub poll_interval: Duration,
}

/// Decides whether a proof satisfies a requirement.
#[derive(Clone)]
pub struct PaymentVerifier {
    reader: Arc<dyn ChainReader>,
    codec: AttestationCodec,
    policy: ConfirmationPolicy,
}

impl PaymentVerifier {
    pub fn new(reader: Arc<dyn ChainReader>, codec: AttestationCodec, policy: ConfirmationPolicy) -> Self {
        Self { reader, codec, policy }
    }

    pub async fn verify(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentRequirement,
    ) -> Result<Verification, VerificationFailure> {
        let result = match proof {
            PaymentProof::Transaction(hash) => self
                .verify_transaction(*hash, requirement)
                .await
                .map(Verification::Transaction),
            PaymentProof::Attestation(token) => self
                .verify_attestation(token, requirement)
                .map(Verification::Attestation),
        };

        match &result {
            Ok(_) => metrics::record_verification("verified"),
            Err(failure) => {
                metrics::record_verification(failure.code());
                tracing::info!(
                    content_id = %requirement.content_id,
                    code = failure.code(),
                    reason = %failure,
                    "Payment verification rejected"
                );
            }
        }
        result
    }

    async fn verify_transaction(
        &self,
        hash: TxHash,
        requirement: &PaymentRequirement,
    ) -> Result<VerifiedPayment, VerificationFailure> {
        let tx = self
            .reader
            .get_transaction(hash)
            .await
            .map_err(|e| VerificationFailure::ChainUnavailable(e.to_string()))?
            .ok_or(VerificationFailure::TransactionNotFound { tx_hash: hash })?;

        if !tx.is_addressed_to(&requirement.pay_to) {
            return Err(VerificationFailure::WrongRecipient {
                expected: requirement.pay_to.clone(),
                actual: tx
                    .to
                    .map(|to| to.to_string().to_lowercase())
                    .unwrap_or_else(|| "contract creation".to_string()),
            });
        }

        let expected = parse_native_amount(&requirement.amount)
            .map_err(|e| VerificationFailure::InvalidRequirement(e.to_string()))?;
        if tx.value < expected {
            return Err(VerificationFailure::InsufficientAmount {
                expected: requirement.amount.clone(),
                received: format_native_amount(tx.value),
                expected_wei: expected,
                received_wei: tx.value,
            });
        }

        let status = wait_for_confirmation(
            self.reader.as_ref(),
            hash,
            self.policy.min_confirmations,
            self.policy.max_wait,
            self.policy.poll_interval,
        )
        .await;

        match status {
            Ok(ConfirmationStatus::Confirmed {
                block_number,
                confirmations,
            }) => Ok(VerifiedPayment {
                tx_hash: hash,
                from: tx.from,
                value: tx.value,
                block_number,
                confirmations,
            }),
            Ok(ConfirmationStatus::Failed(reason)) => {
                Err(VerificationFailure::TransactionFailed { tx_hash: hash, reason })
            }
            Ok(_) | Err(BlockchainError::ConfirmationTimeout(_)) => Err(VerificationFailure::NotConfirmed {
                tx_hash: hash,
                required: self.policy.min_confirmations,
            }),
            Err(e) => Err(VerificationFailure::ChainUnavailable(e.to_string())),
        }
    }

    fn verify_attestation(
        &self,
        token: &str,
        requirement: &PaymentRequirement,
    ) -> Result<crate::attestation::AttestationClaim, VerificationFailure> {
        let claim = self.codec.verify(token).map_err(|e| match e {
            AttestationError::Expired { exp } => VerificationFailure::AttestationExpired { exp },
            other => VerificationFailure::InvalidAttestation(other.to_string()),
        })?;

        if claim.content_id != requirement.content_id {
            return Err(VerificationFailure::ContentIdMismatch {
                expected: requirement.content_id.clone(),
                actual: claim.content_id,
            });
        }
        Ok(claim)
    }
}
