//! Errors surfaced by the relay to its callers.

use alloy::primitives::TxHash;
use thiserror::Error;

use crate::attestation::AttestationError;
use crate::catalog::CatalogError;
use crate::payments::types::VerificationFailure;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("content '{0}' not found")]
    ContentNotFound(String),

    #[error("{0}")]
    Verification(VerificationFailure),

    #[error("transaction {tx_hash} was already used for content '{content_id}'")]
    TransactionAlreadyUsed { tx_hash: TxHash, content_id: String },

    #[error("payment required")]
    PaymentRequired,

    #[error("attestation for transaction {0} not found")]
    AttestationNotFound(TxHash),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("attestation could not be issued: {0}")]
    Attestation(AttestationError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// HTTP status class for this error.
    pub fn status(&self) -> u16 {
        match self {
            RelayError::InvalidInput(_) => 400,
            RelayError::ContentNotFound(_) | RelayError::AttestationNotFound(_) => 404,
            RelayError::Verification(failure) => match failure {
                VerificationFailure::TransactionNotFound { .. } => 404,
                VerificationFailure::ChainUnavailable(_) => 503,
                VerificationFailure::InvalidRequirement(_) => 500,
                _ => 402,
            },
            RelayError::TransactionAlreadyUsed { .. } => 409,
            RelayError::PaymentRequired => 402,
            RelayError::Unavailable(_) => 503,
            RelayError::Attestation(_) | RelayError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::InvalidInput(_) => "INVALID_REQUEST",
            RelayError::ContentNotFound(_) => "CONTENT_NOT_FOUND",
            RelayError::Verification(failure) => failure.code(),
            RelayError::TransactionAlreadyUsed { .. } => "TRANSACTION_ALREADY_USED",
            RelayError::PaymentRequired => "PAYMENT_REQUIRED",
            RelayError::AttestationNotFound(_) => "ATTESTATION_NOT_FOUND",
            RelayError::Unavailable(_) => "SERVICE_UNAVAILABLE",
            RelayError::Attestation(_) => "ATTESTATION_FAILED",
            RelayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the client may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayError::Verification(failure) => failure.is_retryable(),
            RelayError::Unavailable(_) => true,
            _ => false,
        }
    }
}

impl From<VerificationFailure> for RelayError {
    fn from(failure: VerificationFailure) -> Self {
        RelayError::Verification(failure)
    }
}

impl From<CatalogError> for RelayError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Unavailable(msg) => RelayError::Unavailable(msg),
            CatalogError::Conflict { tx_hash, content_id } => {
                RelayError::TransactionAlreadyUsed { tx_hash, content_id }
            }
        }
    }
}

impl From<AttestationError> for RelayError {
    fn from(err: AttestationError) -> Self {
        RelayError::Attestation(err)
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classes() {
        let hash = TxHash::repeat_byte(1);
        assert_eq!(RelayError::InvalidInput("x".into()).status(), 400);
        assert_eq!(
            RelayError::Verification(VerificationFailure::TransactionNotFound { tx_hash: hash }).status(),
            404
        );
        assert_eq!(
            RelayError::Verification(VerificationFailure::NotConfirmed { tx_hash: hash, required: 1 }).status(),
            402
        );
        assert_eq!(
            RelayError::Verification(VerificationFailure::ChainUnavailable("down".into())).status(),
            503
        );
        assert_eq!(
            RelayError::from(CatalogError::Conflict {
                tx_hash: hash,
                content_id: "a".into()
            })
            .status(),
            409
        );
    }

    #[test]
    fn test_not_confirmed_is_retryable() {
        let err = RelayError::Verification(VerificationFailure::NotConfirmed {
            tx_hash: TxHash::repeat_byte(1),
            required: 1,
        });
        assert!(err.is_retryable());
        assert_eq!(err.code(), "NOT_CONFIRMED");
        assert!(!RelayError::PaymentRequired.is_retryable());
    }
}
