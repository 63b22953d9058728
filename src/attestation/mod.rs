//! Attestation tokens: signed, expiring proof that a payment was verified.
//!
//! Resource servers holding the shared secret verify tokens locally without
//! touching the chain.

pub mod claim;
pub mod codec;

pub use claim::AttestationClaim;
pub use codec::{AttestationCodec, AttestationError};
