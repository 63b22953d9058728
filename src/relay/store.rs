//! Issued attestations, retrievable by payment transaction hash.

use alloy::primitives::TxHash;
use dashmap::DashMap;

use crate::attestation::AttestationClaim;
use crate::payments::amount::FeeSplit;

/// A token together with the claim it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedAttestation {
    pub token: String,
    pub claim: AttestationClaim,
    pub split: FeeSplit,
    pub confirmations: u32,
}

#[derive(Default)]
pub struct AttestationStore {
    by_tx: DashMap<TxHash, IssuedAttestation>,
}

impl AttestationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tx_hash: TxHash, attestation: IssuedAttestation) {
        self.by_tx.insert(tx_hash, attestation);
    }

    pub fn get(&self, tx_hash: &TxHash) -> Option<IssuedAttestation> {
        self.by_tx.get(tx_hash).map(|a| a.value().clone())
    }

    /// Stored attestation for `tx_hash` if it is still valid at `now`.
    pub fn get_valid(&self, tx_hash: &TxHash, now: u64) -> Option<IssuedAttestation> {
        self.get(tx_hash).filter(|a| !a.claim.is_expired_at(now))
    }

    pub fn len(&self) -> usize {
        self.by_tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tx.is_empty()
    }
}
