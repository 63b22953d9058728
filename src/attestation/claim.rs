//! The payment claim carried inside an attestation token.

use serde::{Deserialize, Serialize};

/// A verified payment, bound to one content id.
///
/// Closed record: unknown fields in a decoded payload are a decoding error,
/// so nothing can ride along with a valid signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AttestationClaim {
    pub tx_hash: String,
    pub content_id: String,
    /// Payer address.
    pub from: String,
    /// Gross amount received, decimal native units.
    pub amount: String,
    pub merchant_address: String,
    pub network: String,
    pub relayer_address: String,
    pub platform_fee: String,
    pub merchant_amount: String,
    /// Issued-at, unix seconds.
    pub iat: u64,
    /// Expiry, unix seconds. Fixed at issuance.
    pub exp: u64,
}

impl AttestationClaim {
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.exp
    }

    /// Issuance time in milliseconds, as clients of the JSON API expect.
    pub fn timestamp_ms(&self) -> u64 {
        self.iat.saturating_mul(1000)
    }
}
