//! Compact HS256 tokens over [`AttestationClaim`].
//!
//! # Data Flow
//! ```text
//! issue:  claim ──stamp iat/exp──▶ JSON ──base64url──┐
//!         header {"alg":"HS256","typ":"JWT"} ────────┴──▶ HMAC-SHA256 ──▶ h.p.s
//!
//! verify: h.p.s ──split──▶ alg check ──▶ MAC check ──▶ decode claim ──▶ exp check
//! ```
//!
//! # Design Decisions
//! - Expiry is written into the token at issuance and only compared at
//!   verification; the window is never recomputed
//! - The MAC is checked before the payload is parsed
//! - No chain access and no persistence

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::attestation::claim::AttestationClaim;

type HmacSha256 = Hmac<Sha256>;

/// Environment variable holding the shared signing secret.
pub const SECRET_ENV_VAR: &str = "ATTESTATION_SECRET";

const ALGORITHM: &str = "HS256";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttestationError {
    /// Malformed structure, unsupported algorithm, bad signature or
    /// unexpected payload fields.
    #[error("invalid attestation: {0}")]
    InvalidToken(String),

    #[error("attestation expired at {exp}")]
    Expired { exp: u64 },

    #[error("attestation secret is not configured")]
    MissingSecret,

    #[error("failed to encode attestation: {0}")]
    Encoding(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

/// Issues and verifies attestation tokens with a symmetric secret.
#[derive(Clone)]
pub struct AttestationCodec {
    secret: Vec<u8>,
    expiry: Duration,
}

impl AttestationCodec {
    pub fn new(secret: impl AsRef<[u8]>, expiry: Duration) -> Result<Self, AttestationError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(AttestationError::MissingSecret);
        }
        Ok(Self {
            secret: secret.to_vec(),
            expiry,
        })
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Stamp `claim` with the current time and sign it.
    ///
    /// Returns the token and the claim exactly as embedded.
    pub fn issue(&self, claim: AttestationClaim) -> Result<(String, AttestationClaim), AttestationError> {
        self.issue_at(claim, unix_now())
    }

    pub fn issue_at(
        &self,
        mut claim: AttestationClaim,
        now: u64,
    ) -> Result<(String, AttestationClaim), AttestationError> {
        claim.iat = now;
        claim.exp = now.saturating_add(self.expiry.as_secs());

        let header = Header {
            alg: ALGORITHM.to_string(),
            typ: Some("JWT".to_string()),
        };
        let header_json = serde_json::to_vec(&header).map_err(|e| AttestationError::Encoding(e.to_string()))?;
        let claim_json = serde_json::to_vec(&claim).map_err(|e| AttestationError::Encoding(e.to_string()))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(claim_json)
        );
        let signature = URL_SAFE_NO_PAD.encode(self.mac(signing_input.as_bytes())?.finalize().into_bytes());

        Ok((format!("{}.{}", signing_input, signature), claim))
    }

    pub fn verify(&self, token: &str) -> Result<AttestationClaim, AttestationError> {
        self.verify_at(token, unix_now())
    }

    /// Verify against an explicit clock.
    pub fn verify_at(&self, token: &str, now: u64) -> Result<AttestationClaim, AttestationError> {
        let mut parts = token.trim().split('.');
        let (header_b64, claim_b64, signature_b64) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(c), Some(s), None) if !h.is_empty() && !c.is_empty() && !s.is_empty() => (h, c, s),
            _ => return Err(invalid("expected three dot-separated segments")),
        };

        let header: Header = serde_json::from_slice(&decode_segment(header_b64)?)
            .map_err(|e| invalid(&format!("header: {}", e)))?;
        if header.alg != ALGORITHM {
            return Err(invalid(&format!("unsupported algorithm {}", header.alg)));
        }

        let signature = decode_segment(signature_b64)?;
        let signing_input = &token.trim()[..header_b64.len() + 1 + claim_b64.len()];
        self.mac(signing_input.as_bytes())?
            .verify_slice(&signature)
            .map_err(|_| invalid("signature mismatch"))?;

        let claim: AttestationClaim = serde_json::from_slice(&decode_segment(claim_b64)?)
            .map_err(|e| invalid(&format!("payload: {}", e)))?;

        if claim.is_expired_at(now) {
            return Err(AttestationError::Expired { exp: claim.exp });
        }
        Ok(claim)
    }

    fn mac(&self, input: &[u8]) -> Result<HmacSha256, AttestationError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| AttestationError::MissingSecret)?;
        mac.update(input);
        Ok(mac)
    }
}

impl std::fmt::Debug for AttestationCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationCodec")
            .field("expiry_secs", &self.expiry.as_secs())
            .finish_non_exhaustive()
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, AttestationError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| invalid(&format!("base64: {}", e)))
}

fn invalid(reason: &str) -> AttestationError {
    AttestationError::InvalidToken(reason.to_string())
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
