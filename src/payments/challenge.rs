//! Payment-required challenges.
//!
//! Pure construction: the requirement is rebuilt from the current catalog
//! price on every request, so price changes apply to the next challenge.

use alloy::primitives::Address;
use thiserror::Error;

use crate::payments::amount::parse_native_amount;
use crate::payments::types::{is_valid_content_id, PaymentRequirement, PaymentScheme};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChallengeError {
    #[error("invalid requirement: {0}")]
    InvalidRequirement(String),
}

/// Path clients resubmit proof to.
pub fn resource_path(content_id: &str) -> String {
    format!("/api/content/{}/x402", content_id)
}

/// Builds requirements for one network.
#[derive(Debug, Clone)]
pub struct ChallengeIssuer {
    network: String,
}

impl ChallengeIssuer {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Describe what must be paid to `recipient` for `content_id`.
    ///
    /// `price` is echoed verbatim once validated; `recipient` is normalized
    /// to lowercase hex.
    pub fn build_challenge(
        &self,
        content_id: &str,
        recipient: &str,
        price: &str,
        description: &str,
    ) -> Result<PaymentRequirement, ChallengeError> {
        if !is_valid_content_id(content_id) {
            return Err(ChallengeError::InvalidRequirement(format!(
                "malformed content id '{}'",
                content_id
            )));
        }
        parse_native_amount(price).map_err(|e| ChallengeError::InvalidRequirement(e.to_string()))?;
        let recipient: Address = recipient
            .trim()
            .parse()
            .map_err(|_| ChallengeError::InvalidRequirement(format!("invalid recipient '{}'", recipient)))?;

        Ok(PaymentRequirement {
            scheme: PaymentScheme::Exact,
            network: self.network.clone(),
            amount: price.to_string(),
            pay_to: recipient.to_string().to_lowercase(),
            resource: resource_path(content_id),
            description: description.to_string(),
            content_id: content_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELAYER: &str = "0xd3ecf2aac5588b445a1fe7a8194bb0f806685275";

    #[test]
    fn test_challenge_echoes_inputs() {
        let issuer = ChallengeIssuer::new("bsc");
        for (id, price) in [("abc", "0.001"), ("guide-2", "12"), ("x_1", "0.000000000000000001")] {
            let req = issuer.build_challenge(id, RELAYER, price, "desc").unwrap();
            assert_eq!(req.amount, price);
            assert_eq!(req.pay_to, RELAYER);
            assert_eq!(req.content_id, id);
            assert_eq!(req.resource, format!("/api/content/{}/x402", id));
            assert_eq!(req.network, "bsc");
            assert_eq!(req.scheme, PaymentScheme::Exact);
        }
    }

    #[test]
    fn test_recipient_lowercased() {
        let issuer = ChallengeIssuer::new("bsc");
        let req = issuer
            .build_challenge("abc", "0xD3ECF2AAC5588B445A1FE7A8194BB0F806685275", "1", "")
            .unwrap();
        assert_eq!(req.pay_to, RELAYER);
    }

    #[test]
    fn test_malformed_inputs_rejected() {
        let issuer = ChallengeIssuer::new("bsc");
        for price in ["-0.001", "", "free", "0.0000000000000000001"] {
            assert!(issuer.build_challenge("abc", RELAYER, price, "").is_err(), "price {:?}", price);
        }
        assert!(issuer.build_challenge("", RELAYER, "1", "").is_err());
        assert!(issuer.build_challenge("a/b", RELAYER, "1", "").is_err());
        assert!(issuer.build_challenge("abc", "0x1234", "1", "").is_err());
    }
}
