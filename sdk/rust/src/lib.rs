//! Client for the x402 payment relay.

pub mod client;

pub use client::{
    AccessResponse, Attestation, ContentGrant, PaymentBreakdown, PaymentChallenge, PaymentRequirement, RelayClient,
    SdkError,
};
