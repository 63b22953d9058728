//! Payment subsystem: challenges, verification, settlement.
//!
//! # Data Flow
//! ```text
//! ChallengeIssuer ──▶ 402 requirement
//! PaymentVerifier ──▶ ChainReader / AttestationCodec
//! FundForwarder ────▶ ForwardLedger ──▶ TransferSubmitter
//! Reconciler ───────▶ FundForwarder (submitted + retryable records)
//! ChainWatcher ─────▶ ObservedPaymentHandler
//! ```

pub mod amount;
pub mod challenge;
pub mod forwarder;
pub mod ledger;
pub mod reconciler;
pub mod types;
pub mod verifier;
pub mod watcher;

pub use amount::{format_native_amount, parse_native_amount, FeeSplit};
pub use challenge::{ChallengeError, ChallengeIssuer};
pub use forwarder::{ForwardFailure, ForwardJob, ForwardQueue, ForwardResult, ForwarderSettings, FundForwarder};
pub use ledger::{ForwardLedger, ForwardRecord, ForwardStatus};
pub use reconciler::Reconciler;
pub use types::{PaymentProof, PaymentRequirement, Verification, VerificationFailure};
pub use verifier::{ConfirmationPolicy, PaymentVerifier};
pub use watcher::{ChainWatcher, ObservedPaymentHandler, WatcherSettings};
