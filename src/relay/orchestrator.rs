//! Ties challenge, verification, settlement and attestation together.
//!
//! # Data Flow
//! ```text
//! access(content, None)        ──▶ challenge ──▶ PaymentRequired
//! access(content, Attestation) ──▶ PaymentVerifier (token) ──▶ Granted
//! access(content, Transaction) ─┐
//! attest_transaction ───────────┴▶ replay guard ──▶ PaymentVerifier (chain)
//!                                      ──▶ PaymentLedger ──▶ ForwardQueue (detached)
//!                                      ──▶ AttestationCodec ──▶ AttestationStore
//! ChainWatcher ──▶ attest_observed ──▶ PaymentLedger ──▶ FundForwarder (awaited) ──▶ ...
//! ```
//!
//! # Design Decisions
//! - Stateless between calls: everything durable lives in the ledgers
//! - A forwarding problem is logged and left to the reconciler; it never
//!   turns an accepted payment into a rejection
//! - A transaction already bound to another content id is refused before
//!   the chain is consulted

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::attestation::codec::unix_now;
use crate::attestation::{AttestationClaim, AttestationCodec};
use crate::blockchain::types::ChainTransaction;
use crate::catalog::{ConfirmedPayment, ContentCatalog, PaymentLedger};
use crate::config::schema::{ContentEntry, ContentKind};
use crate::observability::metrics;
use crate::payments::challenge::{ChallengeError, ChallengeIssuer};
use crate::payments::forwarder::{ForwardJob, ForwardQueue, FundForwarder};
use crate::payments::ledger::{now_ms, LedgerSummary};
use crate::payments::types::{
    is_valid_content_id, PaymentProof, PaymentRequiredResponse, PaymentRequirement, Verification,
    VerificationFailure,
};
use crate::payments::verifier::PaymentVerifier;
use crate::payments::watcher::ObservedPaymentHandler;
use crate::relay::error::{RelayError, RelayResult};
use crate::relay::state::{PhaseTracker, RelayPhase};
use crate::relay::store::{AttestationStore, IssuedAttestation};

/// Content as returned alongside a granted attestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentView {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub content_type: ContentKind,
    pub data: Option<String>,
    pub file_path: Option<String>,
}

impl From<&ContentEntry> for ContentView {
    fn from(entry: &ContentEntry) -> Self {
        Self {
            id: entry.id.clone(),
            title: entry.title.clone(),
            description: entry.description.clone(),
            content_type: entry.content_type,
            data: entry.content_data.clone(),
            file_path: entry.file_path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDelivery {
    pub url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub mime_type: Option<String>,
}

/// Content shaped by its kind for the delivery endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeliveredContent {
    Text {
        data: Option<String>,
    },
    Image(FileDelivery),
    Video(FileDelivery),
    File(FileDelivery),
    Api {
        #[serde(rename = "apiUrl")]
        api_url: Option<String>,
    },
}

impl From<&ContentEntry> for DeliveredContent {
    fn from(entry: &ContentEntry) -> Self {
        let file = || FileDelivery {
            url: entry.file_path.clone(),
            file_name: entry.file_name.clone(),
            file_size: entry.file_size,
            mime_type: entry.mime_type.clone(),
        };
        match entry.content_type {
            ContentKind::Text => DeliveredContent::Text {
                data: entry.content_data.clone(),
            },
            ContentKind::Image => DeliveredContent::Image(file()),
            ContentKind::Video => DeliveredContent::Video(file()),
            ContentKind::File => DeliveredContent::File(file()),
            ContentKind::Api => DeliveredContent::Api {
                api_url: entry.content_data.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantedAccess {
    pub content: ContentView,
    pub claim: AttestationClaim,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessOutcome {
    PaymentRequired(PaymentRequiredResponse),
    Granted(Box<GrantedAccess>),
}

/// Collaborators of the orchestrator.
pub struct RelayDeps {
    pub catalog: Arc<dyn ContentCatalog>,
    pub payments: Arc<dyn PaymentLedger>,
    pub issuer: ChallengeIssuer,
    pub verifier: PaymentVerifier,
    pub codec: AttestationCodec,
    pub forwarder: Arc<FundForwarder>,
    /// `None` disables merchant forwarding.
    pub queue: Option<ForwardQueue>,
    pub relayer: Address,
    pub min_confirmations: u32,
}

enum ForwardMode {
    Detached,
    Awaited,
}

pub struct RelayOrchestrator {
    catalog: Arc<dyn ContentCatalog>,
    payments: Arc<dyn PaymentLedger>,
    issuer: ChallengeIssuer,
    verifier: PaymentVerifier,
    codec: AttestationCodec,
    forwarder: Arc<FundForwarder>,
    queue: Option<ForwardQueue>,
    attestations: AttestationStore,
    relayer: Address,
    min_confirmations: u32,
}

impl RelayOrchestrator {
    pub fn new(deps: RelayDeps) -> Self {
        Self {
            catalog: deps.catalog,
            payments: deps.payments,
            issuer: deps.issuer,
            verifier: deps.verifier,
            codec: deps.codec,
            forwarder: deps.forwarder,
            queue: deps.queue,
            attestations: AttestationStore::new(),
            relayer: deps.relayer,
            min_confirmations: deps.min_confirmations,
        }
    }

    pub fn relayer(&self) -> Address {
        self.relayer
    }

    pub fn network(&self) -> &str {
        self.issuer.network()
    }

    pub fn forwarding_enabled(&self) -> bool {
        self.queue.is_some()
    }

    pub fn forward_summary(&self) -> LedgerSummary {
        self.forwarder.ledger().summary()
    }

    /// Requirement for `content_id` at its current catalog price.
    pub async fn challenge(&self, content_id: &str) -> RelayResult<PaymentRequirement> {
        let content = self.load_content(content_id).await?;
        self.requirement_for(&content)
    }

    /// Resolve a request for paywalled content.
    pub async fn access(&self, content_id: &str, proof: Option<PaymentProof>) -> RelayResult<AccessOutcome> {
        let content = self.load_content(content_id).await?;
        let requirement = self.requirement_for(&content)?;

        match proof {
            None => Ok(AccessOutcome::PaymentRequired(PaymentRequiredResponse::new(requirement))),
            Some(PaymentProof::Transaction(tx_hash)) => {
                let issued = self.attest_transaction(content_id, tx_hash).await?;
                Ok(AccessOutcome::Granted(Box::new(GrantedAccess {
                    content: ContentView::from(&content),
                    claim: issued.claim,
                    token: issued.token,
                })))
            }
            Some(PaymentProof::Attestation(token)) => {
                let claim = match self
                    .verifier
                    .verify(&PaymentProof::Attestation(token.clone()), &requirement)
                    .await?
                {
                    Verification::Attestation(claim) => claim,
                    Verification::Transaction(_) => {
                        return Err(RelayError::Internal("unexpected verification kind".to_string()))
                    }
                };
                Ok(AccessOutcome::Granted(Box::new(GrantedAccess {
                    content: ContentView::from(&content),
                    claim,
                    token,
                })))
            }
        }
    }

    /// Verify a raw payment transaction for `content_id` and attest it.
    pub async fn attest_transaction(&self, content_id: &str, tx_hash: TxHash) -> RelayResult<IssuedAttestation> {
        let content = self.load_content(content_id).await?;
        let requirement = self.requirement_for(&content)?;
        let merchant = parse_merchant(&content)?;

        let mut tracker = PhaseTracker::new(format!("{}:{}", content_id, tx_hash));
        self.advance(&mut tracker, RelayPhase::AwaitingPayment)?;

        if let Some(existing) = self.replay_check(tx_hash, content_id).await? {
            return Ok(existing);
        }

        self.advance(&mut tracker, RelayPhase::Verifying)?;
        let payment = match self
            .verifier
            .verify(&PaymentProof::Transaction(tx_hash), &requirement)
            .await
        {
            Ok(Verification::Transaction(payment)) => payment,
            Ok(Verification::Attestation(_)) => {
                return Err(RelayError::Internal("unexpected verification kind".to_string()))
            }
            Err(failure) => {
                self.advance(&mut tracker, RelayPhase::Rejected)?;
                return Err(failure.into());
            }
        };
        self.advance(&mut tracker, RelayPhase::Verified)?;

        self.settle_and_attest(
            &mut tracker,
            AcceptedPayment {
                tx_hash,
                from: payment.from,
                value: payment.value,
                block_number: Some(payment.block_number),
                confirmations: payment.confirmations,
            },
            content_id,
            merchant,
            ForwardMode::Detached,
            "relay",
        )
        .await
    }

    /// Attest a transfer the watcher found on-chain. The forward is awaited.
    pub async fn attest_observed(
        &self,
        tx: &ChainTransaction,
        content_id: &str,
        merchant: Address,
    ) -> RelayResult<IssuedAttestation> {
        if tx.to != Some(self.relayer) {
            return Err(RelayError::Verification(VerificationFailure::WrongRecipient {
                expected: self.relayer.to_string().to_lowercase(),
                actual: tx
                    .to
                    .map(|to| to.to_string().to_lowercase())
                    .unwrap_or_else(|| "contract creation".to_string()),
            }));
        }

        let mut tracker = PhaseTracker::new(format!("{}:{}", content_id, tx.hash));
        self.advance(&mut tracker, RelayPhase::AwaitingPayment)?;
        if let Some(existing) = self.replay_check(tx.hash, content_id).await? {
            return Ok(existing);
        }
        // Depth and receipt status were checked while scanning.
        self.advance(&mut tracker, RelayPhase::Verifying)?;
        self.advance(&mut tracker, RelayPhase::Verified)?;

        self.settle_and_attest(
            &mut tracker,
            AcceptedPayment {
                tx_hash: tx.hash,
                from: tx.from,
                value: tx.value,
                block_number: tx.block_number,
                confirmations: self.min_confirmations,
            },
            content_id,
            merchant,
            ForwardMode::Awaited,
            "watcher",
        )
        .await
    }

    /// An attestation issued earlier for `tx_hash`.
    pub fn attestation_for(&self, tx_hash: &TxHash) -> Option<IssuedAttestation> {
        self.attestations.get(tx_hash)
    }

    pub async fn has_paid(&self, content_id: &str, buyer: &str) -> RelayResult<bool> {
        if !is_valid_content_id(content_id) {
            return Err(RelayError::InvalidInput(format!("malformed content id '{}'", content_id)));
        }
        let buyer = parse_address(buyer, "buyer address")?;
        Ok(self.payments.has_confirmed_payment(content_id, buyer).await?)
    }

    /// Content for a buyer with a confirmed payment on record.
    pub async fn deliver(&self, content_id: &str, buyer: &str) -> RelayResult<DeliveredContent> {
        if !self.has_paid(content_id, buyer).await? {
            return Err(RelayError::PaymentRequired);
        }
        let content = self.load_content(content_id).await?;
        tracing::info!(content_id = %content_id, buyer = %buyer, "Delivering content");
        Ok(DeliveredContent::from(&content))
    }

    async fn load_content(&self, content_id: &str) -> RelayResult<ContentEntry> {
        if !is_valid_content_id(content_id) {
            return Err(RelayError::InvalidInput(format!("malformed content id '{}'", content_id)));
        }
        self.catalog
            .get_content_by_id(content_id)
            .await?
            .ok_or_else(|| RelayError::ContentNotFound(content_id.to_string()))
    }

    fn requirement_for(&self, content: &ContentEntry) -> RelayResult<PaymentRequirement> {
        let relayer = self.relayer.to_string();
        self.issuer
            .build_challenge(&content.id, &relayer, &content.price, &content.title)
            .map_err(|ChallengeError::InvalidRequirement(msg)| {
                tracing::error!(content_id = %content.id, error = %msg, "Catalog entry cannot be challenged");
                RelayError::Internal(msg)
            })
    }

    /// Refuse cross-content reuse; hand back a still-valid attestation for a
    /// repeat of the same request.
    async fn replay_check(&self, tx_hash: TxHash, content_id: &str) -> RelayResult<Option<IssuedAttestation>> {
        if let Some(existing) = self.payments.find_by_tx(tx_hash).await? {
            if existing.content_id != content_id {
                tracing::warn!(
                    tx_hash = %tx_hash,
                    bound_to = %existing.content_id,
                    requested = %content_id,
                    "Transaction reuse across content refused"
                );
                return Err(RelayError::TransactionAlreadyUsed {
                    tx_hash,
                    content_id: existing.content_id,
                });
            }
        }
        Ok(self
            .attestations
            .get_valid(&tx_hash, unix_now())
            .filter(|a| a.claim.content_id == content_id))
    }

    async fn settle_and_attest(
        &self,
        tracker: &mut PhaseTracker,
        payment: AcceptedPayment,
        content_id: &str,
        merchant: Address,
        mode: ForwardMode,
        source: &'static str,
    ) -> RelayResult<IssuedAttestation> {
        self.payments
            .record_confirmed_payment(ConfirmedPayment {
                tx_hash: payment.tx_hash,
                content_id: content_id.to_string(),
                buyer: payment.from,
                amount: payment.value,
                block_number: payment.block_number,
                recorded_at_ms: now_ms(),
            })
            .await?;

        let split = self.forwarder.split(payment.value);

        if let Some(queue) = &self.queue {
            self.advance(tracker, RelayPhase::Forwarding)?;
            let job = ForwardJob {
                inbound: payment.tx_hash,
                merchant,
                gross: payment.value,
            };
            match mode {
                ForwardMode::Detached => {
                    if let Err(e) = queue.enqueue(job).await {
                        tracing::warn!(tx_hash = %payment.tx_hash, error = %e, "Forward not queued");
                    }
                }
                ForwardMode::Awaited => {
                    // Failures are recorded in the forward ledger by the forwarder.
                    let _ = self.forwarder.forward(job.inbound, job.merchant, job.gross).await;
                }
            }
        }

        let claim = AttestationClaim {
            tx_hash: payment.tx_hash.to_string(),
            content_id: content_id.to_string(),
            from: payment.from.to_string().to_lowercase(),
            amount: split.gross_decimal(),
            merchant_address: merchant.to_string().to_lowercase(),
            network: self.issuer.network().to_string(),
            relayer_address: self.relayer.to_string().to_lowercase(),
            platform_fee: split.platform_fee_decimal(),
            merchant_amount: split.merchant_amount_decimal(),
            iat: 0,
            exp: 0,
        };
        let (token, claim) = self.codec.issue(claim)?;
        self.advance(tracker, RelayPhase::Attested)?;

        let issued = IssuedAttestation {
            token,
            claim,
            split,
            confirmations: payment.confirmations,
        };
        self.attestations.insert(payment.tx_hash, issued.clone());
        metrics::record_attestation(source);
        tracing::info!(
            tx_hash = %payment.tx_hash,
            content_id = %content_id,
            from = %payment.from,
            amount = %issued.claim.amount,
            source = source,
            "Attestation issued"
        );
        Ok(issued)
    }

    fn advance(&self, tracker: &mut PhaseTracker, next: RelayPhase) -> RelayResult<()> {
        tracker
            .advance(next)
            .map_err(|e| RelayError::Internal(e.to_string()))
    }
}

struct AcceptedPayment {
    tx_hash: TxHash,
    from: Address,
    value: U256,
    block_number: Option<u64>,
    confirmations: u32,
}

fn parse_address(input: &str, what: &str) -> RelayResult<Address> {
    input
        .trim()
        .parse()
        .map_err(|_| RelayError::InvalidInput(format!("invalid {} '{}'", what, input)))
}

fn parse_merchant(content: &ContentEntry) -> RelayResult<Address> {
    content
        .merchant_address
        .trim()
        .parse()
        .map_err(|_| RelayError::Internal(format!("content '{}' has an invalid merchant address", content.id)))
}

#[async_trait]
impl ObservedPaymentHandler for RelayOrchestrator {
    async fn handle_observed(&self, tx: &ChainTransaction, content_id: &str, merchant: Address) {
        if let Err(e) = self.attest_observed(tx, content_id, merchant).await {
            tracing::warn!(tx_hash = %tx.hash, code = e.code(), error = %e, "Observed payment not attested");
        }
    }
}
