//! Merchant settlement: fee split and the outbound transfer.
//!
//! # Data Flow
//! ```text
//! RelayOrchestrator ──enqueue──▶ ForwardQueue (bounded mpsc)
//!                                     │ one task per job
//!                                     ▼
//!                               FundForwarder::forward
//!                                     │ per-hash lock + ForwardLedger
//!                                     ▼
//!                               TransferSubmitter ──▶ wait_for_confirmation
//! ```
//!
//! # Design Decisions
//! - Forwarding never blocks or fails an attestation; every failure class
//!   is logged and recorded for the reconciler
//! - Completed and submitted forwards are returned as-is on repeat, so a
//!   payment is forwarded at most once
//! - A broadcast that times out is `Indeterminate` and is not retried:
//!   the node may have accepted it. A `Pending` record left behind by an
//!   interrupted holder is treated the same way

use alloy::primitives::{Address, TxHash, U256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::blockchain::reader::{wait_for_confirmation, ChainReader};
use crate::blockchain::transaction::TransferSubmitter;
use crate::blockchain::types::{BlockchainError, ConfirmationStatus};
use crate::observability::metrics;
use crate::payments::amount::FeeSplit;
use crate::payments::ledger::{now_ms, ForwardLedger, ForwardRecord, ForwardStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForwardFailure {
    #[error("merchant transfer broadcast failed: {0}")]
    Broadcast(String),

    #[error("merchant transfer {merchant_tx_hash} not confirmed in time")]
    Unconfirmed { merchant_tx_hash: TxHash },

    #[error("merchant transfer {merchant_tx_hash} reverted: {reason}")]
    Reverted { merchant_tx_hash: TxHash, reason: String },

    #[error("relayer signing key unavailable")]
    SigningKeyUnavailable,

    #[error("relayer balance too low: {0}")]
    InsufficientRelayerBalance(String),

    #[error("nothing to forward after platform fee")]
    NothingToForward,

    #[error("forward queue is full")]
    QueueFull,

    #[error("broadcast outcome unknown: {0}")]
    Indeterminate(String),

    #[error("forward abandoned: {0}")]
    Abandoned(String),
}

impl ForwardFailure {
    /// Whether the reconciler may try again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ForwardFailure::NothingToForward | ForwardFailure::Indeterminate(_) | ForwardFailure::Abandoned(_)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ForwardFailure::Broadcast(_) => "broadcast",
            ForwardFailure::Unconfirmed { .. } => "unconfirmed",
            ForwardFailure::Reverted { .. } => "reverted",
            ForwardFailure::SigningKeyUnavailable => "signing_key_unavailable",
            ForwardFailure::InsufficientRelayerBalance(_) => "insufficient_balance",
            ForwardFailure::NothingToForward => "nothing_to_forward",
            ForwardFailure::QueueFull => "queue_full",
            ForwardFailure::Indeterminate(_) => "indeterminate",
            ForwardFailure::Abandoned(_) => "abandoned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardResult {
    pub inbound_tx_hash: TxHash,
    pub merchant_tx_hash: TxHash,
    pub split: FeeSplit,
    pub status: ForwardStatus,
    /// True when an earlier forward was returned instead of a new transfer.
    pub replayed: bool,
}

/// Settlement knobs.
#[derive(Debug, Clone, Copy)]
pub struct ForwarderSettings {
    pub fee_bps: u32,
    pub min_confirmations: u32,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
}

pub struct FundForwarder {
    /// `None` when no signing key is configured.
    submitter: Option<Arc<dyn TransferSubmitter>>,
    reader: Arc<dyn ChainReader>,
    ledger: Arc<ForwardLedger>,
    settings: ForwarderSettings,
}

impl FundForwarder {
    pub fn new(
        submitter: Option<Arc<dyn TransferSubmitter>>,
        reader: Arc<dyn ChainReader>,
        ledger: Arc<ForwardLedger>,
        settings: ForwarderSettings,
    ) -> Self {
        Self {
            submitter,
            reader,
            ledger,
            settings,
        }
    }

    pub fn ledger(&self) -> &Arc<ForwardLedger> {
        &self.ledger
    }

    pub fn split(&self, gross: U256) -> FeeSplit {
        FeeSplit::compute(gross, self.settings.fee_bps)
    }

    /// Forward the merchant share of `gross`, at most once per `inbound`.
    pub async fn forward(
        &self,
        inbound: TxHash,
        merchant: Address,
        gross: U256,
    ) -> Result<ForwardResult, ForwardFailure> {
        let result = self.forward_locked(inbound, merchant, gross).await;
        match &result {
            Ok(r) if r.replayed => metrics::record_forward("replayed"),
            Ok(_) => metrics::record_forward("completed"),
            Err(failure) => {
                metrics::record_forward(failure.label());
                tracing::warn!(
                    inbound_tx = %inbound,
                    merchant = %merchant,
                    failure = failure.label(),
                    retryable = failure.is_retryable(),
                    error = %failure,
                    "Merchant forward did not complete"
                );
            }
        }
        result
    }

    async fn forward_locked(
        &self,
        inbound: TxHash,
        merchant: Address,
        gross: U256,
    ) -> Result<ForwardResult, ForwardFailure> {
        let _guard = self.ledger.lock(inbound).await;
        let split = self.split(gross);

        let attempts = match self.ledger.get(&inbound) {
            Some(existing) => match &existing.status {
                ForwardStatus::Submitted { merchant_tx_hash }
                | ForwardStatus::Completed { merchant_tx_hash, .. } => {
                    return Ok(ForwardResult {
                        inbound_tx_hash: inbound,
                        merchant_tx_hash: *merchant_tx_hash,
                        split: FeeSplit {
                            gross: existing.gross,
                            platform_fee: existing.platform_fee,
                            merchant_amount: existing.merchant_amount,
                        },
                        status: existing.status.clone(),
                        replayed: true,
                    });
                }
                ForwardStatus::Indeterminate { reason } => {
                    return Err(ForwardFailure::Indeterminate(reason.clone()));
                }
                ForwardStatus::Failed {
                    reason,
                    retryable: false,
                } => return Err(ForwardFailure::Abandoned(reason.clone())),
                // Every holder moves Pending on before releasing the lock, so
                // this one was interrupted mid-broadcast (crash or cancel).
                ForwardStatus::Pending => {
                    let failure = ForwardFailure::Indeterminate("interrupted before broadcast result".to_string());
                    self.ledger
                        .set_status(
                            &inbound,
                            ForwardStatus::Indeterminate {
                                reason: failure.to_string(),
                            },
                        )
                        .await;
                    return Err(failure);
                }
                ForwardStatus::Failed { retryable: true, .. } => existing.attempts,
            },
            None => 0,
        };

        let mut record = ForwardRecord {
            inbound_tx_hash: inbound,
            merchant,
            gross: split.gross,
            platform_fee: split.platform_fee,
            merchant_amount: split.merchant_amount,
            status: ForwardStatus::Pending,
            attempts: attempts + 1,
            updated_at_ms: now_ms(),
        };

        if split.merchant_amount.is_zero() {
            record.status = ForwardStatus::Failed {
                reason: ForwardFailure::NothingToForward.to_string(),
                retryable: false,
            };
            self.ledger.upsert(record).await;
            return Err(ForwardFailure::NothingToForward);
        }

        let Some(submitter) = self.submitter.as_ref() else {
            record.status = ForwardStatus::Failed {
                reason: ForwardFailure::SigningKeyUnavailable.to_string(),
                retryable: true,
            };
            self.ledger.upsert(record).await;
            return Err(ForwardFailure::SigningKeyUnavailable);
        };

        self.ledger.upsert(record).await;
        tracing::info!(
            inbound_tx = %inbound,
            merchant = %merchant,
            gross = %split.gross_decimal(),
            platform_fee = %split.platform_fee_decimal(),
            merchant_amount = %split.merchant_amount_decimal(),
            attempt = attempts + 1,
            "Forwarding merchant share"
        );

        let merchant_tx_hash = match submitter.submit_transfer(merchant, split.merchant_amount).await {
            Ok(hash) => hash,
            Err(BlockchainError::Timeout(secs)) => {
                let failure = ForwardFailure::Indeterminate(format!("broadcast timed out after {}s", secs));
                self.ledger
                    .set_status(
                        &inbound,
                        ForwardStatus::Indeterminate {
                            reason: failure.to_string(),
                        },
                    )
                    .await;
                return Err(failure);
            }
            Err(e) => {
                let failure = match e {
                    BlockchainError::InsufficientBalance { .. } => {
                        ForwardFailure::InsufficientRelayerBalance(e.to_string())
                    }
                    BlockchainError::Wallet(_) => ForwardFailure::SigningKeyUnavailable,
                    other => ForwardFailure::Broadcast(other.to_string()),
                };
                self.ledger
                    .set_status(
                        &inbound,
                        ForwardStatus::Failed {
                            reason: failure.to_string(),
                            retryable: true,
                        },
                    )
                    .await;
                return Err(failure);
            }
        };

        self.ledger
            .set_status(&inbound, ForwardStatus::Submitted { merchant_tx_hash })
            .await;

        let status = wait_for_confirmation(
            self.reader.as_ref(),
            merchant_tx_hash,
            self.settings.min_confirmations,
            self.settings.confirmation_timeout,
            self.settings.poll_interval,
        )
        .await;

        self.settle(inbound, merchant_tx_hash, split, status).await
    }

    /// Re-check a submitted forward once. Used by the reconciler.
    pub async fn refresh_submitted(&self, record: &ForwardRecord) -> Result<ForwardResult, ForwardFailure> {
        let ForwardStatus::Submitted { merchant_tx_hash } = record.status else {
            return Err(ForwardFailure::Abandoned(format!(
                "record is {}, not submitted",
                record.status.label()
            )));
        };
        let _guard = self.ledger.lock(record.inbound_tx_hash).await;
        let split = FeeSplit {
            gross: record.gross,
            platform_fee: record.platform_fee,
            merchant_amount: record.merchant_amount,
        };
        let status = match self
            .reader
            .get_receipt(merchant_tx_hash, self.settings.min_confirmations)
            .await
        {
            Ok(ConfirmationStatus::Pending) | Ok(ConfirmationStatus::Confirming { .. }) => {
                return Err(ForwardFailure::Unconfirmed { merchant_tx_hash });
            }
            other => other,
        };
        self.settle(record.inbound_tx_hash, merchant_tx_hash, split, status)
            .await
    }

    async fn settle(
        &self,
        inbound: TxHash,
        merchant_tx_hash: TxHash,
        split: FeeSplit,
        status: Result<ConfirmationStatus, BlockchainError>,
    ) -> Result<ForwardResult, ForwardFailure> {
        match status {
            Ok(ConfirmationStatus::Confirmed { block_number, .. }) => {
                let status = ForwardStatus::Completed {
                    merchant_tx_hash,
                    block_number,
                };
                self.ledger.set_status(&inbound, status.clone()).await;
                tracing::info!(
                    inbound_tx = %inbound,
                    merchant_tx = %merchant_tx_hash,
                    block = block_number,
                    "Merchant forward confirmed"
                );
                Ok(ForwardResult {
                    inbound_tx_hash: inbound,
                    merchant_tx_hash,
                    split,
                    status,
                    replayed: false,
                })
            }
            Ok(ConfirmationStatus::Failed(reason)) => {
                let failure = ForwardFailure::Reverted {
                    merchant_tx_hash,
                    reason,
                };
                self.ledger
                    .set_status(
                        &inbound,
                        ForwardStatus::Failed {
                            reason: failure.to_string(),
                            retryable: true,
                        },
                    )
                    .await;
                Err(failure)
            }
            // Stays Submitted for the reconciler.
            Ok(_) | Err(_) => Err(ForwardFailure::Unconfirmed { merchant_tx_hash }),
        }
    }

    /// Record a job that could not be queued, so the reconciler picks it up.
    pub async fn park(&self, job: &ForwardJob, failure: &ForwardFailure) {
        let split = self.split(job.gross);
        let parked = self
            .ledger
            .insert_if_absent(ForwardRecord {
                inbound_tx_hash: job.inbound,
                merchant: job.merchant,
                gross: split.gross,
                platform_fee: split.platform_fee,
                merchant_amount: split.merchant_amount,
                status: ForwardStatus::Failed {
                    reason: failure.to_string(),
                    retryable: true,
                },
                attempts: 0,
                updated_at_ms: now_ms(),
            })
            .await;
        if parked {
            tracing::warn!(inbound_tx = %job.inbound, error = %failure, "Forward parked for reconciliation");
        }
    }
}

/// A detached forward request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardJob {
    pub inbound: TxHash,
    pub merchant: Address,
    pub gross: U256,
}

/// Bounded hand-off from request tasks to background forwarding.
#[derive(Clone)]
pub struct ForwardQueue {
    tx: mpsc::Sender<ForwardJob>,
    forwarder: Arc<FundForwarder>,
}

impl ForwardQueue {
    /// Start the dispatcher. Each job runs as its own task; the per-hash
    /// lock and the outbound writer provide the ordering that matters.
    pub fn spawn(
        forwarder: Arc<FundForwarder>,
        capacity: usize,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<ForwardJob>(capacity.max(1));
        let dispatcher = forwarder.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => {
                        tracing::info!("Forward queue stopping");
                        break;
                    }
                    job = rx.recv() => {
                        let Some(job) = job else { break };
                        let forwarder = dispatcher.clone();
                        tokio::spawn(async move {
                            let _ = forwarder.forward(job.inbound, job.merchant, job.gross).await;
                        });
                    }
                }
            }
            rx.close();
            // Anything still queued is parked for the next run's reconciler.
            while let Ok(job) = rx.try_recv() {
                dispatcher
                    .park(&job, &ForwardFailure::Abandoned("shutdown before dispatch".to_string()))
                    .await;
            }
        });

        Self { tx, forwarder }
    }

    /// Queue a forward without waiting for it.
    pub async fn enqueue(&self, job: ForwardJob) -> Result<(), ForwardFailure> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                let failure = ForwardFailure::QueueFull;
                self.forwarder.park(&job, &failure).await;
                metrics::record_forward(failure.label());
                Err(failure)
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                let failure = ForwardFailure::Broadcast("forward queue closed".to_string());
                self.forwarder.park(&job, &failure).await;
                Err(failure)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::mock::{MockChain, MockSubmitter};
    use crate::lifecycle::Shutdown;

    const MILLI: u64 = 1_000_000_000_000_000;

    fn settings() -> ForwarderSettings {
        ForwarderSettings {
            fee_bps: 250,
            min_confirmations: 1,
            confirmation_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(5),
        }
    }

    fn setup(submitter: Option<MockSubmitter>, chain: Arc<MockChain>) -> (Arc<FundForwarder>, Option<Arc<MockSubmitter>>) {
        let submitter = submitter.map(Arc::new);
        let forwarder = FundForwarder::new(
            submitter.clone().map(|s| s as Arc<dyn TransferSubmitter>),
            chain,
            Arc::new(ForwardLedger::new(None)),
            settings(),
        );
        (Arc::new(forwarder), submitter)
    }

    fn merchant() -> Address {
        Address::repeat_byte(0x22)
    }

    #[tokio::test]
    async fn test_forward_splits_and_completes() {
        let chain = Arc::new(MockChain::new(10));
        let (forwarder, submitter) = setup(Some(MockSubmitter::new(chain.clone(), Address::repeat_byte(0x11))), chain);
        let submitter = submitter.unwrap();

        let result = forwarder
            .forward(TxHash::repeat_byte(1), merchant(), U256::from(MILLI))
            .await
            .unwrap();

        assert!(!result.replayed);
        assert_eq!(result.split.platform_fee_decimal(), "0.000025");
        assert_eq!(result.split.merchant_amount_decimal(), "0.000975");
        assert_eq!(submitter.transfers(), vec![(merchant(), U256::from(975_000_000_000_000u64))]);
        assert!(matches!(result.status, ForwardStatus::Completed { block_number: 10, .. }));
    }

    #[tokio::test]
    async fn test_concurrent_forwards_transfer_once() {
        let chain = Arc::new(MockChain::new(10));
        let submitter = MockSubmitter::new(chain.clone(), Address::repeat_byte(0x11)).with_delay(Duration::from_millis(30));
        let (forwarder, submitter) = setup(Some(submitter), chain);
        let submitter = submitter.unwrap();
        let inbound = TxHash::repeat_byte(2);

        let a = {
            let f = forwarder.clone();
            tokio::spawn(async move { f.forward(inbound, merchant(), U256::from(MILLI)).await })
        };
        let b = {
            let f = forwarder.clone();
            tokio::spawn(async move { f.forward(inbound, merchant(), U256::from(MILLI)).await })
        };
        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());

        assert_eq!(submitter.transfers().len(), 1);
        assert_eq!(a.merchant_tx_hash, b.merchant_tx_hash);
        assert!(a.replayed != b.replayed);
    }

    #[tokio::test]
    async fn test_repeat_after_completion_is_noop() {
        let chain = Arc::new(MockChain::new(10));
        let (forwarder, submitter) = setup(Some(MockSubmitter::new(chain.clone(), Address::repeat_byte(0x11))), chain);
        let inbound = TxHash::repeat_byte(3);

        let first = forwarder.forward(inbound, merchant(), U256::from(MILLI)).await.unwrap();
        let second = forwarder.forward(inbound, merchant(), U256::from(MILLI)).await.unwrap();

        assert!(second.replayed);
        assert_eq!(first.merchant_tx_hash, second.merchant_tx_hash);
        assert_eq!(submitter.unwrap().transfers().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_key_is_retryable_failure() {
        let chain = Arc::new(MockChain::new(10));
        let (forwarder, _) = setup(None, chain);
        let inbound = TxHash::repeat_byte(4);

        let err = forwarder.forward(inbound, merchant(), U256::from(MILLI)).await.unwrap_err();
        assert_eq!(err, ForwardFailure::SigningKeyUnavailable);
        assert!(err.is_retryable());
        let record = forwarder.ledger().get(&inbound).unwrap();
        assert!(matches!(record.status, ForwardStatus::Failed { retryable: true, .. }));
    }

    #[tokio::test]
    async fn test_broadcast_failure_then_retry_succeeds() {
        let chain = Arc::new(MockChain::new(10));
        let (forwarder, submitter) = setup(Some(MockSubmitter::new(chain.clone(), Address::repeat_byte(0x11))), chain);
        let submitter = submitter.unwrap();
        submitter.fail_next(1);
        let inbound = TxHash::repeat_byte(5);

        let err = forwarder.forward(inbound, merchant(), U256::from(MILLI)).await.unwrap_err();
        assert!(matches!(err, ForwardFailure::Broadcast(_)));

        let ok = forwarder.forward(inbound, merchant(), U256::from(MILLI)).await.unwrap();
        assert!(!ok.replayed);
        assert_eq!(forwarder.ledger().get(&inbound).unwrap().attempts, 2);
        assert_eq!(submitter.transfers().len(), 1);
    }

    #[tokio::test]
    async fn test_reverted_transfer_recorded() {
        let chain = Arc::new(MockChain::new(10));
        let (forwarder, submitter) = setup(Some(MockSubmitter::new(chain.clone(), Address::repeat_byte(0x11))), chain);
        submitter.unwrap().revert_transfers(true);

        let err = forwarder
            .forward(TxHash::repeat_byte(6), merchant(), U256::from(MILLI))
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardFailure::Reverted { .. }));
    }

    #[tokio::test]
    async fn test_dust_payment_has_nothing_to_forward() {
        let chain = Arc::new(MockChain::new(10));
        let mut s = settings();
        s.fee_bps = 10_000;
        let forwarder = FundForwarder::new(None, chain, Arc::new(ForwardLedger::new(None)), s);

        let err = forwarder
            .forward(TxHash::repeat_byte(7), merchant(), U256::from(100u64))
            .await
            .unwrap_err();
        assert_eq!(err, ForwardFailure::NothingToForward);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_queue_dispatches_jobs() {
        let chain = Arc::new(MockChain::new(10));
        let (forwarder, submitter) = setup(Some(MockSubmitter::new(chain.clone(), Address::repeat_byte(0x11))), chain);
        let submitter = submitter.unwrap();
        let shutdown = Shutdown::new();
        let queue = ForwardQueue::spawn(forwarder.clone(), 8, shutdown.subscribe());

        queue
            .enqueue(ForwardJob {
                inbound: TxHash::repeat_byte(8),
                merchant: merchant(),
                gross: U256::from(MILLI),
            })
            .await
            .unwrap();

        for _ in 0..100 {
            if matches!(
                forwarder.ledger().get(&TxHash::repeat_byte(8)).map(|r| r.status),
                Some(ForwardStatus::Completed { .. })
            ) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(submitter.transfers().len(), 1);
        shutdown.trigger();
    }

    #[tokio::test]
    async fn test_broadcast_timeout_is_never_resent() {
        let chain = Arc::new(MockChain::new(10));
        let (forwarder, submitter) = setup(Some(MockSubmitter::new(chain.clone(), Address::repeat_byte(0x11))), chain);
        let submitter = submitter.unwrap();
        submitter.time_out_next(1);
        let inbound = TxHash::repeat_byte(9);

        let err = forwarder.forward(inbound, merchant(), U256::from(MILLI)).await.unwrap_err();
        assert!(matches!(err, ForwardFailure::Indeterminate(_)));
        assert!(!err.is_retryable());

        // The node took the first transfer; a second call must not add one.
        let again = forwarder.forward(inbound, merchant(), U256::from(MILLI)).await.unwrap_err();
        assert!(matches!(again, ForwardFailure::Indeterminate(_)));
        assert_eq!(submitter.transfers().len(), 1);
        assert!(matches!(
            forwarder.ledger().get(&inbound).unwrap().status,
            ForwardStatus::Indeterminate { .. }
        ));
        assert!(forwarder.ledger().needing_attention().is_empty());
    }

    #[tokio::test]
    async fn test_pending_record_from_interrupted_run_not_resent() {
        let chain = Arc::new(MockChain::new(10));
        let (forwarder, submitter) = setup(Some(MockSubmitter::new(chain.clone(), Address::repeat_byte(0x11))), chain);
        let inbound = TxHash::repeat_byte(0x09);
        forwarder
            .ledger()
            .upsert(ForwardRecord {
                inbound_tx_hash: inbound,
                merchant: merchant(),
                gross: U256::from(1000u64),
                platform_fee: U256::from(25u64),
                merchant_amount: U256::from(975u64),
                status: ForwardStatus::Pending,
                attempts: 1,
                updated_at_ms: now_ms(),
            })
            .await;

        let err = forwarder.forward(inbound, merchant(), U256::from(1000u64)).await.unwrap_err();
        assert!(matches!(err, ForwardFailure::Indeterminate(_)));
        assert!(submitter.unwrap().transfers().is_empty());
        assert!(matches!(
            forwarder.ledger().get(&inbound).unwrap().status,
            ForwardStatus::Indeterminate { .. }
        ));
    }

    fn job(byte: u8) -> ForwardJob {
        ForwardJob {
            inbound: TxHash::repeat_byte(byte),
            merchant: merchant(),
            gross: U256::from(MILLI),
        }
    }

    fn parked_reason(forwarder: &FundForwarder, byte: u8) -> Option<String> {
        match forwarder.ledger().get(&TxHash::repeat_byte(byte))?.status {
            ForwardStatus::Failed {
                reason,
                retryable: true,
            } => Some(reason),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_full_queue_parks_job() {
        let chain = Arc::new(MockChain::new(10));
        let (forwarder, submitter) = setup(Some(MockSubmitter::new(chain.clone(), Address::repeat_byte(0x11))), chain);
        let shutdown = Shutdown::new();
        let queue = ForwardQueue::spawn(forwarder.clone(), 1, shutdown.subscribe());

        // The dispatcher has not been polled yet, so the second job finds no room.
        queue.enqueue(job(0x30)).await.unwrap();
        assert_eq!(queue.enqueue(job(0x31)).await, Err(ForwardFailure::QueueFull));

        assert_eq!(parked_reason(&forwarder, 0x31).as_deref(), Some("forward queue is full"));
        assert_eq!(forwarder.ledger().get(&TxHash::repeat_byte(0x31)).unwrap().attempts, 0);
        assert!(submitter.unwrap().transfers().is_empty());
        shutdown.trigger();
    }

    #[tokio::test]
    async fn test_shutdown_parks_queued_and_late_jobs() {
        let chain = Arc::new(MockChain::new(10));
        let (forwarder, submitter) = setup(Some(MockSubmitter::new(chain.clone(), Address::repeat_byte(0x11))), chain);
        let shutdown = Shutdown::new();
        let queue = ForwardQueue::spawn(forwarder.clone(), 4, shutdown.subscribe());

        queue.enqueue(job(0x40)).await.unwrap();
        queue.enqueue(job(0x41)).await.unwrap();
        shutdown.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;

        for byte in [0x40, 0x41] {
            assert_eq!(
                parked_reason(&forwarder, byte).as_deref(),
                Some("forward abandoned: shutdown before dispatch")
            );
        }

        let late = queue.enqueue(job(0x42)).await.unwrap_err();
        assert_eq!(late, ForwardFailure::Broadcast("forward queue closed".to_string()));
        assert!(parked_reason(&forwarder, 0x42).is_some());

        assert!(submitter.unwrap().transfers().is_empty());
        assert_eq!(forwarder.ledger().needing_attention().len(), 3);
    }
}
