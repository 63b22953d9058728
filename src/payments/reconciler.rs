//! Out-of-band settlement of forwards that did not finish inline.
//!
//! Each pass re-checks `Submitted` records once and retries retryable
//! failures whose backoff has elapsed. `Indeterminate` records are left for
//! an operator. Idle per-hash locks are dropped at the end of a pass.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::payments::forwarder::FundForwarder;
use crate::payments::ledger::{now_ms, ForwardStatus};
use crate::resilience::backoff::RetryPolicy;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub checked: usize,
    pub completed: usize,
    pub retried: usize,
    pub exhausted: usize,
}

pub struct Reconciler {
    forwarder: Arc<FundForwarder>,
    policy: RetryPolicy,
    interval: Duration,
}

impl Reconciler {
    pub fn new(forwarder: Arc<FundForwarder>, policy: RetryPolicy, interval: Duration) -> Self {
        Self {
            forwarder,
            policy,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Forward reconciler started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let summary = self.reconcile_once().await;
                    if summary.checked > 0 {
                        tracing::info!(
                            checked = summary.checked,
                            completed = summary.completed,
                            retried = summary.retried,
                            exhausted = summary.exhausted,
                            "Reconciliation pass finished"
                        );
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
        tracing::info!("Forward reconciler stopped");
    }

    pub async fn reconcile_once(&self) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let now = now_ms();

        for record in self.forwarder.ledger().needing_attention() {
            summary.checked += 1;
            match &record.status {
                ForwardStatus::Submitted { .. } => {
                    if self.forwarder.refresh_submitted(&record).await.is_ok() {
                        summary.completed += 1;
                    }
                }
                ForwardStatus::Failed { reason, .. } => {
                    if !self.policy.allows(record.attempts) {
                        self.forwarder
                            .ledger()
                            .set_status(
                                &record.inbound_tx_hash,
                                ForwardStatus::Failed {
                                    reason: format!("retry budget exhausted: {}", reason),
                                    retryable: false,
                                },
                            )
                            .await;
                        tracing::error!(
                            inbound_tx = %record.inbound_tx_hash,
                            attempts = record.attempts,
                            "Merchant forward needs manual settlement"
                        );
                        summary.exhausted += 1;
                        continue;
                    }
                    let due = record.updated_at_ms + self.policy.delay_after(record.attempts).as_millis() as u64;
                    if now < due {
                        continue;
                    }
                    summary.retried += 1;
                    if self
                        .forwarder
                        .forward(record.inbound_tx_hash, record.merchant, record.gross)
                        .await
                        .is_ok()
                    {
                        summary.completed += 1;
                    }
                }
                _ => {}
            }
        }
        self.forwarder.ledger().prune_locks();
        summary
    }
}
