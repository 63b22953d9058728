//! Content catalog and confirmed-payment ledger.
//!
//! Both are traits so a database-backed store can replace the in-memory
//! implementations seeded from configuration.

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::config::schema::ContentEntry;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    #[error("transaction {tx_hash} already used for content '{content_id}'")]
    Conflict { tx_hash: TxHash, content_id: String },
}

#[async_trait]
pub trait ContentCatalog: Send + Sync {
    /// Active entry for `id`. Inactive entries are reported as absent.
    async fn get_content_by_id(&self, id: &str) -> Result<Option<ContentEntry>, CatalogError>;
}

/// A payment accepted for a piece of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedPayment {
    pub tx_hash: TxHash,
    pub content_id: String,
    pub buyer: Address,
    pub amount: U256,
    pub block_number: Option<u64>,
    pub recorded_at_ms: u64,
}

#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Store `payment`. Recording the same transaction for the same content
    /// again is a no-op; for a different content it is a `Conflict`.
    async fn record_confirmed_payment(&self, payment: ConfirmedPayment) -> Result<(), CatalogError>;

    async fn has_confirmed_payment(&self, content_id: &str, buyer: Address) -> Result<bool, CatalogError>;

    async fn find_by_tx(&self, tx_hash: TxHash) -> Result<Option<ConfirmedPayment>, CatalogError>;
}

/// Catalog held in memory.
#[derive(Default)]
pub struct InMemoryCatalog {
    entries: DashMap<String, ContentEntry>,
}

impl InMemoryCatalog {
    pub fn from_entries(entries: impl IntoIterator<Item = ContentEntry>) -> Self {
        let catalog = Self::default();
        for entry in entries {
            catalog.entries.insert(entry.id.clone(), entry);
        }
        catalog
    }

    pub fn insert(&self, entry: ContentEntry) {
        self.entries.insert(entry.id.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ContentCatalog for InMemoryCatalog {
    async fn get_content_by_id(&self, id: &str) -> Result<Option<ContentEntry>, CatalogError> {
        Ok(self
            .entries
            .get(id)
            .filter(|e| e.is_active)
            .map(|e| e.value().clone()))
    }
}

#[derive(Default)]
pub struct InMemoryPaymentLedger {
    by_tx: DashMap<TxHash, ConfirmedPayment>,
}

impl InMemoryPaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentLedger for InMemoryPaymentLedger {
    async fn record_confirmed_payment(&self, payment: ConfirmedPayment) -> Result<(), CatalogError> {
        match self.by_tx.entry(payment.tx_hash) {
            Entry::Occupied(existing) if existing.get().content_id != payment.content_id => {
                Err(CatalogError::Conflict {
                    tx_hash: payment.tx_hash,
                    content_id: existing.get().content_id.clone(),
                })
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(payment);
                Ok(())
            }
        }
    }

    async fn has_confirmed_payment(&self, content_id: &str, buyer: Address) -> Result<bool, CatalogError> {
        Ok(self
            .by_tx
            .iter()
            .any(|p| p.content_id == content_id && p.buyer == buyer))
    }

    async fn find_by_tx(&self, tx_hash: TxHash) -> Result<Option<ConfirmedPayment>, CatalogError> {
        Ok(self.by_tx.get(&tx_hash).map(|p| p.value().clone()))
    }
}
