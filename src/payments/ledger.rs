//! Forward records keyed by inbound transaction hash.
//!
//! # Responsibilities
//! - Remember every merchant forward ever attempted (never deleted here)
//! - Hand out one async lock per inbound hash so concurrent forwards of the
//!   same payment serialize and observe each other's result
//! - Optional persistence so a restart does not forget completed work
//!
//! # Design Decisions
//! - The file is a journal of JSON lines, one full record per change; the
//!   last line for a hash wins on load. A write costs one line, not the
//!   whole ledger
//! - Writes run on the blocking pool and are awaited, so a record is on disk
//!   before the caller acts on it
//! - `save_to_file` compacts the journal to one line per record

use alloy::primitives::{Address, TxHash, U256};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lifecycle of one merchant forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ForwardStatus {
    /// Claimed, transfer not yet accepted by the node.
    Pending,
    /// Broadcast; waiting for confirmation or reconciliation.
    Submitted { merchant_tx_hash: TxHash },
    Completed { merchant_tx_hash: TxHash, block_number: u64 },
    Failed { reason: String, retryable: bool },
    /// Broadcast outcome unknown. Needs an operator; never retried automatically.
    Indeterminate { reason: String },
}

impl ForwardStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ForwardStatus::Pending => "pending",
            ForwardStatus::Submitted { .. } => "submitted",
            ForwardStatus::Completed { .. } => "completed",
            ForwardStatus::Failed { .. } => "failed",
            ForwardStatus::Indeterminate { .. } => "indeterminate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRecord {
    pub inbound_tx_hash: TxHash,
    pub merchant: Address,
    pub gross: U256,
    pub platform_fee: U256,
    pub merchant_amount: U256,
    pub status: ForwardStatus,
    pub attempts: u32,
    /// Unix milliseconds of the last change.
    pub updated_at_ms: u64,
}

/// Counts per status, for health reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub pending: usize,
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
    pub indeterminate: usize,
}

/// Append handle on the journal file.
struct Journal {
    path: PathBuf,
    file: std::sync::Mutex<File>,
}

impl Journal {
    fn open(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            file: std::sync::Mutex::new(open_append(path)?),
        })
    }

    fn append(&self, record: &ForwardRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        file.write_all(&line)?;
        file.sync_data()
    }

    /// Replace the journal with one line per record. The snapshot is taken
    /// under the file lock so no append falls between it and the rename.
    fn compact(&self, snapshot: impl FnOnce() -> Vec<ForwardRecord>) -> std::io::Result<()> {
        let mut file = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let records = snapshot();
        let tmp = self.path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for record in &records {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
            writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        *file = open_append(&self.path)?;
        Ok(())
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[derive(Default)]
pub struct ForwardLedger {
    records: DashMap<TxHash, ForwardRecord>,
    locks: DashMap<TxHash, Arc<Mutex<()>>>,
    journal: Option<Arc<Journal>>,
}

impl ForwardLedger {
    /// An in-memory ledger, or one journaled to `persistence_path`.
    pub fn new(persistence_path: Option<PathBuf>) -> Self {
        let journal = persistence_path.and_then(|path| match Journal::open(&path) {
            Ok(journal) => Some(Arc::new(journal)),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Forward journal unavailable; ledger is memory only");
                None
            }
        });
        Self {
            records: DashMap::new(),
            locks: DashMap::new(),
            journal,
        }
    }

    /// Replay the journal at `path` if it exists; later writes append to it.
    pub fn load_from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let records = DashMap::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: ForwardRecord = serde_json::from_str(&line)?;
                records.insert(record.inbound_tx_hash, record);
            }
            tracing::info!(path = %path.display(), records = records.len(), "Loaded forward ledger");
        }
        let ledger = Self {
            records,
            locks: DashMap::new(),
            journal: Some(Arc::new(Journal::open(path)?)),
        };
        ledger.save_to_file()?;
        Ok(ledger)
    }

    /// Compact the journal. A no-op for in-memory ledgers.
    pub fn save_to_file(&self) -> std::io::Result<()> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        journal.compact(|| {
            let mut records: Vec<ForwardRecord> = self.records.iter().map(|r| r.value().clone()).collect();
            records.sort_by_key(|r| r.updated_at_ms);
            records
        })
    }

    /// Serialize work on one inbound hash.
    pub async fn lock(&self, inbound: TxHash) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(inbound)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop per-hash locks nobody holds or waits on. Returns how many remain.
    pub fn prune_locks(&self) -> usize {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        self.locks.len()
    }

    pub fn get(&self, inbound: &TxHash) -> Option<ForwardRecord> {
        self.records.get(inbound).map(|r| r.value().clone())
    }

    pub async fn upsert(&self, record: ForwardRecord) {
        self.records.insert(record.inbound_tx_hash, record.clone());
        self.persist(record).await;
    }

    /// Insert only when no record exists. Returns whether it was inserted.
    pub async fn insert_if_absent(&self, record: ForwardRecord) -> bool {
        let inserted = match self.records.entry(record.inbound_tx_hash) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record.clone());
                true
            }
        };
        if inserted {
            self.persist(record).await;
        }
        inserted
    }

    /// Move a record to `status`. Returns the updated record.
    pub async fn set_status(&self, inbound: &TxHash, status: ForwardStatus) -> Option<ForwardRecord> {
        let updated = self.records.get_mut(inbound).map(|mut r| {
            r.status = status;
            r.updated_at_ms = now_ms();
            r.clone()
        });
        if let Some(record) = &updated {
            self.persist(record.clone()).await;
        }
        updated
    }

    /// Records the reconciler should look at: submitted or retryable failures.
    pub fn needing_attention(&self) -> Vec<ForwardRecord> {
        self.records
            .iter()
            .filter(|r| {
                matches!(
                    r.status,
                    ForwardStatus::Submitted { .. } | ForwardStatus::Failed { retryable: true, .. }
                )
            })
            .map(|r| r.value().clone())
            .collect()
    }

    pub fn summary(&self) -> LedgerSummary {
        let mut summary = LedgerSummary::default();
        for r in self.records.iter() {
            match r.status {
                ForwardStatus::Pending => summary.pending += 1,
                ForwardStatus::Submitted { .. } => summary.submitted += 1,
                ForwardStatus::Completed { .. } => summary.completed += 1,
                ForwardStatus::Failed { .. } => summary.failed += 1,
                ForwardStatus::Indeterminate { .. } => summary.indeterminate += 1,
            }
        }
        summary
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    async fn persist(&self, record: ForwardRecord) {
        let Some(journal) = self.journal.clone() else {
            return;
        };
        let inbound = record.inbound_tx_hash;
        let result = tokio::task::spawn_blocking(move || journal.append(&record))
            .await
            .map_err(std::io::Error::other)
            .and_then(|r| r);
        if let Err(e) = result {
            tracing::error!(inbound_tx = %inbound, error = %e, "Failed to persist forward record");
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(byte: u8, status: ForwardStatus) -> ForwardRecord {
        ForwardRecord {
            inbound_tx_hash: TxHash::repeat_byte(byte),
            merchant: Address::repeat_byte(0x22),
            gross: U256::from(1000u64),
            platform_fee: U256::from(25u64),
            merchant_amount: U256::from(975u64),
            status,
            attempts: 1,
            updated_at_ms: now_ms(),
        }
    }

    #[tokio::test]
    async fn test_insert_if_absent_keeps_first() {
        let ledger = ForwardLedger::new(None);
        assert!(ledger.insert_if_absent(record(1, ForwardStatus::Pending)).await);
        assert!(
            !ledger
                .insert_if_absent(record(
                    1,
                    ForwardStatus::Failed {
                        reason: "x".into(),
                        retryable: true
                    }
                ))
                .await
        );
        assert_eq!(ledger.get(&TxHash::repeat_byte(1)).unwrap().status, ForwardStatus::Pending);
    }

    #[tokio::test]
    async fn test_needing_attention_filters_terminal_states() {
        let ledger = ForwardLedger::new(None);
        let statuses = [
            ForwardStatus::Submitted {
                merchant_tx_hash: TxHash::repeat_byte(0xee),
            },
            ForwardStatus::Completed {
                merchant_tx_hash: TxHash::repeat_byte(0xef),
                block_number: 9,
            },
            ForwardStatus::Failed {
                reason: "rpc".into(),
                retryable: true,
            },
            ForwardStatus::Failed {
                reason: "nothing".into(),
                retryable: false,
            },
            ForwardStatus::Indeterminate { reason: "timeout".into() },
        ];
        for (byte, status) in (1u8..).zip(statuses) {
            ledger.upsert(record(byte, status)).await;
        }

        let mut hashes: Vec<TxHash> = ledger.needing_attention().into_iter().map(|r| r.inbound_tx_hash).collect();
        hashes.sort();
        assert_eq!(hashes, vec![TxHash::repeat_byte(1), TxHash::repeat_byte(3)]);

        let summary = ledger.summary();
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.indeterminate, 1);
    }

    #[tokio::test]
    async fn test_journal_replays_latest_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forwards.jsonl");

        let ledger = ForwardLedger::new(Some(path.clone()));
        ledger.upsert(record(7, ForwardStatus::Pending)).await;
        ledger
            .set_status(
                &TxHash::repeat_byte(7),
                ForwardStatus::Completed {
                    merchant_tx_hash: TxHash::repeat_byte(0xee),
                    block_number: 42,
                },
            )
            .await;
        ledger.upsert(record(8, ForwardStatus::Pending)).await;

        // One line per change until compaction.
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);

        let restored = ForwardLedger::load_from_file(&path).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get(&TxHash::repeat_byte(7)), ledger.get(&TxHash::repeat_byte(7)));
        assert_eq!(restored.get(&TxHash::repeat_byte(8)).unwrap().status, ForwardStatus::Pending);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);

        // Writes after a reload keep appending to the compacted file.
        restored
            .set_status(&TxHash::repeat_byte(8), ForwardStatus::Indeterminate { reason: "crash".into() })
            .await;
        drop(restored);
        let again = ForwardLedger::load_from_file(&path).unwrap();
        assert!(matches!(
            again.get(&TxHash::repeat_byte(8)).unwrap().status,
            ForwardStatus::Indeterminate { .. }
        ));
    }

    #[tokio::test]
    async fn test_idle_locks_pruned() {
        let ledger = ForwardLedger::new(None);
        let held = ledger.lock(TxHash::repeat_byte(1)).await;
        drop(ledger.lock(TxHash::repeat_byte(2)).await);
        drop(ledger.lock(TxHash::repeat_byte(3)).await);

        assert_eq!(ledger.prune_locks(), 1);
        drop(held);
        assert_eq!(ledger.prune_locks(), 0);
    }

    #[tokio::test]
    async fn test_lock_serializes_same_hash() {
        let ledger = Arc::new(ForwardLedger::new(None));
        let hash = TxHash::repeat_byte(1);

        let guard = ledger.lock(hash).await;
        let contender = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                let _g = ledger.lock(hash).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // Other hashes are independent.
        let _other = ledger.lock(TxHash::repeat_byte(2)).await;

        drop(guard);
        contender.await.unwrap();
    }
}
