//! In-memory store implementations
//!
//! Dependency-injected fakes mirroring the Postgres stores' semantics:
//! priority-ordered selection, checksum-keyed duplicate detection,
//! upsert by natural key with last-write-wins, and optional referential
//! gap simulation. Used by the integration tests and handy for running
//! a pipeline direction without a database.

use super::{ExportSource, ImportTarget, PendingRecord};
use crate::transfer::TransferRecord;
use crate::types::{BatchStatus, ExportBatchRow, ImportBatchRow, ImportStats};
use anyhow::Result;
use async_trait::async_trait;
use relay_common::RelayError;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One exportable record held by [`MemoryExportSource`].
#[derive(Debug, Clone)]
pub struct MemoryPending<T> {
    pub id: Uuid,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub exported: bool,
    pub transfer: T,
}

/// In-memory export source with a priority-ordered pending queue.
#[derive(Default)]
pub struct MemoryExportSource<T> {
    records: Mutex<Vec<MemoryPending<T>>>,
    ledger: Mutex<Vec<ExportBatchRow>>,
}

impl<T: TransferRecord> MemoryExportSource<T> {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            ledger: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, id: Uuid, priority: i32, created_at: DateTime<Utc>, transfer: T) {
        lock(&self.records).push(MemoryPending {
            id,
            priority,
            created_at,
            exported: false,
            transfer,
        });
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.records).iter().filter(|r| !r.exported).count()
    }

    pub fn ledger_rows(&self) -> Vec<ExportBatchRow> {
        lock(&self.ledger).clone()
    }
}

#[async_trait]
impl<T: TransferRecord> ExportSource for MemoryExportSource<T> {
    type Transfer = T;

    async fn select_pending(&self, limit: usize) -> Result<Vec<PendingRecord<T>>> {
        let records = lock(&self.records);
        let mut eligible: Vec<&MemoryPending<T>> =
            records.iter().filter(|r| !r.exported).collect();
        eligible.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(eligible
            .into_iter()
            .take(limit)
            .map(|r| PendingRecord {
                id: r.id,
                transfer: r.transfer.clone(),
            })
            .collect())
    }

    async fn mark_exported(&self, record_ids: &[Uuid], batch: &ExportBatchRow) -> Result<()> {
        let mut records = lock(&self.records);
        for record in records.iter_mut() {
            if record_ids.contains(&record.id) {
                record.exported = true;
            }
        }
        lock(&self.ledger).push(batch.clone());
        Ok(())
    }

    async fn record_failure(&self, batch: &ExportBatchRow) -> Result<()> {
        lock(&self.ledger).push(batch.clone());
        Ok(())
    }
}

/// In-memory import target with checksum dedup and last-write-wins.
pub struct MemoryImportTarget<T> {
    /// Natural keys of domain entities that exist on this side; `None`
    /// accepts every record (no referential precondition).
    known_keys: Option<HashSet<String>>,
    applied: Mutex<HashMap<String, T>>,
    ledger: Mutex<Vec<ImportBatchRow>>,
    writes: Mutex<u64>,
    fail_message: Mutex<Option<String>>,
}

impl<T: TransferRecord> MemoryImportTarget<T> {
    pub fn new() -> Self {
        Self {
            known_keys: None,
            applied: Mutex::new(HashMap::new()),
            ledger: Mutex::new(Vec::new()),
            writes: Mutex::new(0),
            fail_message: Mutex::new(None),
        }
    }

    /// Only records whose natural key is in `keys` will apply; the
    /// rest are counted as referential gaps.
    pub fn with_known_keys(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            known_keys: Some(keys.into_iter().collect()),
            ..Self::new()
        }
    }

    pub fn applied_record(&self, key: &str) -> Option<T> {
        lock(&self.applied).get(key).cloned()
    }

    pub fn applied_count(&self) -> usize {
        lock(&self.applied).len()
    }

    pub fn ledger_rows(&self) -> Vec<ImportBatchRow> {
        lock(&self.ledger).clone()
    }

    /// Number of record writes performed, across all batches. Lets
    /// tests assert that a duplicate import performs zero writes.
    pub fn write_count(&self) -> u64 {
        *lock(&self.writes)
    }

    /// Makes the next `apply_batch` call fail with a database error,
    /// leaving no records applied. One-shot.
    pub fn fail_next_apply(&self, message: impl Into<String>) {
        *lock(&self.fail_message) = Some(message.into());
    }
}

impl<T: TransferRecord> Default for MemoryImportTarget<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: TransferRecord> ImportTarget for MemoryImportTarget<T> {
    type Transfer = T;

    async fn seen_checksum(&self, checksum: &str) -> Result<bool> {
        Ok(lock(&self.ledger)
            .iter()
            .any(|b| b.status == BatchStatus::Completed && b.checksum == checksum))
    }

    async fn apply_batch(&self, batch: &ImportBatchRow, records: &[T]) -> Result<ImportStats> {
        if let Some(message) = lock(&self.fail_message).take() {
            return Err(RelayError::Database(message).into());
        }

        let mut stats = ImportStats::default();
        {
            let mut applied = lock(&self.applied);
            for record in records {
                let key = record.natural_key();

                if let Some(known) = &self.known_keys {
                    if !known.contains(&key) {
                        warn!(
                            batch_id = %batch.id,
                            natural_key = %key,
                            "referenced entity not found, skipping record"
                        );
                        stats.skipped_missing += 1;
                        continue;
                    }
                }

                match applied.get(&key) {
                    Some(existing)
                        if existing.record_timestamp() >= record.record_timestamp() =>
                    {
                        stats.skipped_stale += 1;
                    }
                    _ => {
                        applied.insert(key, record.clone());
                        *lock(&self.writes) += 1;
                        stats.applied += 1;
                    }
                }
            }
        }

        let mut completed = batch.clone();
        completed.status = BatchStatus::Completed;
        completed.processed_at = Some(Utc::now());
        lock(&self.ledger).push(completed);

        Ok(stats)
    }

    async fn record_failure(&self, batch: &ImportBatchRow) -> Result<()> {
        lock(&self.ledger).push(batch.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::transfer::SettingTransfer;
    use chrono::TimeZone;
    use serde_json::json;

    fn setting(key: &str, value: i64, ts_secs: u32) -> SettingTransfer {
        SettingTransfer {
            key: key.to_string(),
            value: json!(value),
            category: None,
            timestamp: Utc.with_ymd_and_hms(2025, 1, 15, 14, 30, ts_secs).unwrap(),
        }
    }

    fn batch_row(checksum: &str) -> ImportBatchRow {
        ImportBatchRow {
            id: Uuid::new_v4(),
            batch_type: crate::types::BatchType::Settings,
            filename: "f.jsonl".to_string(),
            file_path: "/tmp/f.jsonl".to_string(),
            record_count: 1,
            file_size_bytes: 10,
            checksum: checksum.to_string(),
            status: BatchStatus::Processing,
            source_batch_id: None,
            error_message: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    #[tokio::test]
    async fn test_select_orders_by_priority_then_age() {
        let source = MemoryExportSource::<SettingTransfer>::new();
        let base = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        source.push(a, 5, base, setting("a", 1, 0));
        source.push(b, 8, base + chrono::Duration::seconds(10), setting("b", 1, 0));
        source.push(c, 5, base + chrono::Duration::seconds(5), setting("c", 1, 0));

        let selected = source.select_pending(10).await.unwrap();
        let ids: Vec<Uuid> = selected.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b, a, c]);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let target = MemoryImportTarget::<SettingTransfer>::new();

        let newer = setting("page_size", 50, 30);
        let stale = setting("page_size", 25, 10);

        let stats = target
            .apply_batch(&batch_row("c1"), &[newer.clone()])
            .await
            .unwrap();
        assert_eq!(stats.applied, 1);

        let stats = target.apply_batch(&batch_row("c2"), &[stale]).await.unwrap();
        assert_eq!(stats.skipped_stale, 1);
        assert_eq!(target.applied_record("page_size").unwrap(), newer);
    }

    #[tokio::test]
    async fn test_failed_ledger_row_does_not_mark_checksum_seen() {
        let target = MemoryImportTarget::<SettingTransfer>::new();

        target.fail_next_apply("connection reset");
        let err = target
            .apply_batch(&batch_row("c9"), &[setting("a", 1, 0)])
            .await
            .unwrap_err();
        assert!(RelayError::chain_is_transient(&err));

        let mut failed = batch_row("c9");
        failed.status = BatchStatus::Failed;
        failed.error_message = Some("connection reset".to_string());
        target.record_failure(&failed).await.unwrap();

        // A failed delivery must not block a later retry of the same file.
        assert!(!target.seen_checksum("c9").await.unwrap());

        let stats = target
            .apply_batch(&batch_row("c9"), &[setting("a", 1, 0)])
            .await
            .unwrap();
        assert_eq!(stats.applied, 1);
        assert!(target.seen_checksum("c9").await.unwrap());
    }

    #[tokio::test]
    async fn test_referential_gap_skips_record() {
        let target =
            MemoryImportTarget::<SettingTransfer>::with_known_keys(["known".to_string()]);
        let stats = target
            .apply_batch(
                &batch_row("c3"),
                &[setting("known", 1, 0), setting("unknown", 2, 0)],
            )
            .await
            .unwrap();
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.skipped_missing, 1);
    }
}
