//! Store seams for the batch pipeline
//!
//! The producer and consumer are generic over these traits; one
//! implementation per record type replaces the near-duplicate per-type
//! task code the pipeline would otherwise accumulate. Postgres-backed
//! implementations live in [`postgres`], in-memory implementations
//! (used by tests and local experiments) in [`memory`].
//!
//! Transactionality is owned by the implementations: `mark_exported`
//! and `apply_batch` each run as a single store transaction, so the
//! record-status lifecycle (`pending -> exported`,
//! `exported -> completed/failed`) is only ever mutated by the
//! pipeline.

pub mod memory;
pub mod postgres;

use crate::transfer::TransferRecord;
use crate::types::{ExportBatchRow, ImportBatchRow, ImportStats};
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// A domain record selected for export, paired with its wire form.
#[derive(Debug, Clone)]
pub struct PendingRecord<T> {
    /// Domain-side primary key, used to flip the record to `exported`
    pub id: Uuid,
    pub transfer: T,
}

/// Source-store strategy for one pipeline direction's producer.
#[async_trait]
pub trait ExportSource: Send + Sync {
    type Transfer: TransferRecord;

    /// Select up to `limit` eligible records, highest priority first,
    /// oldest first among ties, already converted to their transfer
    /// form via an explicit field allow-list.
    async fn select_pending(&self, limit: usize) -> Result<Vec<PendingRecord<Self::Transfer>>>;

    /// In a single transaction: insert the export ledger row and mark
    /// every selected record `exported` (with `exported_at` and
    /// `export_batch_id`).
    async fn mark_exported(&self, record_ids: &[Uuid], batch: &ExportBatchRow) -> Result<()>;

    /// Record a `failed` ledger row for a batch whose export aborted.
    /// Runs in its own transaction, after the export transaction has
    /// rolled back, so the failure is auditable.
    async fn record_failure(&self, batch: &ExportBatchRow) -> Result<()>;
}

/// Destination-store strategy for one pipeline direction's consumer.
#[async_trait]
pub trait ImportTarget: Send + Sync {
    type Transfer: TransferRecord;

    /// Whether a batch with this checksum has been imported before.
    /// Only `completed` ledger rows count; a `failed` row must not
    /// block a later manual re-delivery of the same content.
    async fn seen_checksum(&self, checksum: &str) -> Result<bool>;

    /// In a single transaction: insert the import ledger row, upsert
    /// every record by natural key, and mark the ledger row completed.
    ///
    /// A record whose referenced domain entity does not exist is
    /// counted in `skipped_missing` and logged, never failing the
    /// batch; a record older than the stored state is counted in
    /// `skipped_stale` (last-write-wins).
    async fn apply_batch(
        &self,
        batch: &ImportBatchRow,
        records: &[Self::Transfer],
    ) -> Result<ImportStats>;

    /// Record a `failed` ledger row for a batch whose import aborted.
    /// Runs in its own transaction, after the import transaction has
    /// rolled back, so the failure reason survives for operators.
    async fn record_failure(&self, batch: &ImportBatchRow) -> Result<()>;
}

// Shared handles delegate, so a store can be held by both a pipeline
// and the code observing it.
#[async_trait]
impl<S: ExportSource> ExportSource for std::sync::Arc<S> {
    type Transfer = S::Transfer;

    async fn select_pending(&self, limit: usize) -> Result<Vec<PendingRecord<Self::Transfer>>> {
        (**self).select_pending(limit).await
    }

    async fn mark_exported(&self, record_ids: &[Uuid], batch: &ExportBatchRow) -> Result<()> {
        (**self).mark_exported(record_ids, batch).await
    }

    async fn record_failure(&self, batch: &ExportBatchRow) -> Result<()> {
        (**self).record_failure(batch).await
    }
}

#[async_trait]
impl<T: ImportTarget> ImportTarget for std::sync::Arc<T> {
    type Transfer = T::Transfer;

    async fn seen_checksum(&self, checksum: &str) -> Result<bool> {
        (**self).seen_checksum(checksum).await
    }

    async fn apply_batch(
        &self,
        batch: &ImportBatchRow,
        records: &[Self::Transfer],
    ) -> Result<ImportStats> {
        (**self).apply_batch(batch, records).await
    }

    async fn record_failure(&self, batch: &ImportBatchRow) -> Result<()> {
        (**self).record_failure(batch).await
    }
}
