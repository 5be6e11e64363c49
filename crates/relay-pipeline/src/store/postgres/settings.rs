//! Application setting stores
//!
//! Settings are edited on the response network and mirrored to the
//! request network, keyed by the setting name.

use super::{
    checksum_exists, complete_import_batch, insert_export_batch, insert_import_batch,
    record_export_failure, record_import_failure,
};
use crate::store::{ExportSource, ImportTarget, PendingRecord};
use crate::transfer::SettingTransfer;
use crate::types::{ExportBatchRow, ImportBatchRow, ImportStats};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Selects settings flagged for synchronization.
pub struct SettingExportSource {
    pool: PgPool,
}

impl SettingExportSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExportSource for SettingExportSource {
    type Transfer = SettingTransfer;

    async fn select_pending(&self, limit: usize) -> Result<Vec<PendingRecord<SettingTransfer>>> {
        let rows = sqlx::query(
            r#"
            SELECT id, key, value, category, updated_at
            FROM settings
            WHERE sync_pending
            ORDER BY updated_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut pending = Vec::with_capacity(rows.len());
        for row in rows {
            pending.push(PendingRecord {
                id: row.try_get("id")?,
                transfer: SettingTransfer {
                    key: row.try_get("key")?,
                    value: row.try_get("value")?,
                    category: row.try_get("category")?,
                    timestamp: row.try_get("updated_at")?,
                },
            });
        }
        Ok(pending)
    }

    async fn mark_exported(&self, record_ids: &[Uuid], batch: &ExportBatchRow) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_export_batch(&mut tx, batch).await?;
        sqlx::query(
            r#"
            UPDATE settings
            SET sync_pending = FALSE, exported_at = NOW(), export_batch_id = $1
            WHERE id = ANY($2)
            "#,
        )
        .bind(batch.id)
        .bind(record_ids)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_failure(&self, batch: &ExportBatchRow) -> Result<()> {
        record_export_failure(&self.pool, batch).await
    }
}

/// Upserts mirrored settings, last write wins by `updated_at`.
pub struct SettingImportTarget {
    pool: PgPool,
}

impl SettingImportTarget {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImportTarget for SettingImportTarget {
    type Transfer = SettingTransfer;

    async fn seen_checksum(&self, checksum: &str) -> Result<bool> {
        checksum_exists(&self.pool, checksum).await
    }

    async fn apply_batch(
        &self,
        batch: &ImportBatchRow,
        records: &[SettingTransfer],
    ) -> Result<ImportStats> {
        let mut tx = self.pool.begin().await?;
        insert_import_batch(&mut tx, batch).await?;

        let mut stats = ImportStats::default();
        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO settings (id, key, value, category, updated_at, sync_pending)
                VALUES ($1, $2, $3, $4, $5, FALSE)
                ON CONFLICT (key) DO UPDATE
                SET value = EXCLUDED.value,
                    category = EXCLUDED.category,
                    updated_at = EXCLUDED.updated_at
                WHERE settings.updated_at < EXCLUDED.updated_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&record.key)
            .bind(&record.value)
            .bind(&record.category)
            .bind(record.timestamp)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                stats.skipped_stale += 1;
            } else {
                stats.applied += 1;
            }
        }

        complete_import_batch(&mut tx, batch.id).await?;
        tx.commit().await?;
        Ok(stats)
    }

    async fn record_failure(&self, batch: &ImportBatchRow) -> Result<()> {
        record_import_failure(&self.pool, batch).await
    }
}
