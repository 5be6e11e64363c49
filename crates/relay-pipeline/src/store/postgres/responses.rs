//! Response stores
//!
//! The response network exports executed query results; the request
//! network imports them back onto the originating `requests` rows.

use super::{
    checksum_exists, complete_import_batch, insert_export_batch, insert_import_batch,
    record_export_failure, record_import_failure,
};
use crate::store::{ExportSource, ImportTarget, PendingRecord};
use crate::transfer::ResponseTransfer;
use crate::types::{ExportBatchRow, ImportBatchRow, ImportStats};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

/// Selects executed, not-yet-exported results on the response network.
pub struct ResponseExportSource {
    pool: PgPool,
}

impl ResponseExportSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExportSource for ResponseExportSource {
    type Transfer = ResponseTransfer;

    async fn select_pending(&self, limit: usize) -> Result<Vec<PendingRecord<ResponseTransfer>>> {
        let rows = sqlx::query(
            r#"
            SELECT id, original_request_id, result_data, result_count,
                   execution_time_ms, search_took_ms, cache_hit, executed_at
            FROM incoming_requests
            WHERE status = 'completed'
            ORDER BY priority DESC, executed_at ASC
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
                transfer: ResponseTransfer {
                    original_request_id: row.try_get("original_request_id")?,
                    result_data: row.try_get("result_data")?,
                    result_count: row.try_get("result_count")?,
                    execution_time_ms: row.try_get("execution_time_ms")?,
                    search_took_ms: row.try_get("search_took_ms")?,
                    cache_hit: row.try_get("cache_hit")?,
                    timestamp: row.try_get("executed_at")?,
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
            UPDATE incoming_requests
            SET status = 'exported', exported_at = NOW(), export_batch_id = $1
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

/// Applies imported results on the request network.
pub struct ResponseImportTarget {
    pool: PgPool,
}

impl ResponseImportTarget {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImportTarget for ResponseImportTarget {
    type Transfer = ResponseTransfer;

    async fn seen_checksum(&self, checksum: &str) -> Result<bool> {
        checksum_exists(&self.pool, checksum).await
    }

    async fn apply_batch(
        &self,
        batch: &ImportBatchRow,
        records: &[ResponseTransfer],
    ) -> Result<ImportStats> {
        let mut tx = self.pool.begin().await?;
        insert_import_batch(&mut tx, batch).await?;

        let mut stats = ImportStats::default();
        for record in records {
            let result = sqlx::query(
                r#"
                UPDATE requests
                SET result_data = $2,
                    result_count = $3,
                    execution_time_ms = $4,
                    search_took_ms = $5,
                    cache_hit = $6,
                    status = 'completed',
                    responded_at = $7
                WHERE id = $1
                  AND (responded_at IS NULL OR responded_at < $7)
                "#,
            )
            .bind(record.original_request_id)
            .bind(&record.result_data)
            .bind(record.result_count)
            .bind(record.execution_time_ms)
            .bind(record.search_took_ms)
            .bind(record.cache_hit)
            .bind(record.timestamp)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                stats.applied += 1;
                continue;
            }

            let request_exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM requests WHERE id = $1)")
                    .bind(record.original_request_id)
                    .fetch_one(&mut *tx)
                    .await?;

            if request_exists {
                stats.skipped_stale += 1;
            } else {
                warn!(
                    batch_id = %batch.id,
                    original_request_id = %record.original_request_id,
                    "original request not found on this network, skipping result"
                );
                stats.skipped_missing += 1;
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
