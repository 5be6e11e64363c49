//! Request stores
//!
//! The request network exports pending user queries; the response
//! network imports them into `incoming_requests` for execution.

use super::{
    checksum_exists, complete_import_batch, insert_export_batch, insert_import_batch,
    record_export_failure, record_import_failure,
};
use crate::store::{ExportSource, ImportTarget, PendingRecord};
use crate::transfer::RequestTransfer;
use crate::types::{ExportBatchRow, ImportBatchRow, ImportStats};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashSet;
use tracing::warn;
use uuid::Uuid;

/// Selects pending requests on the request network.
pub struct RequestExportSource {
    pool: PgPool,
}

impl RequestExportSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExportSource for RequestExportSource {
    type Transfer = RequestTransfer;

    async fn select_pending(&self, limit: usize) -> Result<Vec<PendingRecord<RequestTransfer>>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, query_type, query_params, priority, created_at
            FROM requests
            WHERE status = 'pending'
            ORDER BY priority DESC, created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut pending = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get("id")?;
            pending.push(PendingRecord {
                id,
                transfer: RequestTransfer {
                    id,
                    user_id: row.try_get("user_id")?,
                    query_type: row.try_get("query_type")?,
                    query_params: row.try_get("query_params")?,
                    priority: row.try_get("priority")?,
                    timestamp: row.try_get("created_at")?,
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
            UPDATE requests
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

/// Applies imported requests on the response network.
pub struct RequestImportTarget {
    pool: PgPool,
}

impl RequestImportTarget {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImportTarget for RequestImportTarget {
    type Transfer = RequestTransfer;

    async fn seen_checksum(&self, checksum: &str) -> Result<bool> {
        checksum_exists(&self.pool, checksum).await
    }

    async fn apply_batch(
        &self,
        batch: &ImportBatchRow,
        records: &[RequestTransfer],
    ) -> Result<ImportStats> {
        let mut tx = self.pool.begin().await?;
        insert_import_batch(&mut tx, batch).await?;

        // Requests reference a user account; accounts sync on their own
        // schedule, so a request may arrive before its user does.
        let user_ids: Vec<Uuid> = records.iter().map(|r| r.user_id).collect();
        let known_users: HashSet<Uuid> =
            sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE id = ANY($1)")
                .bind(&user_ids)
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .collect();

        let mut stats = ImportStats::default();
        for record in records {
            if !known_users.contains(&record.user_id) {
                warn!(
                    batch_id = %batch.id,
                    original_request_id = %record.id,
                    user_id = %record.user_id,
                    "user not found on this network, skipping request"
                );
                stats.skipped_missing += 1;
                continue;
            }

            let result = sqlx::query(
                r#"
                INSERT INTO incoming_requests
                    (id, original_request_id, user_id, query_type, query_params,
                     priority, requested_at, status, received_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', NOW())
                ON CONFLICT (original_request_id) DO UPDATE
                SET query_type = EXCLUDED.query_type,
                    query_params = EXCLUDED.query_params,
                    priority = EXCLUDED.priority,
                    requested_at = EXCLUDED.requested_at
                WHERE incoming_requests.requested_at < EXCLUDED.requested_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(record.id)
            .bind(record.user_id)
            .bind(&record.query_type)
            .bind(&record.query_params)
            .bind(record.priority)
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
