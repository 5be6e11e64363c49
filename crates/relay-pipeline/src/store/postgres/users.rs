//! User account stores
//!
//! Accounts are administered on the response network and mirrored to
//! the request network. The upsert key is the username; hashes travel
//! opaque and are stored as received.

use super::{
    checksum_exists, complete_import_batch, insert_export_batch, insert_import_batch,
    record_export_failure, record_import_failure,
};
use crate::store::{ExportSource, ImportTarget, PendingRecord};
use crate::transfer::UserTransfer;
use crate::types::{ExportBatchRow, ImportBatchRow, ImportStats};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Selects accounts flagged for synchronization.
pub struct UserExportSource {
    pool: PgPool,
}

impl UserExportSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExportSource for UserExportSource {
    type Transfer = UserTransfer;

    async fn select_pending(&self, limit: usize) -> Result<Vec<PendingRecord<UserTransfer>>> {
        let rows = sqlx::query(
            r#"
            SELECT id, username, email, full_name, hashed_password,
                   role, is_active, updated_at
            FROM users
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
            let id: Uuid = row.try_get("id")?;
            pending.push(PendingRecord {
                id,
                transfer: UserTransfer {
                    id,
                    username: row.try_get("username")?,
                    email: row.try_get("email")?,
                    full_name: row.try_get("full_name")?,
                    hashed_password: row.try_get("hashed_password")?,
                    role: row.try_get("role")?,
                    is_active: row.try_get("is_active")?,
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
            UPDATE users
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

/// Upserts mirrored accounts, last write wins by `updated_at`.
pub struct UserImportTarget {
    pool: PgPool,
}

impl UserImportTarget {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImportTarget for UserImportTarget {
    type Transfer = UserTransfer;

    async fn seen_checksum(&self, checksum: &str) -> Result<bool> {
        checksum_exists(&self.pool, checksum).await
    }

    async fn apply_batch(
        &self,
        batch: &ImportBatchRow,
        records: &[UserTransfer],
    ) -> Result<ImportStats> {
        let mut tx = self.pool.begin().await?;
        insert_import_batch(&mut tx, batch).await?;

        let mut stats = ImportStats::default();
        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO users
                    (id, username, email, full_name, hashed_password,
                     role, is_active, updated_at, sync_pending)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE)
                ON CONFLICT (username) DO UPDATE
                SET email = EXCLUDED.email,
                    full_name = EXCLUDED.full_name,
                    hashed_password = EXCLUDED.hashed_password,
                    role = EXCLUDED.role,
                    is_active = EXCLUDED.is_active,
                    updated_at = EXCLUDED.updated_at
                WHERE users.updated_at < EXCLUDED.updated_at
                "#,
            )
            .bind(record.id)
            .bind(&record.username)
            .bind(&record.email)
            .bind(&record.full_name)
            .bind(&record.hashed_password)
            .bind(&record.role)
            .bind(record.is_active)
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
