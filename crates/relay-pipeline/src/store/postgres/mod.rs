//! Postgres-backed store implementations
//!
//! One `ExportSource`/`ImportTarget` pair per batch type. Each network
//! instantiates only the implementations matching its role; the two
//! ledger tables (`export_batches`, `import_batches`) are shared by all
//! of them, so the helpers here own the ledger SQL.
//!
//! Domain rows are mapped to transfer records through explicit column
//! lists, never `SELECT *`, so schema additions cannot leak across the
//! wire unreviewed.

pub mod requests;
pub mod responses;
pub mod settings;
pub mod users;

pub use requests::{RequestExportSource, RequestImportTarget};
pub use responses::{ResponseExportSource, ResponseImportTarget};
pub use settings::{SettingExportSource, SettingImportTarget};
pub use users::{UserExportSource, UserImportTarget};

use crate::types::{ExportBatchRow, ImportBatchRow};
use anyhow::Result;
use sqlx::{PgPool, Postgres, Transaction};

pub(crate) async fn insert_export_batch(
    tx: &mut Transaction<'_, Postgres>,
    batch: &ExportBatchRow,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO export_batches
            (id, batch_type, filename, file_path, record_count,
             file_size_bytes, checksum, status, error_message,
             created_at, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(batch.id)
    .bind(batch.batch_type.as_str())
    .bind(&batch.filename)
    .bind(&batch.file_path)
    .bind(batch.record_count)
    .bind(batch.file_size_bytes)
    .bind(&batch.checksum)
    .bind(batch.status.as_str())
    .bind(&batch.error_message)
    .bind(batch.created_at)
    .bind(batch.completed_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) async fn insert_import_batch(
    tx: &mut Transaction<'_, Postgres>,
    batch: &ImportBatchRow,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO import_batches
            (id, batch_type, filename, file_path, record_count,
             file_size_bytes, checksum, status, source_batch_id,
             error_message, created_at, processed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(batch.id)
    .bind(batch.batch_type.as_str())
    .bind(&batch.filename)
    .bind(&batch.file_path)
    .bind(batch.record_count)
    .bind(batch.file_size_bytes)
    .bind(&batch.checksum)
    .bind(batch.status.as_str())
    .bind(batch.source_batch_id)
    .bind(&batch.error_message)
    .bind(batch.created_at)
    .bind(batch.processed_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) async fn complete_import_batch(
    tx: &mut Transaction<'_, Postgres>,
    batch_id: uuid::Uuid,
) -> Result<()> {
    sqlx::query(
        "UPDATE import_batches SET status = 'completed', processed_at = NOW() WHERE id = $1",
    )
    .bind(batch_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) async fn checksum_exists(pool: &PgPool, checksum: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM import_batches WHERE checksum = $1 AND status = 'completed')",
    )
    .bind(checksum)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

pub(crate) async fn record_export_failure(pool: &PgPool, batch: &ExportBatchRow) -> Result<()> {
    let mut tx = pool.begin().await?;
    insert_export_batch(&mut tx, batch).await?;
    tx.commit().await?;
    Ok(())
}

pub(crate) async fn record_import_failure(pool: &PgPool, batch: &ImportBatchRow) -> Result<()> {
    let mut tx = pool.begin().await?;
    insert_import_batch(&mut tx, batch).await?;
    tx.commit().await?;
    Ok(())
}
