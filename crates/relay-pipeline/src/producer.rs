//! Batch producer
//!
//! Turns eligible domain records into a batch file exactly once per
//! record: select, serialize, checksum, sidecar, then a single source
//! transaction that records the export ledger row and flips every
//! selected record to `exported`. Any failure before that transaction
//! aborts the whole batch and the next run re-selects the same pending
//! records; a file orphaned by a failed transaction is tolerated
//! downstream (checksum dedup), never corrupting.

use crate::filename::{generate_filename, meta_path};
use crate::jsonl::{write_jsonl, BatchMetadata};
use crate::store::ExportSource;
use crate::transfer::TransferRecord;
use crate::types::{BatchStatus, ExportBatchRow, ExportOutcome};
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

/// Producer for one pipeline direction.
pub struct BatchProducer<S: ExportSource> {
    source: S,
    outgoing_dir: PathBuf,
    max_batch_size: usize,
    source_network: Option<String>,
    destination_network: Option<String>,
}

impl<S: ExportSource> BatchProducer<S> {
    pub fn new(source: S, outgoing_dir: impl Into<PathBuf>, max_batch_size: usize) -> Self {
        Self {
            source,
            outgoing_dir: outgoing_dir.into(),
            max_batch_size,
            source_network: None,
            destination_network: None,
        }
    }

    /// Tag produced sidecars with the two network names.
    pub fn with_networks(
        mut self,
        source_network: impl Into<String>,
        destination_network: impl Into<String>,
    ) -> Self {
        self.source_network = Some(source_network.into());
        self.destination_network = Some(destination_network.into());
        self
    }

    pub fn batch_type(&self) -> &'static str {
        S::Transfer::BATCH_TYPE.as_str()
    }

    /// Run one export pass.
    pub async fn run(&self) -> Result<ExportOutcome> {
        let batch_type = S::Transfer::BATCH_TYPE;

        let pending = self
            .source
            .select_pending(self.max_batch_size)
            .await
            .context("selecting pending records")?;

        if pending.is_empty() {
            info!(batch_type = %batch_type, "no pending records to export");
            return Ok(ExportOutcome::Noop);
        }

        let batch_id = Uuid::new_v4();
        let created_at = Utc::now();
        let filename = generate_filename(batch_type.as_str(), batch_id, created_at);
        let data_path = self.outgoing_dir.join(&filename);

        let transfers: Vec<S::Transfer> =
            pending.iter().map(|r| r.transfer.clone()).collect();
        write_jsonl(&transfers, &data_path)
            .with_context(|| format!("writing batch file {}", data_path.display()))?;

        // Checksum is computed over the bytes as persisted, so any
        // transport corruption is detectable on the other side.
        let metadata = BatchMetadata::for_file(
            batch_id,
            batch_type.as_str(),
            transfers.len() as u64,
            &data_path,
            created_at,
        )?
        .with_networks(self.source_network.clone(), self.destination_network.clone());
        metadata.write(&meta_path(&data_path))?;

        let ledger_row = ExportBatchRow {
            id: batch_id,
            batch_type,
            filename: filename.clone(),
            file_path: data_path.display().to_string(),
            record_count: transfers.len() as i32,
            file_size_bytes: metadata.file_size_bytes as i64,
            checksum: metadata.checksum_sha256.clone(),
            status: BatchStatus::Completed,
            error_message: None,
            created_at,
            completed_at: Some(Utc::now()),
        };

        let record_ids: Vec<Uuid> = pending.iter().map(|r| r.id).collect();
        if let Err(e) = self.source.mark_exported(&record_ids, &ledger_row).await {
            let mut failed = ledger_row.clone();
            failed.status = BatchStatus::Failed;
            failed.error_message = Some(format!("{e:#}"));
            failed.completed_at = None;
            if let Err(ledger_err) = self.source.record_failure(&failed).await {
                warn!(
                    batch_id = %batch_id,
                    error = %format!("{ledger_err:#}"),
                    "failed to record export failure in ledger"
                );
            }
            return Err(e).context("marking records exported");
        }

        info!(
            batch_type = %batch_type,
            batch_id = %batch_id,
            record_count = transfers.len(),
            filename = %filename,
            "export batch written"
        );

        Ok(ExportOutcome::Exported {
            batch_id,
            record_count: transfers.len(),
            filename,
        })
    }
}
