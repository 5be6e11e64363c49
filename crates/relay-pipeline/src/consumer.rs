//! Batch consumer / importer
//!
//! Idempotent, validated ingestion of batch files from an incoming
//! directory. Files are processed oldest-first (the filename's
//! timestamp prefix sorts lexicographically). A file already seen by
//! checksum is archived without reapplying anything; a file that fails
//! validation is quarantined whole under `failed/` and never retried
//! automatically; per-file errors never abort the rest of the run.

use crate::filename::{meta_path, parse_filename, DATA_EXTENSION};
use crate::jsonl::{read_jsonl, BatchMetadata};
use crate::store::ImportTarget;
use crate::transfer::TransferRecord;
use crate::types::{BatchFailure, BatchStatus, ImportBatchRow, ImportStats, ImportSummary};
use anyhow::{Context, Result};
use chrono::Utc;
use relay_common::checksum::compute_file_checksum;
use relay_common::RelayError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Subdirectory for successfully processed batches
pub const ARCHIVE_SUBDIR: &str = "archive";
/// Subdirectory quarantining batches that failed validation
pub const FAILED_SUBDIR: &str = "failed";

/// Outcome of processing one discovered file.
enum FileOutcome {
    Imported(ImportStats),
    Duplicate,
    Empty,
    Quarantined(String),
}

/// Consumer for one pipeline direction.
pub struct BatchConsumer<T: ImportTarget> {
    target: T,
    incoming_dir: PathBuf,
}

impl<T: ImportTarget> BatchConsumer<T> {
    pub fn new(target: T, incoming_dir: impl Into<PathBuf>) -> Self {
        Self {
            target,
            incoming_dir: incoming_dir.into(),
        }
    }

    pub fn batch_type(&self) -> &'static str {
        T::Transfer::BATCH_TYPE.as_str()
    }

    fn archive_dir(&self) -> PathBuf {
        self.incoming_dir.join(ARCHIVE_SUBDIR)
    }

    fn failed_dir(&self) -> PathBuf {
        self.incoming_dir.join(FAILED_SUBDIR)
    }

    /// Run one import pass over every pending file.
    pub async fn run(&self) -> Result<ImportSummary> {
        self.ensure_dirs()?;

        let mut summary = ImportSummary::default();
        let batch_type = T::Transfer::BATCH_TYPE;

        for data_path in self.discover()? {
            let file_name = display_name(&data_path);

            // No sidecar yet means the transport has not finished
            // delivering this batch; leave it for the next scan.
            if !meta_path(&data_path).exists() {
                debug!(file = %file_name, "sidecar not present yet, deferring");
                summary.deferred += 1;
                continue;
            }

            match self.process_file(&data_path).await {
                Ok(FileOutcome::Imported(stats)) => {
                    summary.processed += 1;
                    summary.merge_stats(&stats);
                }
                Ok(FileOutcome::Duplicate) => summary.duplicates += 1,
                Ok(FileOutcome::Empty) => summary.empty += 1,
                Ok(FileOutcome::Quarantined(reason)) => {
                    summary.quarantined += 1;
                    summary.failures.push(BatchFailure {
                        filename: file_name,
                        reason,
                    });
                }
                Err(e) => {
                    // Unhandled failure while applying: quarantine and
                    // keep going with the remaining files.
                    error!(
                        batch_type = %batch_type,
                        file = %file_name,
                        error = %format!("{e:#}"),
                        "failed to import batch file"
                    );
                    if let Err(move_err) = self.move_to(&data_path, &self.failed_dir()) {
                        error!(
                            file = %file_name,
                            error = %format!("{move_err:#}"),
                            "could not quarantine batch file"
                        );
                    }
                    summary.quarantined += 1;
                    summary.failures.push(BatchFailure {
                        filename: file_name,
                        reason: format!("{e:#}"),
                    });
                }
            }
        }

        if summary.is_noop() {
            info!(batch_type = %batch_type, "no batch files to import");
        } else {
            info!(
                batch_type = %batch_type,
                processed = summary.processed,
                duplicates = summary.duplicates,
                empty = summary.empty,
                quarantined = summary.quarantined,
                deferred = summary.deferred,
                records_applied = summary.records_applied,
                records_skipped = summary.records_skipped,
                "import run finished"
            );
        }

        Ok(summary)
    }

    async fn process_file(&self, data_path: &Path) -> Result<FileOutcome> {
        let file_name = display_name(data_path);
        debug!(file = %file_name, "processing batch file");

        let checksum = compute_file_checksum(data_path)
            .with_context(|| format!("computing checksum of {file_name}"))?;

        // Idempotency guard: the ledger remembers every checksum that
        // completed, so a re-delivered or re-scanned batch is a no-op.
        // Failed attempts do not count, a quarantined file stays
        // importable if redelivered.
        if self
            .target
            .seen_checksum(&checksum)
            .await
            .context("checking ledger for duplicate checksum")?
        {
            warn!(file = %file_name, checksum = %checksum, "duplicate batch, archiving");
            self.move_to(data_path, &self.archive_dir())?;
            return Ok(FileOutcome::Duplicate);
        }

        let metadata = match BatchMetadata::read(&meta_path(data_path)) {
            Ok(meta) => meta,
            Err(e @ RelayError::InvalidMetadata { .. }) => {
                return self.quarantine(data_path, e.to_string());
            }
            Err(e) => return Err(e).context("reading batch sidecar"),
        };

        if metadata.checksum_sha256 != checksum {
            return self.quarantine(
                data_path,
                format!(
                    "checksum mismatch: sidecar says {}, file is {}",
                    metadata.checksum_sha256, checksum
                ),
            );
        }

        let records: Vec<T::Transfer> = match read_jsonl(data_path) {
            Ok(records) => records,
            Err(e @ (RelayError::MalformedBatch { .. } | RelayError::Serialization(_))) => {
                return self.quarantine(data_path, e.to_string());
            }
            Err(e) => return Err(e).context("reading batch file"),
        };

        if records.is_empty() {
            info!(file = %file_name, "batch contains no records, archiving");
            self.move_to(data_path, &self.archive_dir())?;
            return Ok(FileOutcome::Empty);
        }

        let file_size = fs::metadata(data_path)?.len();
        let ledger_row = ImportBatchRow {
            id: Uuid::new_v4(),
            batch_type: T::Transfer::BATCH_TYPE,
            filename: file_name.clone(),
            file_path: data_path.display().to_string(),
            record_count: records.len() as i32,
            file_size_bytes: file_size as i64,
            checksum,
            status: BatchStatus::Processing,
            source_batch_id: parse_filename(&file_name).map(|p| p.batch_id),
            error_message: None,
            created_at: Utc::now(),
            processed_at: None,
        };

        let stats = match self.target.apply_batch(&ledger_row, &records).await {
            Ok(stats) => stats,
            Err(e) => {
                // The import transaction rolled back; record the failure
                // in its own transaction so the attempt is auditable.
                let mut failed = ledger_row.clone();
                failed.status = BatchStatus::Failed;
                failed.error_message = Some(format!("{e:#}"));
                failed.processed_at = Some(Utc::now());
                if let Err(ledger_err) = self.target.record_failure(&failed).await {
                    warn!(
                        batch_id = %ledger_row.id,
                        error = %format!("{ledger_err:#}"),
                        "failed to record import failure in ledger"
                    );
                }
                return Err(e).context("applying batch records");
            }
        };

        // Archive only after the import transaction committed.
        self.move_to(data_path, &self.archive_dir())?;

        info!(
            file = %file_name,
            batch_id = %ledger_row.id,
            applied = stats.applied,
            skipped_missing = stats.skipped_missing,
            skipped_stale = stats.skipped_stale,
            "batch imported"
        );

        Ok(FileOutcome::Imported(stats))
    }

    fn quarantine(&self, data_path: &Path, reason: String) -> Result<FileOutcome> {
        warn!(
            file = %display_name(data_path),
            reason = %reason,
            "quarantining malformed batch file"
        );
        self.move_to(data_path, &self.failed_dir())?;
        Ok(FileOutcome::Quarantined(reason))
    }

    /// Move a data file (and its sidecar, if present) into `dest_dir`.
    fn move_to(&self, data_path: &Path, dest_dir: &Path) -> Result<()> {
        let file_name = data_path
            .file_name()
            .context("batch path has no file name")?;
        fs::rename(data_path, dest_dir.join(file_name))
            .with_context(|| format!("moving {} to {}", data_path.display(), dest_dir.display()))?;

        let meta = meta_path(data_path);
        if meta.exists() {
            if let Some(meta_name) = meta.file_name() {
                fs::rename(&meta, dest_dir.join(meta_name))
                    .with_context(|| format!("moving sidecar of {}", data_path.display()))?;
            }
        }
        Ok(())
    }

    /// Pending data files, oldest first by filename timestamp prefix.
    fn discover(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.incoming_dir)
            .with_context(|| format!("scanning {}", self.incoming_dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(DATA_EXTENSION)
            {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// The incoming tree must exist and be writable before anything
    /// else; failing here is a configuration error, not retryable.
    fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.incoming_dir.clone(),
            self.archive_dir(),
            self.failed_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| {
                RelayError::Config(format!("cannot create directory {}: {e}", dir.display()))
            })?;
        }
        Ok(())
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
