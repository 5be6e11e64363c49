//! Core types for the batch exchange pipeline
//!
//! Ledger rows, batch status lifecycle, and the per-run outcome types
//! reported by the producer and consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of records a batch carries.
///
/// Each batch type is one independent pipeline direction between the
/// two networks; all four share the codec and serializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchType {
    Requests,
    Responses,
    Users,
    Settings,
}

impl BatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchType::Requests => "requests",
            BatchType::Responses => "responses",
            BatchType::Users => "users",
            BatchType::Settings => "settings",
        }
    }

    pub const ALL: [BatchType; 4] = [
        BatchType::Requests,
        BatchType::Responses,
        BatchType::Users,
        BatchType::Settings,
    ];
}

impl std::fmt::Display for BatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BatchType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "requests" => Ok(BatchType::Requests),
            "responses" => Ok(BatchType::Responses),
            "users" => Ok(BatchType::Users),
            "settings" => Ok(BatchType::Settings),
            _ => Err(anyhow::anyhow!("Invalid batch type: {}", s)),
        }
    }
}

/// Batch processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(BatchStatus::Pending),
            "processing" => Ok(BatchStatus::Processing),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid batch status: {}", s)),
        }
    }
}

/// Export ledger row (`export_batches` table).
///
/// One row per batch written by the producer, recorded in the same
/// transaction that flips the source records to `exported`. Never
/// deleted by normal operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportBatchRow {
    pub id: Uuid,
    pub batch_type: BatchType,
    pub filename: String,
    pub file_path: String,
    pub record_count: i32,
    pub file_size_bytes: i64,
    pub checksum: String,
    pub status: BatchStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Import ledger row (`import_batches` table).
///
/// One row per batch received by the consumer; the checksum column is
/// the duplicate-detection key. `source_batch_id` is the exporting
/// side's batch id, recovered from the filename when parseable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBatchRow {
    pub id: Uuid,
    pub batch_type: BatchType,
    pub filename: String,
    pub file_path: String,
    pub record_count: i32,
    pub file_size_bytes: i64,
    pub checksum: String,
    pub status: BatchStatus,
    pub source_batch_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Per-record accounting for one applied batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStats {
    /// Records upserted into the destination store
    pub applied: i64,
    /// Records skipped because the referenced domain entity does not
    /// exist yet (referential race between the networks)
    pub skipped_missing: i64,
    /// Records skipped by last-write-wins conflict resolution
    pub skipped_stale: i64,
}

impl ImportStats {
    pub fn total(&self) -> i64 {
        self.applied + self.skipped_missing + self.skipped_stale
    }
}

/// Outcome of one producer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// No eligible records; a successful no-op, not an error.
    Noop,
    Exported {
        batch_id: Uuid,
        record_count: usize,
        filename: String,
    },
}

/// One failed file inside a consumer run.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub filename: String,
    pub reason: String,
}

/// Aggregate outcome of one consumer run over all pending files.
///
/// Per-file errors are contained here; a bad file never aborts the
/// remainder of the run.
#[derive(Debug, Clone, Default)]
pub struct ImportSummary {
    /// Files fully imported and archived
    pub processed: usize,
    /// Files skipped as already-seen checksums (archived)
    pub duplicates: usize,
    /// Files with zero records (archived)
    pub empty: usize,
    /// Files moved to the failed/ quarantine
    pub quarantined: usize,
    /// Files left in place because their sidecar has not arrived yet
    pub deferred: usize,
    pub records_applied: i64,
    pub records_skipped: i64,
    pub failures: Vec<BatchFailure>,
}

impl ImportSummary {
    pub fn merge_stats(&mut self, stats: &ImportStats) {
        self.records_applied += stats.applied;
        self.records_skipped += stats.skipped_missing + stats.skipped_stale;
    }

    /// True when the run found nothing to do at all.
    pub fn is_noop(&self) -> bool {
        self.processed == 0
            && self.duplicates == 0
            && self.empty == 0
            && self.quarantined == 0
            && self.deferred == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_type_round_trip() {
        for bt in BatchType::ALL {
            assert_eq!(bt.as_str().parse::<BatchType>().unwrap(), bt);
        }
        assert!("genomes".parse::<BatchType>().is_err());
    }

    #[test]
    fn test_batch_status_round_trip() {
        for status in [
            BatchStatus::Pending,
            BatchStatus::Processing,
            BatchStatus::Completed,
            BatchStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<BatchStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_import_stats_total() {
        let stats = ImportStats {
            applied: 4,
            skipped_missing: 1,
            skipped_stale: 2,
        };
        assert_eq!(stats.total(), 7);
    }

    #[test]
    fn test_summary_noop() {
        let mut summary = ImportSummary::default();
        assert!(summary.is_noop());
        summary.duplicates = 1;
        assert!(!summary.is_noop());
    }
}
