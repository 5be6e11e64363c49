//! Error types for the relay pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Main error type for the relay pipeline.
///
/// The retry shell distinguishes two failure classes: transient errors
/// (I/O hiccups, database connectivity) are retried with backoff, while
/// validation and configuration errors are surfaced immediately. The
/// `is_transient` method encodes that split.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed batch file {}: {message} (line {line})", .path.display())]
    MalformedBatch {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Invalid batch metadata {}: {message}", .path.display())]
    InvalidMetadata { path: PathBuf, message: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pipeline run timed out after {0} seconds")]
    Timeout(u64),
}

impl RelayError {
    /// Whether a bounded automatic retry can plausibly succeed.
    ///
    /// Malformed batches and configuration errors are permanent: the
    /// same input will fail the same way, so they go straight to
    /// quarantine or abort the run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RelayError::Io(_) | RelayError::Database(_) | RelayError::Timeout(_)
        )
    }

    /// Classify an `anyhow::Error` produced by a pipeline run.
    ///
    /// Walks the chain looking for a `RelayError`; unknown errors are
    /// treated as transient so an unexpected hiccup still gets its
    /// bounded retries.
    pub fn chain_is_transient(err: &anyhow::Error) -> bool {
        for cause in err.chain() {
            if let Some(relay_err) = cause.downcast_ref::<RelayError>() {
                return relay_err.is_transient();
            }
            if cause.downcast_ref::<std::io::Error>().is_some() {
                return true;
            }
        }
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_are_transient() {
        let err = RelayError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_malformed_batch_is_permanent() {
        let err = RelayError::MalformedBatch {
            path: PathBuf::from("batch.jsonl"),
            line: 3,
            message: "expected value".to_string(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn test_config_error_is_permanent() {
        assert!(!RelayError::Config("bad dir".to_string()).is_transient());
    }

    #[test]
    fn test_chain_classification() {
        let permanent: anyhow::Error = RelayError::ChecksumMismatch {
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        }
        .into();
        assert!(!RelayError::chain_is_transient(&permanent));

        let transient: anyhow::Error = RelayError::Database("connection reset".to_string()).into();
        assert!(RelayError::chain_is_transient(&transient));
    }
}
