//! Batch file exchange pipeline between two isolated networks
//!
//! Records cross the air gap as JSONL batch files with a JSON metadata
//! sidecar; an out-of-band transport moves the files. The producer
//! side turns pending database records into batch files exactly once;
//! the consumer side validates, deduplicates and applies them
//! idempotently. Four record types travel: requests, responses, users
//! and settings, each as its own scheduled pipeline direction.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod consumer;
pub mod filename;
pub mod jsonl;
pub mod producer;
pub mod scheduler;
pub mod store;
pub mod transfer;
pub mod types;

pub use config::{NetworkRole, RelayConfig};
pub use consumer::BatchConsumer;
pub use producer::BatchProducer;
pub use types::{BatchStatus, BatchType, ExportOutcome, ImportSummary};
