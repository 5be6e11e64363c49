//! Transfer record schemas
//!
//! The wire contract for records crossing networks, distinct from the
//! internal domain models. Each schema is flat and self-describing;
//! evolution is additive only (new optional fields), and unknown fields
//! are tolerated on read so producer and consumer versions can deploy
//! independently.
//!
//! Every transfer record carries a stable cross-network identifier (its
//! natural key) and a UTC timestamp for conflict resolution; the
//! [`TransferRecord`] trait exposes both to the generic pipeline.

use crate::types::BatchType;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Contract every wire schema implements for the generic pipeline.
pub trait TransferRecord:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    /// Which pipeline direction this record type travels on.
    const BATCH_TYPE: BatchType;

    /// Stable identifier used to find the corresponding domain entity
    /// on the destination side.
    fn natural_key(&self) -> String;

    /// UTC timestamp used for last-write-wins conflict resolution.
    fn record_timestamp(&self) -> DateTime<Utc>;
}

/// A user query travelling from the request network to the response
/// network for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTransfer {
    /// Original request id on the request network
    pub id: Uuid,
    pub user_id: Uuid,
    /// Query kind, e.g. "match" or "term"
    pub query_type: String,
    pub query_params: serde_json::Value,
    /// Priority inherited from the requesting user
    pub priority: i32,
    /// When the request was created, UTC
    pub timestamp: DateTime<Utc>,
}

impl TransferRecord for RequestTransfer {
    const BATCH_TYPE: BatchType = BatchType::Requests;

    fn natural_key(&self) -> String {
        self.id.to_string()
    }

    fn record_timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// An executed query result travelling back to the request network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseTransfer {
    /// The request this response answers
    pub original_request_id: Uuid,
    #[serde(default)]
    pub result_data: Option<serde_json::Value>,
    #[serde(default)]
    pub result_count: Option<i64>,
    /// Total execution time on the response network
    #[serde(default)]
    pub execution_time_ms: Option<i64>,
    /// Time reported by the search backend itself
    #[serde(default)]
    pub search_took_ms: Option<i64>,
    #[serde(default)]
    pub cache_hit: bool,
    /// When the query was executed, UTC
    pub timestamp: DateTime<Utc>,
}

impl TransferRecord for ResponseTransfer {
    const BATCH_TYPE: BatchType = BatchType::Responses;

    fn natural_key(&self) -> String {
        self.original_request_id.to_string()
    }

    fn record_timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Account synchronization record. Password hashes travel as-is (bcrypt
/// produced by the source network); plaintext never crosses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTransfer {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    pub hashed_password: String,
    pub role: String,
    pub is_active: bool,
    /// Last modification on the source network, UTC
    pub timestamp: DateTime<Utc>,
}

impl TransferRecord for UserTransfer {
    const BATCH_TYPE: BatchType = BatchType::Users;

    fn natural_key(&self) -> String {
        self.username.clone()
    }

    fn record_timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Configuration value synchronization record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingTransfer {
    pub key: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub category: Option<String>,
    /// Last modification on the source network, UTC
    pub timestamp: DateTime<Utc>,
}

impl TransferRecord for SettingTransfer {
    const BATCH_TYPE: BatchType = BatchType::Settings;

    fn natural_key(&self) -> String {
        self.key.clone()
    }

    fn record_timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
