//! Relay configuration
//!
//! Loaded from environment variables at startup; every knob has a
//! default so a bare deployment only needs `DATABASE_URL`, `DATA_DIR`
//! and `NETWORK_ROLE`.

use crate::scheduler::ScheduleConfig;
use crate::types::BatchType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which side of the air gap this process runs on.
///
/// The role decides the direction of every batch type: the request
/// network exports requests and imports responses, users and settings;
/// the response network does the opposite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkRole {
    Request,
    Response,
}

impl NetworkRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkRole::Request => "request",
            NetworkRole::Response => "response",
        }
    }

    /// The network on the other side of the exchange.
    pub fn peer(&self) -> NetworkRole {
        match self {
            NetworkRole::Request => NetworkRole::Response,
            NetworkRole::Response => NetworkRole::Request,
        }
    }

    /// Batch types this role produces.
    pub fn exports(&self) -> &'static [BatchType] {
        match self {
            NetworkRole::Request => &[BatchType::Requests],
            NetworkRole::Response => {
                &[BatchType::Responses, BatchType::Users, BatchType::Settings]
            }
        }
    }

    /// Batch types this role consumes.
    pub fn imports(&self) -> &'static [BatchType] {
        match self {
            NetworkRole::Request => {
                &[BatchType::Responses, BatchType::Users, BatchType::Settings]
            }
            NetworkRole::Response => &[BatchType::Requests],
        }
    }
}

impl std::fmt::Display for NetworkRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NetworkRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "request" => Ok(NetworkRole::Request),
            "response" => Ok(NetworkRole::Response),
            _ => anyhow::bail!("Invalid network role: {}. Must be 'request' or 'response'", s),
        }
    }
}

/// Main relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// PostgreSQL connection string for this network's database
    pub database_url: String,
    /// Root of the exchange directory tree
    pub data_dir: PathBuf,
    /// Which network this process serves
    pub network: NetworkRole,
    /// Maximum records per batch file
    pub max_batch_size: usize,
    /// Seconds between scheduled runs
    pub interval_secs: u64,
    /// Retry attempts after a transient run failure
    pub max_retries: u32,
    /// Seconds to wait before each retry
    pub retry_backoff_secs: u64,
    /// Ceiling in seconds on a single run attempt
    pub run_timeout_secs: u64,
}

impl RelayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let network: NetworkRole = std::env::var("NETWORK_ROLE")
            .map_err(|_| anyhow::anyhow!("NETWORK_ROLE must be set"))?
            .parse()?;

        let config = Self {
            database_url,
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/relay/exchange")),
            network,
            max_batch_size: std::env::var("RELAY_MAX_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(500),
            interval_secs: std::env::var("RELAY_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
            max_retries: std::env::var("RELAY_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            retry_backoff_secs: std::env::var("RELAY_RETRY_BACKOFF_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            run_timeout_secs: std::env::var("RELAY_RUN_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database_url.is_empty() {
            anyhow::bail!("DATABASE_URL cannot be empty");
        }
        if self.max_batch_size == 0 {
            anyhow::bail!("RELAY_MAX_BATCH_SIZE must be greater than 0");
        }
        if self.interval_secs == 0 {
            anyhow::bail!("RELAY_INTERVAL_SECS must be greater than 0");
        }
        if self.run_timeout_secs == 0 {
            anyhow::bail!("RELAY_RUN_TIMEOUT_SECS must be greater than 0");
        }
        Ok(())
    }

    /// Directory where this role writes outgoing batches of `batch_type`.
    pub fn outgoing_dir(&self, batch_type: BatchType) -> PathBuf {
        self.data_dir.join("outgoing").join(batch_type.as_str())
    }

    /// Directory scanned for incoming batches of `batch_type`.
    pub fn incoming_dir(&self, batch_type: BatchType) -> PathBuf {
        self.data_dir.join("incoming").join(batch_type.as_str())
    }

    /// Timing knobs in the form the scheduler consumes.
    pub fn schedule(&self) -> ScheduleConfig {
        ScheduleConfig {
            interval: Duration::from_secs(self.interval_secs),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_secs(self.retry_backoff_secs),
            run_timeout: Duration::from_secs(self.run_timeout_secs),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            data_dir: PathBuf::from("/var/lib/relay/exchange"),
            network: NetworkRole::Request,
            max_batch_size: 500,
            interval_secs: 60,
            max_retries: 2,
            retry_backoff_secs: 30,
            run_timeout_secs: 300,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn valid_config() -> RelayConfig {
        RelayConfig {
            database_url: "postgresql://localhost/relay".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_role_directions_are_complementary() {
        for bt in BatchType::ALL {
            let request_exports = NetworkRole::Request.exports().contains(&bt);
            let response_imports = NetworkRole::Response.imports().contains(&bt);
            assert_eq!(request_exports, response_imports);

            let response_exports = NetworkRole::Response.exports().contains(&bt);
            let request_imports = NetworkRole::Request.imports().contains(&bt);
            assert_eq!(response_exports, request_imports);
        }
    }

    #[test]
    fn test_role_round_trip() {
        assert_eq!("request".parse::<NetworkRole>().unwrap(), NetworkRole::Request);
        assert_eq!("Response".parse::<NetworkRole>().unwrap(), NetworkRole::Response);
        assert!("gateway".parse::<NetworkRole>().is_err());
        assert_eq!(NetworkRole::Request.peer(), NetworkRole::Response);
    }

    #[test]
    fn test_validation_rejects_zero_batch_size() {
        let config = RelayConfig {
            max_batch_size: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_database_url() {
        assert!(RelayConfig::default().validate().is_err());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_exchange_directories() {
        let config = RelayConfig {
            data_dir: PathBuf::from("/data/exchange"),
            ..valid_config()
        };
        assert_eq!(
            config.outgoing_dir(BatchType::Requests),
            PathBuf::from("/data/exchange/outgoing/requests")
        );
        assert_eq!(
            config.incoming_dir(BatchType::Users),
            PathBuf::from("/data/exchange/incoming/users")
        );
    }

    #[test]
    fn test_schedule_conversion() {
        let config = RelayConfig {
            interval_secs: 30,
            run_timeout_secs: 120,
            ..valid_config()
        };
        let schedule = config.schedule();
        assert_eq!(schedule.interval, Duration::from_secs(30));
        assert_eq!(schedule.run_timeout, Duration::from_secs(120));
    }
}
