//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Repository backend
    pub storage: StorageBackend,

    /// Orchestration timeouts
    pub ledger: LedgerConfig,

    /// Compaction configuration
    pub snapshot: SnapshotConfig,

    /// External collaborators
    pub gateways: GatewayConfig,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "wallet-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::from("./data/ledger"),
            storage: StorageBackend::RocksDb,
            ledger: LedgerConfig::default(),
            snapshot: SnapshotConfig::default(),
            gateways: GatewayConfig::default(),
            rocksdb: RocksDBConfig::default(),
        }
    }
}

/// Repository backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Durable RocksDB store under `data_dir`
    RocksDb,
    /// Process memory, lost on exit
    Memory,
}

/// Orchestration timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Deadline of one deposit/transfer/compaction (milliseconds)
    pub transaction_timeout_ms: u64,

    /// Lifetime of an account lock (milliseconds)
    pub lock_ttl_ms: u64,

    /// Deadline for releasing an account lock (milliseconds)
    pub unlock_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            transaction_timeout_ms: 5_000,
            lock_ttl_ms: 5_000,
            unlock_timeout_ms: 1_000,
        }
    }
}

impl LedgerConfig {
    /// Operation deadline
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    /// Lock TTL
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    /// Unlock deadline
    pub fn unlock_timeout(&self) -> Duration {
        Duration::from_millis(self.unlock_timeout_ms)
    }
}

/// Compaction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Active wallet length that triggers compaction
    pub wallet_size: usize,

    /// Capacity of the compaction request queue
    pub queue_capacity: usize,

    /// Compactions running at the same time
    pub max_concurrent: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            wallet_size: 100,
            queue_capacity: 1_000,
            max_concurrent: 4,
        }
    }
}

/// External collaborators
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Redis URL for the distributed mutex (in-process mutex when absent)
    pub redis_url: Option<String>,

    /// Notification service base URL (log-only notifier when absent)
    pub notifier_url: Option<String>,

    /// Authorization service base URL (approve-all when absent)
    pub authorizer_url: Option<String>,

    /// HTTP client timeout (milliseconds)
    pub http_timeout_ms: u64,
}

impl GatewayConfig {
    /// HTTP client timeout, 2s when unset
    pub fn http_timeout(&self) -> Duration {
        if self.http_timeout_ms == 0 {
            Duration::from_secs(2)
        } else {
            Duration::from_millis(self.http_timeout_ms)
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(backend) = std::env::var("LEDGER_STORAGE") {
            config.storage = match backend.to_ascii_lowercase().as_str() {
                "rocksdb" => StorageBackend::RocksDb,
                "memory" => StorageBackend::Memory,
                other => {
                    return Err(crate::Error::Config(format!(
                        "Unknown storage backend: {}",
                        other
                    )))
                }
            };
        }

        if let Some(ms) = env_number("LEDGER_TRANSACTION_TIMEOUT_MS")? {
            config.ledger.transaction_timeout_ms = ms;
            config.ledger.lock_ttl_ms = ms;
        }

        if let Some(ms) = env_number("LEDGER_LOCK_TTL_MS")? {
            config.ledger.lock_ttl_ms = ms;
        }

        if let Some(size) = env_number("LEDGER_SNAPSHOT_WALLET_SIZE")? {
            config.snapshot.wallet_size = size as usize;
        }

        config.gateways.redis_url = std::env::var("LEDGER_REDIS_URL").ok();
        config.gateways.notifier_url = std::env::var("LEDGER_NOTIFIER_URL").ok();
        config.gateways.authorizer_url = std::env::var("LEDGER_AUTHORIZER_URL").ok();

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the ledger cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.ledger.transaction_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "transaction_timeout_ms must be positive".to_string(),
            ));
        }
        if self.ledger.lock_ttl_ms == 0 {
            return Err(crate::Error::Config("lock_ttl_ms must be positive".to_string()));
        }
        if self.snapshot.wallet_size < 2 {
            return Err(crate::Error::Config(
                "snapshot.wallet_size must be at least 2".to_string(),
            ));
        }
        if self.snapshot.queue_capacity == 0 || self.snapshot.max_concurrent == 0 {
            return Err(crate::Error::Config(
                "snapshot queue_capacity and max_concurrent must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_number(name: &str) -> crate::Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| crate::Error::Config(format!("{}: {}", name, e))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "wallet-ledger");
        assert_eq!(config.ledger.transaction_timeout(), Duration::from_secs(5));
        assert_eq!(config.snapshot.wallet_size, 100);
        assert!(config.gateways.redis_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            storage = "memory"

            [snapshot]
            wallet_size = 5

            [gateways]
            redis_url = "redis://127.0.0.1:6379"
            "#,
        )
        .unwrap();

        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.snapshot.wallet_size, 5);
        assert_eq!(config.snapshot.queue_capacity, 1_000);
        assert_eq!(config.gateways.redis_url.as_deref(), Some("redis://127.0.0.1:6379"));
        assert_eq!(config.ledger.lock_ttl_ms, 5_000);
    }

    #[test]
    fn test_validate_rejects_tiny_threshold() {
        let mut config = Config::default();
        config.snapshot.wallet_size = 1;
        assert!(config.validate().is_err());
    }
}
