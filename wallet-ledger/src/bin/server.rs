//! Ledger server binary
//!
//! Wires configuration, storage, the account mutex and the external services
//! into a [`Ledger`] with its compaction worker, then runs until Ctrl-C.

use anyhow::Context;
use std::sync::Arc;
use wallet_ledger::{
    config::StorageBackend,
    memory::MemoryRepository,
    mutex::{LocalMutex, RedisMutex},
    service::{AllowAll, HttpAuthorizer, HttpNotifier, LogNotifier},
    AccountRepository, Authorizer, Config, DistributedMutex, Gateways, Ledger, Metrics, Notifier,
    RocksRepository,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load configuration: file given as first argument, environment otherwise
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        None => Config::from_env().context("loading configuration from environment")?,
    };

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        storage = ?config.storage,
        "Starting wallet ledger server"
    );

    let repository: Arc<dyn AccountRepository> = match config.storage {
        StorageBackend::RocksDb => Arc::new(RocksRepository::open(&config)?),
        StorageBackend::Memory => Arc::new(MemoryRepository::new()),
    };

    let mutex: Arc<dyn DistributedMutex> = match &config.gateways.redis_url {
        Some(url) => Arc::new(RedisMutex::connect(url).await?),
        None => {
            tracing::warn!("No Redis URL configured, account locks are local to this process");
            Arc::new(LocalMutex::new())
        }
    };

    let timeout = config.gateways.http_timeout();
    let notifier: Arc<dyn Notifier> = match &config.gateways.notifier_url {
        Some(url) => Arc::new(HttpNotifier::new(url.as_str(), timeout)?),
        None => Arc::new(LogNotifier),
    };
    let authorizer: Arc<dyn Authorizer> = match &config.gateways.authorizer_url {
        Some(url) => Arc::new(HttpAuthorizer::new(url.as_str(), timeout)?),
        None => {
            tracing::warn!("No authorizer URL configured, every transfer is authorized");
            Arc::new(AllowAll)
        }
    };

    let gateways = Gateways {
        repository,
        mutex,
        notifier,
        authorizer,
    };
    let ledger = Ledger::new(gateways, config, Metrics::new()?).with_compaction_worker();
    tracing::info!("Ledger opened successfully");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down ledger server");
    ledger.shutdown().await?;
    Ok(())
}
