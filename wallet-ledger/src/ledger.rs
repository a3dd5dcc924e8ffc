//! Main ledger orchestration layer
//!
//! This module ties together the repository, the account mutex, the external
//! notifier and authorizer, and the compaction worker into the high-level
//! account API.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wallet_ledger::{
//!     memory::MemoryRepository,
//!     mutex::LocalMutex,
//!     service::{AllowAll, LogNotifier},
//!     Config, Gateways, Ledger, Metrics,
//! };
//!
//! #[tokio::main]
//! async fn main() -> wallet_ledger::Result<()> {
//!     let gateways = Gateways {
//!         repository: Arc::new(MemoryRepository::new()),
//!         mutex: Arc::new(LocalMutex::new()),
//!         notifier: Arc::new(LogNotifier),
//!         authorizer: Arc::new(AllowAll),
//!     };
//!     let ledger = Ledger::new(gateways, Config::default(), Metrics::default())
//!         .with_compaction_worker();
//!
//!     // let account_id = ledger.execute_new_account(input).await?;
//!     // ledger.execute_deposit(account_id, Money::MIL_REAIS).await?;
//!
//!     ledger.shutdown().await?;
//!     Ok(())
//! }
//! ```

use crate::{
    actor::{spawn_compaction_worker, CompactionHandle},
    gateway::{AccountRepository, Authorizer, DistributedMutex, Notifier, RepositoryTx},
    metrics::Metrics,
    mutex::release,
    snapshot::{CompactionOutcome, Compactor},
    types::{Account, AccountSummary, Money, NewAccount, Transaction},
    Config, Error, Result,
};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{timeout, timeout_at, Instant};
use uuid::Uuid;

/// External collaborators injected into the ledger
#[derive(Clone)]
pub struct Gateways {
    /// Account and entry store
    pub repository: Arc<dyn AccountRepository>,
    /// Per-account lock
    pub mutex: Arc<dyn DistributedMutex>,
    /// Balance change notifications
    pub notifier: Arc<dyn Notifier>,
    /// Transfer permission check
    pub authorizer: Arc<dyn Authorizer>,
}

/// Main ledger interface
pub struct Ledger {
    repository: Arc<dyn AccountRepository>,
    mutex: Arc<dyn DistributedMutex>,
    notifier: Arc<dyn Notifier>,
    authorizer: Arc<dyn Authorizer>,

    /// Shared with the compaction worker
    compactor: Arc<Compactor>,

    /// Absent until a worker is attached; requests are then not queued
    compactions: Option<CompactionHandle>,

    config: Config,
    metrics: Metrics,
}

impl Ledger {
    /// Create a ledger over the given gateways
    pub fn new(gateways: Gateways, config: Config, metrics: Metrics) -> Self {
        let compactor = Arc::new(Compactor::new(
            gateways.repository.clone(),
            gateways.mutex.clone(),
            &config,
            metrics.clone(),
        ));

        Self {
            repository: gateways.repository,
            mutex: gateways.mutex,
            notifier: gateways.notifier,
            authorizer: gateways.authorizer,
            compactor,
            compactions: None,
            config,
            metrics,
        }
    }

    /// Spawn the background compaction worker and route requests to it
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_compaction_worker(mut self) -> Self {
        let handle = spawn_compaction_worker(
            self.compactor.clone(),
            &self.config.snapshot,
            self.metrics.clone(),
        );
        self.compactions = Some(handle);
        self
    }

    /// Route compaction requests to an existing worker
    pub fn with_compaction_handle(mut self, handle: CompactionHandle) -> Self {
        self.compactions = Some(handle);
        self
    }

    /// Handle of the attached compaction worker
    pub fn compactions(&self) -> Option<&CompactionHandle> {
        self.compactions.as_ref()
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Register a new account
    pub async fn execute_new_account(&self, input: NewAccount) -> Result<Uuid> {
        self.observe("new_account", async {
            input.validate()?;

            let account = Account::new(input);
            self.repository.create_account(&account).await?;

            self.metrics.accounts_created.inc();
            tracing::info!(
                account_id = %account.id,
                account_type = %account.account_type,
                "Account created"
            );

            Ok(account.id)
        })
        .await
    }

    /// Deposit `amount` into an account
    ///
    /// Returns the id of the new `Deposit` entry. The entry is committed only
    /// after the notifier accepted it.
    pub async fn execute_deposit(&self, account_id: Uuid, amount: Money) -> Result<Uuid> {
        self.observe("deposit", async {
            ensure_positive(amount)?;

            timeout(self.config.ledger.transaction_timeout(), self.deposit(account_id, amount))
                .await
                .map_err(|_| self.timeout_error())?
        })
        .await
    }

    async fn deposit(&self, account_id: Uuid, amount: Money) -> Result<Uuid> {
        let mut account = self.repository.find_account(account_id).await?;
        let entry = account.deposit(amount)?;

        let mut tx = self.repository.begin().await?;
        let entries = std::slice::from_ref(&entry);
        if let Err(e) = self.persist(tx.as_mut(), entries, &account, &entry).await {
            self.rollback(tx, account_id).await;
            return Err(e);
        }

        self.metrics.deposits_total.inc();
        tracing::info!(
            account_id = %account_id,
            entry_id = %entry.id,
            amount = %entry.amount,
            "Deposit committed"
        );

        Ok(entry.id)
    }

    /// Transfer `amount` from `payer_id` to `payee_id`
    ///
    /// Returns the correlation id shared by both legs. The payer is locked for
    /// the whole operation; a held lock fails fast with `LockContention` and
    /// nothing is read or written.
    pub async fn execute_transfer(
        &self,
        payer_id: Uuid,
        payee_id: Uuid,
        amount: Money,
    ) -> Result<Uuid> {
        self.observe("transfer", async {
            ensure_positive(amount)?;

            let deadline = Instant::now() + self.config.ledger.transaction_timeout();
            let mut tx = timeout_at(deadline, self.repository.begin())
                .await
                .map_err(|_| self.timeout_error())??;

            let key = payer_id.to_string();
            let lock = self.mutex.lock(&key, self.config.ledger.lock_ttl());
            let locked = match timeout_at(deadline, lock).await {
                Ok(locked) => locked,
                Err(_) => {
                    // the lock may have been taken before its reply was lost
                    release(self.mutex.as_ref(), &key, self.config.ledger.unlock_timeout()).await;
                    Err(self.timeout_error())
                }
            };
            if let Err(e) = locked {
                tracing::warn!(account_id = %payer_id, error = %e, "Failed to lock payer");
                self.rollback(tx, payer_id).await;
                return Err(e);
            }

            let result = timeout_at(
                deadline,
                self.transfer_locked(tx.as_mut(), payer_id, payee_id, amount),
            )
            .await
            .unwrap_or_else(|_| Err(self.timeout_error()));

            if result.is_err() {
                self.rollback(tx, payer_id).await;
            }
            release(self.mutex.as_ref(), &key, self.config.ledger.unlock_timeout()).await;

            let (correlated_id, compact) = result?;

            self.metrics.transfers_total.inc();
            tracing::info!(
                payer_id = %payer_id,
                payee_id = %payee_id,
                correlated_id = %correlated_id,
                amount = %amount,
                "Transfer committed"
            );

            // queued once the payer lock is free so the worker can take it
            if compact {
                self.request_compaction(payer_id);
            }

            Ok(correlated_id)
        })
        .await
    }

    async fn transfer_locked(
        &self,
        tx: &mut dyn RepositoryTx,
        payer_id: Uuid,
        payee_id: Uuid,
        amount: Money,
    ) -> Result<(Uuid, bool)> {
        let mut accounts = self
            .repository
            .find_accounts_by_ids(&[payer_id, payee_id])
            .await?;
        let mut payer = accounts
            .remove(&payer_id)
            .ok_or(Error::AccountNotFound(payer_id))?;
        let mut payee = match accounts.remove(&payee_id) {
            Some(payee) => payee,
            None if payee_id == payer_id => payer.clone(),
            None => return Err(Error::AccountNotFound(payee_id)),
        };

        self.authorizer.authorize(&payer).await?;

        let output = payer.transfer(&mut payee, amount)?;
        let compact = payer.wallet.len() >= self.compactor.wallet_size();

        let entries = [output.payer.clone(), output.payee.clone()];
        self.persist(tx, &entries, &payee, &output.payee).await?;

        Ok((output.correlated_id, compact))
    }

    /// Fold an account's active wallet into a snapshot entry
    ///
    /// Skips accounts whose wallet is below the configured size.
    pub async fn execute_snapshot_transaction(&self, account_id: Uuid) -> Result<CompactionOutcome> {
        self.compactor.run(account_id).await
    }

    /// Account view with its current balance
    pub async fn find_by_id(&self, account_id: Uuid) -> Result<AccountSummary> {
        self.observe("find_by_id", async {
            let account = self.repository.find_account(account_id).await?;
            Ok(account.summary())
        })
        .await
    }

    /// Every account with its current balance
    pub async fn find_all(&self) -> Result<Vec<AccountSummary>> {
        self.observe("find_all", async {
            let accounts = self.repository.find_all().await?;
            Ok(accounts.iter().map(Account::summary).collect())
        })
        .await
    }

    /// Check login credentials
    ///
    /// Unknown emails and wrong passwords fail the same way.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<AccountSummary> {
        self.observe("authenticate", async {
            let account = match self.repository.find_account_by_email(email).await {
                Ok(account) => account,
                Err(Error::EmailNotFound(_)) => return Err(invalid_credentials()),
                Err(e) => return Err(e),
            };

            if !account.credential.verify(password) {
                return Err(invalid_credentials());
            }

            Ok(account.summary())
        })
        .await
    }

    /// Stop the compaction worker, waiting for running compactions
    pub async fn shutdown(&self) -> Result<()> {
        match &self.compactions {
            Some(handle) => handle.shutdown().await,
            None => Ok(()),
        }
    }

    fn request_compaction(&self, account_id: Uuid) {
        match &self.compactions {
            Some(handle) => {
                if handle.try_enqueue(account_id) {
                    tracing::debug!(account_id = %account_id, "Compaction requested");
                }
            }
            None => {
                tracing::debug!(account_id = %account_id, "No compaction worker, request skipped");
            }
        }
    }

    /// Write entries, notify, then commit
    async fn persist(
        &self,
        tx: &mut dyn RepositoryTx,
        entries: &[Transaction],
        notify_account: &Account,
        notify_entry: &Transaction,
    ) -> Result<()> {
        tx.save_atomic_transactions(entries).await?;
        self.notifier.notify(notify_account, notify_entry).await?;
        tx.commit().await
    }

    async fn rollback(&self, mut tx: Box<dyn RepositoryTx>, account_id: Uuid) {
        match timeout(self.config.ledger.unlock_timeout(), tx.rollback()).await {
            Ok(Ok(())) => {
                tracing::debug!(account_id = %account_id, "Transaction rolled back");
            }
            Ok(Err(e)) => {
                tracing::error!(account_id = %account_id, error = %e, "Rollback failed");
            }
            // dropping the transaction discards its writes
            Err(_) => {
                tracing::error!(account_id = %account_id, "Rollback timed out");
            }
        }
    }

    async fn observe<T, F>(&self, operation: &'static str, body: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timer = self.metrics.duration(operation).start_timer();
        let result = body.await;
        timer.observe_duration();

        if let Err(e) = &result {
            self.metrics.record_failure(e.kind());
            tracing::warn!(operation, kind = %e.kind(), error = %e, "Operation failed");
        }

        result
    }

    fn timeout_error(&self) -> Error {
        Error::Timeout(self.config.ledger.transaction_timeout_ms)
    }
}

fn ensure_positive(amount: Money) -> Result<()> {
    if !amount.is_positive() {
        return Err(Error::Validation(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

fn invalid_credentials() -> Error {
    Error::Unauthorized("invalid email or password".to_string())
}
