//! Wallet compaction
//!
//! A wallet that grew past the configured size is folded into a single
//! `Snapshot` entry carrying the running balance. Folded entries stay in the
//! store, marked with the checkpoint id, so history is never lost and the
//! balance replayed from the active wallet is unchanged.

use crate::{
    error::{Error, Result},
    gateway::{AccountRepository, DistributedMutex, RepositoryTx},
    metrics::Metrics,
    mutex::release,
    types::{EntryType, Money, Transaction, Wallet},
    Config,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

/// Result of folding a wallet in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// New `Snapshot` entry, now the only entry of the wallet
    pub entry: Transaction,
    /// Entries folded into `entry`
    pub archived: Vec<Uuid>,
}

impl Wallet {
    /// Fold every entry into one checkpoint carrying the current balance
    ///
    /// Folded entries get the checkpoint id as `snapshot_id`; the wallet is
    /// left holding the checkpoint alone.
    pub fn snapshot(&mut self, account_id: Uuid) -> Checkpoint {
        let entry = Transaction {
            id: Uuid::new_v4(),
            account_id,
            entry_type: EntryType::Snapshot,
            amount: self.balance(),
            timestamp: self.next_timestamp(Utc::now()),
            correlated_id: None,
            snapshot_id: None,
            parent_id: self.last().map(|t| t.id),
        };

        let folded = self.replace(vec![entry.clone()]);
        let archived = folded.into_iter().map(|t| t.id).collect();

        Checkpoint { entry, archived }
    }
}

/// What a compaction run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Wallet folded and persisted
    Compacted {
        /// Id of the new `Snapshot` entry
        snapshot_id: Uuid,
        /// Entries archived
        folded: usize,
        /// Balance carried by the checkpoint
        balance: Money,
    },
    /// Wallet below the threshold, nothing written
    Skipped {
        /// Active entries found
        wallet_len: usize,
    },
}

/// Runs compactions for single accounts under the account mutex
pub struct Compactor {
    repository: Arc<dyn AccountRepository>,
    mutex: Arc<dyn DistributedMutex>,
    wallet_size: usize,
    lock_ttl: Duration,
    timeout: Duration,
    unlock_timeout: Duration,
    metrics: Metrics,
}

impl Compactor {
    /// Create a compactor sharing the ledger's gateways
    pub fn new(
        repository: Arc<dyn AccountRepository>,
        mutex: Arc<dyn DistributedMutex>,
        config: &Config,
        metrics: Metrics,
    ) -> Self {
        Self {
            repository,
            mutex,
            wallet_size: config.snapshot.wallet_size,
            lock_ttl: config.ledger.lock_ttl(),
            timeout: config.ledger.transaction_timeout(),
            unlock_timeout: config.ledger.unlock_timeout(),
            metrics,
        }
    }

    /// Wallet length at which compaction kicks in
    pub fn wallet_size(&self) -> usize {
        self.wallet_size
    }

    /// Compact one account
    ///
    /// Fails with `LockContention` when another operation holds the account,
    /// and with `Timeout` when the run exceeds the transaction deadline. The
    /// mutex is released on every path once it was taken.
    pub async fn run(&self, account_id: Uuid) -> Result<CompactionOutcome> {
        let _timer = self.metrics.duration("snapshot").start_timer();
        let deadline = Instant::now() + self.timeout;
        let key = account_id.to_string();

        let result = match timeout_at(deadline, self.mutex.lock(&key, self.lock_ttl)).await {
            Ok(Ok(())) => {
                let body = timeout_at(deadline, self.compact_locked(account_id)).await;
                release(self.mutex.as_ref(), &key, self.unlock_timeout).await;
                body.unwrap_or_else(|_| Err(Error::Timeout(self.timeout.as_millis() as u64)))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                release(self.mutex.as_ref(), &key, self.unlock_timeout).await;
                Err(Error::Timeout(self.timeout.as_millis() as u64))
            }
        };

        match &result {
            Ok(CompactionOutcome::Compacted {
                snapshot_id,
                folded,
                balance,
            }) => {
                self.metrics.compactions_total.inc();
                tracing::info!(
                    account_id = %account_id,
                    snapshot_id = %snapshot_id,
                    folded,
                    balance = %balance,
                    "Done snapshot"
                );
            }
            Ok(CompactionOutcome::Skipped { wallet_len }) => {
                tracing::debug!(
                    account_id = %account_id,
                    wallet_len,
                    threshold = self.wallet_size,
                    "Wallet below threshold, snapshot skipped"
                );
            }
            Err(e) => {
                self.metrics.record_failure(e.kind());
                tracing::warn!(account_id = %account_id, error = %e, "Snapshot aborted");
            }
        }

        result
    }

    async fn compact_locked(&self, account_id: Uuid) -> Result<CompactionOutcome> {
        let mut account = self.repository.find_account(account_id).await?;

        let wallet_len = account.wallet.len();
        if wallet_len < self.wallet_size {
            return Ok(CompactionOutcome::Skipped { wallet_len });
        }

        let checkpoint = account.wallet.snapshot(account_id);

        let mut tx = self.repository.begin().await?;
        if let Err(e) = persist(tx.as_mut(), &checkpoint).await {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(account_id = %account_id, error = %rollback_err, "Rollback failed");
            }
            return Err(e);
        }

        Ok(CompactionOutcome::Compacted {
            snapshot_id: checkpoint.entry.id,
            folded: checkpoint.archived.len(),
            balance: checkpoint.entry.amount,
        })
    }
}

async fn persist(tx: &mut dyn RepositoryTx, checkpoint: &Checkpoint) -> Result<()> {
    tx.save_atomic_transactions(std::slice::from_ref(&checkpoint.entry))
        .await?;
    tx.set_snapshot_transactions(checkpoint.entry.id, &checkpoint.archived)
        .await?;
    tx.commit().await
}
