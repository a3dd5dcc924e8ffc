//! Contracts for the external collaborators of the ledger
//!
//! The orchestration layer only talks to storage, locking, notification and
//! authorization through these traits. Implementations live in [`crate::storage`],
//! [`crate::memory`], [`crate::mutex`] and [`crate::service`].

use crate::{
    types::{Account, Transaction},
    Result,
};
use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Unit of work opened on a repository
///
/// Writes are invisible to readers until [`RepositoryTx::commit`]. Dropping an
/// open transaction discards its writes.
#[async_trait]
pub trait RepositoryTx: Send {
    /// Insert entries, all or nothing
    async fn save_atomic_transactions(&mut self, entries: &[Transaction]) -> Result<()>;

    /// Archive entries into a checkpoint; fails when no entry matched
    async fn set_snapshot_transactions(&mut self, snapshot_id: Uuid, entry_ids: &[Uuid])
        -> Result<()>;

    /// Make every write of this transaction durable and visible
    async fn commit(&mut self) -> Result<()>;

    /// Discard every write of this transaction
    async fn rollback(&mut self) -> Result<()>;
}

/// Durable store of accounts and their entries
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Open a transaction
    async fn begin(&self) -> Result<Box<dyn RepositoryTx>>;

    /// Persist a freshly registered account
    async fn create_account(&self, account: &Account) -> Result<()>;

    /// Load an account with its active (non-archived) entries
    async fn find_account(&self, id: Uuid) -> Result<Account>;

    /// Load an account by login email
    async fn find_account_by_email(&self, email: &str) -> Result<Account>;

    /// Load every account with its active entries
    async fn find_all(&self) -> Result<Vec<Account>>;

    /// Load several accounts concurrently
    ///
    /// Waits for every lookup and fails with the first error; lookups still in
    /// flight when an error arrives are dropped.
    async fn find_accounts_by_ids(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Account>> {
        let mut unique = ids.to_vec();
        unique.sort_unstable();
        unique.dedup();

        let accounts = try_join_all(unique.into_iter().map(|id| self.find_account(id))).await?;
        Ok(accounts.into_iter().map(|a| (a.id, a)).collect())
    }

    /// Insert entries in a transaction of their own
    async fn save_atomic_transactions(&self, entries: &[Transaction]) -> Result<()> {
        let mut tx = self.begin().await?;
        tx.save_atomic_transactions(entries).await?;
        tx.commit().await
    }

    /// Archive entries in a transaction of their own
    async fn set_snapshot_transactions(&self, snapshot_id: Uuid, entry_ids: &[Uuid]) -> Result<()> {
        let mut tx = self.begin().await?;
        tx.set_snapshot_transactions(snapshot_id, entry_ids).await?;
        tx.commit().await
    }
}

/// At-most-one-holder lock with expiry
#[async_trait]
pub trait DistributedMutex: Send + Sync {
    /// Take the lock or fail immediately with `LockContention` if it is held
    async fn lock(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Release the lock
    async fn unlock(&self, key: &str) -> Result<()>;
}

/// Tells an external party about a balance-affecting entry
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver the notification; an error rolls the triggering write back
    async fn notify(&self, account: &Account, entry: &Transaction) -> Result<()>;
}

/// External permission check run before a payer is debited
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Fails with `Unauthorized` when the account may not transfer
    async fn authorize(&self, account: &Account) -> Result<()>;
}
