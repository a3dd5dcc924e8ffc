//! In-process repository
//!
//! Keeps accounts and entries in maps behind a single `RwLock`. Transactions
//! buffer their writes and apply them under one write lock on commit, so a
//! reader never observes half of a transaction.

use crate::{
    error::{Error, Result},
    gateway::{AccountRepository, RepositoryTx},
    types::{Account, Transaction, Wallet},
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    emails: HashMap<String, Uuid>,
    entries: HashMap<Uuid, Transaction>,
    // entry ids per account, insertion order
    wallets: HashMap<Uuid, Vec<Uuid>>,
}

impl Tables {
    fn load(&self, id: Uuid) -> Result<Account> {
        let mut account = self
            .accounts
            .get(&id)
            .cloned()
            .ok_or(Error::AccountNotFound(id))?;

        let active = self
            .wallets
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|entry_id| self.entries.get(entry_id))
            .filter(|entry| !entry.is_archived())
            .cloned()
            .collect();

        account.wallet = Wallet::from_entries(active);
        Ok(account)
    }

    fn check_insert(&self, entries: &[Transaction]) -> Result<()> {
        for entry in entries {
            if self.entries.contains_key(&entry.id) {
                return Err(Error::Conflict(format!("entry {} already exists", entry.id)));
            }
            if !self.accounts.contains_key(&entry.account_id) {
                return Err(Error::AccountNotFound(entry.account_id));
            }
        }
        Ok(())
    }
}

/// Repository backed by in-memory maps
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Full entry history of an account, archived entries included
    pub fn history(&self, account_id: Uuid) -> Vec<Transaction> {
        let tables = self.tables.read();
        tables
            .wallets
            .get(&account_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.entries.get(id))
            .cloned()
            .collect()
    }

    /// Number of persisted entries across all accounts
    pub fn entry_count(&self) -> usize {
        self.tables.read().entries.len()
    }
}

#[async_trait]
impl AccountRepository for MemoryRepository {
    async fn begin(&self) -> Result<Box<dyn RepositoryTx>> {
        Ok(Box::new(MemoryTx {
            tables: self.tables.clone(),
            inserts: Vec::new(),
            archives: Vec::new(),
        }))
    }

    async fn create_account(&self, account: &Account) -> Result<()> {
        let mut tables = self.tables.write();

        if tables.accounts.contains_key(&account.id) {
            return Err(Error::Conflict(format!("account {} already exists", account.id)));
        }
        if tables.emails.contains_key(&account.email) {
            return Err(Error::Conflict(format!("email {} already registered", account.email)));
        }

        let mut stored = account.clone();
        stored.wallet = Wallet::default();
        tables.emails.insert(stored.email.clone(), stored.id);
        tables.wallets.entry(stored.id).or_default();
        tables.accounts.insert(stored.id, stored);

        for entry in account.wallet.iter() {
            tables.wallets.entry(account.id).or_default().push(entry.id);
            tables.entries.insert(entry.id, entry.clone());
        }

        Ok(())
    }

    async fn find_account(&self, id: Uuid) -> Result<Account> {
        self.tables.read().load(id)
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Account> {
        let tables = self.tables.read();
        let id = tables
            .emails
            .get(email)
            .copied()
            .ok_or_else(|| Error::EmailNotFound(email.to_string()))?;
        tables.load(id)
    }

    async fn find_all(&self) -> Result<Vec<Account>> {
        let tables = self.tables.read();
        let mut accounts = tables
            .accounts
            .keys()
            .map(|id| tables.load(*id))
            .collect::<Result<Vec<_>>>()?;
        accounts.sort_by_key(|a| a.created_at);
        Ok(accounts)
    }
}

struct MemoryTx {
    tables: Arc<RwLock<Tables>>,
    inserts: Vec<Transaction>,
    archives: Vec<(Uuid, Vec<Uuid>)>,
}

#[async_trait]
impl RepositoryTx for MemoryTx {
    async fn save_atomic_transactions(&mut self, entries: &[Transaction]) -> Result<()> {
        self.tables.read().check_insert(entries)?;

        if let Some(dup) = entries
            .iter()
            .find(|e| self.inserts.iter().any(|p| p.id == e.id))
        {
            return Err(Error::Conflict(format!("entry {} already exists", dup.id)));
        }

        self.inserts.extend_from_slice(entries);
        Ok(())
    }

    async fn set_snapshot_transactions(
        &mut self,
        snapshot_id: Uuid,
        entry_ids: &[Uuid],
    ) -> Result<()> {
        let tables = self.tables.read();
        let affected = entry_ids
            .iter()
            .filter(|id| {
                tables.entries.get(*id).map_or(false, |e| !e.is_archived())
                    || self.inserts.iter().any(|e| e.id == **id && !e.is_archived())
            })
            .count();

        if affected == 0 {
            return Err(Error::Storage(format!(
                "snapshot {}: no rows affected",
                snapshot_id
            )));
        }

        drop(tables);
        self.archives.push((snapshot_id, entry_ids.to_vec()));
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let mut tables = self.tables.write();
        tables.check_insert(&self.inserts)?;

        for entry in self.inserts.drain(..) {
            tables.wallets.entry(entry.account_id).or_default().push(entry.id);
            tables.entries.insert(entry.id, entry);
        }

        for (snapshot_id, ids) in self.archives.drain(..) {
            for id in ids {
                if let Some(entry) = tables.entries.get_mut(&id) {
                    if entry.snapshot_id.is_none() {
                        entry.snapshot_id = Some(snapshot_id);
                    }
                }
            }
        }

        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.inserts.clear();
        self.archives.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountType, Money, NewAccount};

    fn account(email: &str) -> Account {
        Account::new(NewAccount {
            account_type: AccountType::Personal,
            customer_name: "Fulano De Tal".to_string(),
            document_number: "1235678910".to_string(),
            email: email.to_string(),
            password: "PASSWORD".to_string(),
            phone_number: "+5511996344108".to_string(),
        })
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let repo = MemoryRepository::new();
        let acc = account("a@example.com");
        repo.create_account(&acc).await.unwrap();

        let found = repo.find_account(acc.id).await.unwrap();
        assert_eq!(found.id, acc.id);
        assert!(found.wallet.is_empty());

        let by_email = repo.find_account_by_email("a@example.com").await.unwrap();
        assert_eq!(by_email.id, acc.id);

        assert!(matches!(
            repo.create_account(&acc).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_find_missing() {
        let repo = MemoryRepository::new();
        let id = Uuid::new_v4();
        assert!(matches!(repo.find_account(id).await, Err(Error::AccountNotFound(x)) if x == id));
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let repo = MemoryRepository::new();
        let mut acc = account("a@example.com");
        repo.create_account(&acc).await.unwrap();
        let entry = acc.deposit(Money::REAL).unwrap();

        let mut tx = repo.begin().await.unwrap();
        tx.save_atomic_transactions(&[entry.clone()]).await.unwrap();
        assert!(repo.find_account(acc.id).await.unwrap().wallet.is_empty());

        tx.rollback().await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(repo.entry_count(), 0);

        let mut tx = repo.begin().await.unwrap();
        tx.save_atomic_transactions(&[entry]).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(repo.find_account(acc.id).await.unwrap().wallet.balance(), Money::REAL);
    }

    #[tokio::test]
    async fn test_dropped_tx_discards_writes() {
        let repo = MemoryRepository::new();
        let mut acc = account("a@example.com");
        repo.create_account(&acc).await.unwrap();
        let entry = acc.deposit(Money::REAL).unwrap();

        {
            let mut tx = repo.begin().await.unwrap();
            tx.save_atomic_transactions(&[entry]).await.unwrap();
        }

        assert_eq!(repo.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_archives_entries() {
        let repo = MemoryRepository::new();
        let mut acc = account("a@example.com");
        repo.create_account(&acc).await.unwrap();
        let e1 = acc.deposit(Money::REAL).unwrap();
        let e2 = acc.deposit(Money::REAL).unwrap();
        repo.save_atomic_transactions(&[e1.clone(), e2.clone()]).await.unwrap();

        let snapshot_id = Uuid::new_v4();
        repo.set_snapshot_transactions(snapshot_id, &[e1.id, e2.id]).await.unwrap();

        assert!(repo.find_account(acc.id).await.unwrap().wallet.is_empty());
        let history = repo.history(acc.id);
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|e| e.snapshot_id == Some(snapshot_id)));

        // nothing left to archive
        assert!(repo
            .set_snapshot_transactions(Uuid::new_v4(), &[e1.id, e2.id])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_find_accounts_by_ids_fails_on_first_miss() {
        let repo = MemoryRepository::new();
        let a = account("a@example.com");
        let b = account("b@example.com");
        repo.create_account(&a).await.unwrap();
        repo.create_account(&b).await.unwrap();

        let found = repo.find_accounts_by_ids(&[a.id, b.id]).await.unwrap();
        assert_eq!(found.len(), 2);

        let missing = Uuid::new_v4();
        let err = repo.find_accounts_by_ids(&[a.id, missing]).await.unwrap_err();
        assert!(matches!(err, Error::AccountNotFound(id) if id == missing));
    }
}
