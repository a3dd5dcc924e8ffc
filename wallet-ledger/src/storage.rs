//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Account records without wallets (key: account_id)
//! - `emails` - Login index (key: email, value: account_id)
//! - `entries` - Append-only entry log (key: entry_id)
//! - `active` - Non-archived entries per account
//!   (key: account_id || timestamp_nanos || entry_id, value: empty)
//!
//! Commits are serialized through one writer lock and applied with a single
//! `WriteBatch`, so every transaction lands atomically.

use crate::{
    error::{Error, Result},
    gateway::{AccountRepository, RepositoryTx},
    types::{Account, Transaction, Wallet},
    Config,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_EMAILS: &str = "emails";
const CF_ENTRIES: &str = "entries";
const CF_ACTIVE: &str = "active";

/// RocksDB-backed repository
#[derive(Clone)]
pub struct RocksRepository {
    inner: Arc<Inner>,
}

struct Inner {
    db: DB,
    // single writer: commit checks and batch writes never interleave
    writer: Mutex<()>,
}

impl RocksRepository {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_lz4()),
            ColumnFamilyDescriptor::new(CF_EMAILS, Self::cf_options_lz4()),
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_entries()),
            ColumnFamilyDescriptor::new(CF_ACTIVE, Self::cf_options_lz4()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB ledger store");

        Ok(Self {
            inner: Arc::new(Inner {
                db,
                writer: Mutex::new(()),
            }),
        })
    }

    // Column family options

    fn cf_options_entries() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_lz4() -> Options {
        let mut opts = Options::default();
        // frequently read, favour speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    /// Full entry history of an account, archived entries included
    pub fn history(&self, account_id: Uuid) -> Result<Vec<Transaction>> {
        let cf = self.inner.cf(CF_ENTRIES)?;
        let mut history = Vec::new();

        for item in self.inner.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            let entry: Transaction = bincode::deserialize(&value)?;
            if entry.account_id == account_id {
                history.push(entry);
            }
        }

        history.sort_by_key(|e| e.timestamp);
        Ok(history)
    }
}

impl Inner {
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn get_entry(&self, id: Uuid) -> Result<Option<Transaction>> {
        let cf = self.cf(CF_ENTRIES)?;
        match self.db.get_cf(&cf, id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn load(&self, id: Uuid) -> Result<Account> {
        let cf_accounts = self.cf(CF_ACCOUNTS)?;
        let value = self
            .db
            .get_cf(&cf_accounts, id.as_bytes())?
            .ok_or(Error::AccountNotFound(id))?;
        let mut account: Account = bincode::deserialize(&value)?;

        // Scan index: account_id || timestamp || entry_id
        let cf_active = self.cf(CF_ACTIVE)?;
        let prefix = id.as_bytes();
        let iter = self
            .db
            .iterator_cf(&cf_active, IteratorMode::From(&prefix[..], Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            let entry_id = entry_id_from_index(&key)?;
            let entry = self
                .get_entry(entry_id)?
                .ok_or_else(|| Error::Storage(format!("dangling index for entry {}", entry_id)))?;
            entries.push(entry);
        }

        account.wallet = Wallet::from_entries(entries);
        Ok(account)
    }
}

// Index key helpers

fn active_key(entry: &Transaction) -> Vec<u8> {
    let nanos = entry.timestamp.timestamp_nanos_opt().unwrap_or(0).max(0) as u64;
    let mut key = Vec::with_capacity(40);
    key.extend_from_slice(entry.account_id.as_bytes());
    key.extend_from_slice(&nanos.to_be_bytes());
    key.extend_from_slice(entry.id.as_bytes());
    key
}

fn entry_id_from_index(key: &[u8]) -> Result<Uuid> {
    let bytes: [u8; 16] = key
        .get(24..40)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::Storage("malformed active index key".to_string()))?;
    Ok(Uuid::from_bytes(bytes))
}

#[async_trait]
impl AccountRepository for RocksRepository {
    async fn begin(&self) -> Result<Box<dyn RepositoryTx>> {
        Ok(Box::new(RocksTx {
            inner: self.inner.clone(),
            inserts: Vec::new(),
            archives: Vec::new(),
        }))
    }

    async fn create_account(&self, account: &Account) -> Result<()> {
        let inner = &self.inner;
        let _writer = inner.writer.lock();

        let cf_accounts = inner.cf(CF_ACCOUNTS)?;
        let cf_emails = inner.cf(CF_EMAILS)?;

        if inner.db.get_cf(&cf_accounts, account.id.as_bytes())?.is_some() {
            return Err(Error::Conflict(format!("account {} already exists", account.id)));
        }
        if inner.db.get_cf(&cf_emails, account.email.as_bytes())?.is_some() {
            return Err(Error::Conflict(format!("email {} already registered", account.email)));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_accounts, account.id.as_bytes(), bincode::serialize(account)?);
        batch.put_cf(&cf_emails, account.email.as_bytes(), account.id.as_bytes());

        let cf_entries = inner.cf(CF_ENTRIES)?;
        let cf_active = inner.cf(CF_ACTIVE)?;
        for entry in account.wallet.iter() {
            batch.put_cf(&cf_entries, entry.id.as_bytes(), bincode::serialize(entry)?);
            if !entry.is_archived() {
                batch.put_cf(&cf_active, active_key(entry), b"");
            }
        }

        inner.db.write(batch)?;

        tracing::debug!(account_id = %account.id, "Account stored");
        Ok(())
    }

    async fn find_account(&self, id: Uuid) -> Result<Account> {
        self.inner.load(id)
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Account> {
        let cf_emails = self.inner.cf(CF_EMAILS)?;
        let value = self
            .inner
            .db
            .get_cf(&cf_emails, email.as_bytes())?
            .ok_or_else(|| Error::EmailNotFound(email.to_string()))?;
        let bytes: [u8; 16] = value
            .as_slice()
            .try_into()
            .map_err(|_| Error::Storage("malformed email index".to_string()))?;
        self.inner.load(Uuid::from_bytes(bytes))
    }

    async fn find_all(&self) -> Result<Vec<Account>> {
        let cf_accounts = self.inner.cf(CF_ACCOUNTS)?;
        let mut accounts = Vec::new();

        for item in self.inner.db.iterator_cf(&cf_accounts, IteratorMode::Start) {
            let (key, _) = item?;
            let bytes: [u8; 16] = key
                .as_ref()
                .try_into()
                .map_err(|_| Error::Storage("malformed account key".to_string()))?;
            accounts.push(self.inner.load(Uuid::from_bytes(bytes))?);
        }

        accounts.sort_by_key(|a| a.created_at);
        Ok(accounts)
    }
}

struct RocksTx {
    inner: Arc<Inner>,
    inserts: Vec<Transaction>,
    archives: Vec<(Uuid, Vec<Uuid>)>,
}

impl RocksTx {
    fn is_active(&self, id: Uuid) -> Result<bool> {
        if let Some(pending) = self.inserts.iter().find(|e| e.id == id) {
            return Ok(!pending.is_archived());
        }
        Ok(self.inner.get_entry(id)?.map_or(false, |e| !e.is_archived()))
    }
}

#[async_trait]
impl RepositoryTx for RocksTx {
    async fn save_atomic_transactions(&mut self, entries: &[Transaction]) -> Result<()> {
        for entry in entries {
            if self.inserts.iter().any(|p| p.id == entry.id)
                || self.inner.get_entry(entry.id)?.is_some()
            {
                return Err(Error::Conflict(format!("entry {} already exists", entry.id)));
            }
        }

        self.inserts.extend_from_slice(entries);
        Ok(())
    }

    async fn set_snapshot_transactions(
        &mut self,
        snapshot_id: Uuid,
        entry_ids: &[Uuid],
    ) -> Result<()> {
        let mut affected = 0usize;
        for id in entry_ids {
            if self.is_active(*id)? {
                affected += 1;
            }
        }

        if affected == 0 {
            return Err(Error::Storage(format!(
                "snapshot {}: no rows affected",
                snapshot_id
            )));
        }

        self.archives.push((snapshot_id, entry_ids.to_vec()));
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let inner = self.inner.clone();
        let _writer = inner.writer.lock();

        let cf_accounts = inner.cf(CF_ACCOUNTS)?;
        let cf_entries = inner.cf(CF_ENTRIES)?;
        let cf_active = inner.cf(CF_ACTIVE)?;

        let mut pending: HashMap<Uuid, Transaction> = HashMap::new();
        for entry in &self.inserts {
            if inner.get_entry(entry.id)?.is_some() {
                return Err(Error::Conflict(format!("entry {} already exists", entry.id)));
            }
            if inner.db.get_cf(&cf_accounts, entry.account_id.as_bytes())?.is_none() {
                return Err(Error::AccountNotFound(entry.account_id));
            }
            pending.insert(entry.id, entry.clone());
        }

        let mut batch = WriteBatch::default();

        for (snapshot_id, ids) in &self.archives {
            for id in ids {
                let current = match pending.get(id) {
                    Some(entry) => Some(entry.clone()),
                    None => inner.get_entry(*id)?,
                };

                if let Some(mut entry) = current.filter(|e| !e.is_archived()) {
                    if !pending.contains_key(id) {
                        batch.delete_cf(&cf_active, active_key(&entry));
                    }
                    entry.snapshot_id = Some(*snapshot_id);
                    pending.insert(entry.id, entry);
                }
            }
        }

        for entry in pending.values() {
            batch.put_cf(&cf_entries, entry.id.as_bytes(), bincode::serialize(entry)?);
        }
        for entry in self.inserts.iter() {
            if pending.get(&entry.id).map_or(false, |e| !e.is_archived()) {
                batch.put_cf(&cf_active, active_key(entry), b"");
            }
        }

        inner.db.write(batch)?;

        tracing::debug!(
            inserted = self.inserts.len(),
            archived = self.archives.iter().map(|(_, ids)| ids.len()).sum::<usize>(),
            "Repository transaction committed"
        );

        self.inserts.clear();
        self.archives.clear();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.inserts.clear();
        self.archives.clear();
        Ok(())
    }
}
