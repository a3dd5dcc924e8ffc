//! Wallet Ledger
//!
//! Account ledger with append-only wallets, double-entry transfers and
//! background wallet compaction.
//!
//! # Architecture
//!
//! - **Append-only wallets**: balances are never stored, they are replayed from
//!   the active entries of an account
//! - **Double entry**: a transfer is a matched pair of entries sharing one
//!   correlation id, written atomically
//! - **Account mutex**: one writer per payer account across every node
//! - **Compaction**: long wallets are folded into a snapshot entry by a
//!   background worker

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]
//!
//! # Invariants
//!
//! - Money conservation: the sum of all balances equals the sum of all deposits
//! - Compaction never changes a balance
//! - Entries are never deleted; archival only sets the checkpoint id

pub mod actor;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod mutex;
pub mod service;
pub mod snapshot;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, ErrorKind, Result, Violation};
pub use gateway::{AccountRepository, Authorizer, DistributedMutex, Notifier, RepositoryTx};
pub use ledger::{Gateways, Ledger};
pub use metrics::Metrics;
pub use snapshot::{Checkpoint, CompactionOutcome, Compactor};
pub use storage::RocksRepository;
pub use types::{
    Account, AccountStatus, AccountSummary, AccountType, EntryType, Money, NewAccount,
    Transaction, TransferOutput, Wallet,
};
