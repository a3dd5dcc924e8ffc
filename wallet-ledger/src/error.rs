//! Error types for the ledger

use crate::types::{EntryType, Money};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Domain rule broken by a deposit or transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// Canceled accounts cannot receive deposits
    AccountCanceled,
    /// Seller accounts may only receive funds
    SellerCannotTransfer,
    /// Payer and payee are the same account
    SelfTransfer,
    /// Payer balance is lower than the requested amount
    InsufficientBalance,
    /// Resulting balance does not fit in a `Money`
    BalanceOverflow,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Violation::AccountCanceled => "account canceled cannot deposit",
            Violation::SellerCannotTransfer => "seller account cannot make transfers",
            Violation::SelfTransfer => "account cannot transfer to itself",
            Violation::InsufficientBalance => "insufficient balance",
            Violation::BalanceOverflow => "balance out of range",
        };
        f.write_str(msg)
    }
}

/// Failure kinds surfaced by the orchestration layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Account lookup miss
    NotFound,
    /// Domain rule violation
    InvalidState,
    /// Mutex not acquired
    LockContention,
    /// External authorization denied
    Unauthorized,
    /// Notifier/repository/lock backend I/O error
    DependencyFailure,
    /// Operation exceeded its deadline
    Timeout,
}

impl ErrorKind {
    /// Label used in metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::LockContention => "lock_contention",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::DependencyFailure => "dependency_failure",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    /// No account registered with this email
    #[error("Email not found: {0}")]
    EmailNotFound(String),

    /// Domain rule violation on a deposit or transfer
    #[error("transaction_error: {violation} -> account_id={account_id}, transaction_type={entry_type}, amount={amount}")]
    InvalidState {
        /// Rule that was broken
        violation: Violation,
        /// Account that attempted the operation
        account_id: Uuid,
        /// Kind of entry that was being produced
        entry_type: EntryType,
        /// Requested amount
        amount: Money,
    },

    /// Input rejected before reaching the domain
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unique constraint hit in the repository
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Distributed mutex is held by someone else
    #[error("mutex: key is locked: {0}")]
    LockContention(String),

    /// Authorizer denied the operation or credentials did not match
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Notifier rejected or failed to deliver
    #[error("Notification failed: {0}")]
    Notification(String),

    /// Storage error (RocksDB or in-memory store)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Lock backend error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// HTTP gateway error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Concurrency error (worker mailbox closed, task panicked, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Operation exceeded its deadline
    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Taxonomy kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AccountNotFound(_) | Error::EmailNotFound(_) => ErrorKind::NotFound,
            Error::InvalidState { .. } | Error::Validation(_) | Error::Conflict(_) => {
                ErrorKind::InvalidState
            }
            Error::LockContention(_) => ErrorKind::LockContention,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Notification(_)
            | Error::Storage(_)
            | Error::Serialization(_)
            | Error::Redis(_)
            | Error::Http(_)
            | Error::Concurrency(_)
            | Error::Config(_)
            | Error::Io(_) => ErrorKind::DependencyFailure,
        }
    }

    /// Domain violation carried by an `InvalidState` error
    pub fn violation(&self) -> Option<Violation> {
        match self {
            Error::InvalidState { violation, .. } => Some(*violation),
            _ => None,
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
