//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (integer cents for money)
//! - Append-only wallets: entries are never edited after persistence,
//!   except for the archival mark set by compaction

use crate::error::{Error, Result, Violation};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub};
use uuid::Uuid;

/// Amount in the smallest currency unit (cents)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// One cent
    pub const CENT: Money = Money(1);
    /// One real (100 cents)
    pub const REAL: Money = Money(100);
    /// One thousand reais
    pub const MIL_REAIS: Money = Money(100_000);
    /// Zero
    pub const ZERO: Money = Money(0);

    /// Create from a count of cents
    pub const fn new(cents: i64) -> Self {
        Self(cents)
    }

    /// Count of cents
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Non-negative magnitude, `None` for `i64::MIN` cents
    pub fn absolute(&self) -> Option<Money> {
        self.0.checked_abs().map(Money)
    }

    /// Sum, `None` on overflow
    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    /// Difference, `None` on overflow
    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.0.checked_sub(rhs.0).map(Money)
    }

    /// Multiply by an integer factor
    pub const fn times(self, factor: i64) -> Money {
        Money(self.0 * factor)
    }

    /// True when strictly greater than zero
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Exact decimal representation (two fractional digits)
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, 2)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} BRL", self.to_decimal())
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}

impl From<i64> for Money {
    fn from(cents: i64) -> Self {
        Money(cents)
    }
}

/// Account type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountType {
    /// Regular customer, may send and receive
    Personal,
    /// Merchant, may only receive
    Seller,
}

impl AccountType {
    /// Canonical code
    pub fn code(&self) -> &'static str {
        match self {
            AccountType::Personal => "PERSONAL",
            AccountType::Seller => "SELLER",
        }
    }

    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PERSONAL" => Some(AccountType::Personal),
            "SELLER" => Some(AccountType::Seller),
            _ => None,
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountStatus {
    /// Open for deposits and transfers
    Active,
    /// Closed by an administrative action
    Canceled,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountStatus::Active => f.write_str("ACTIVE"),
            AccountStatus::Canceled => f.write_str("CANCELED"),
        }
    }
}

/// Kind of ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryType {
    /// Money entering the account from outside
    Deposit = 1,
    /// Payer leg of a transfer (negative amount)
    TransferOut = 2,
    /// Payee leg of a transfer (positive amount)
    TransferIn = 3,
    /// Checkpoint folding earlier entries
    Snapshot = 4,
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            EntryType::Deposit => "DEPOSIT",
            EntryType::TransferOut => "TRANSFER_OUT",
            EntryType::TransferIn => "TRANSFER_IN",
            EntryType::Snapshot => "SNAPSHOT",
        };
        f.write_str(code)
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Entry ID
    pub id: Uuid,

    /// Owning account
    pub account_id: Uuid,

    /// Entry kind
    pub entry_type: EntryType,

    /// Signed amount
    pub amount: Money,

    /// Creation time (UTC)
    pub timestamp: DateTime<Utc>,

    /// Shared by both legs of one transfer
    pub correlated_id: Option<Uuid>,

    /// Checkpoint this entry was folded into (archived when set)
    pub snapshot_id: Option<Uuid>,

    /// Previous entry of the same wallet at creation time
    pub parent_id: Option<Uuid>,
}

impl Transaction {
    /// True once folded into a checkpoint
    pub fn is_archived(&self) -> bool {
        self.snapshot_id.is_some()
    }
}

/// Ordered collection of active entries of one account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    entries: Vec<Transaction>,
}

impl Wallet {
    /// Create from entries in chronological order
    pub fn from_entries(entries: Vec<Transaction>) -> Self {
        Self { entries }
    }

    /// Sum of all entries held
    pub fn balance(&self) -> Money {
        self.entries.iter().map(|t| t.amount).sum()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the wallet holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in chronological order
    pub fn entries(&self) -> &[Transaction] {
        &self.entries
    }

    /// Iterate entries in chronological order
    pub fn iter(&self) -> std::slice::Iter<'_, Transaction> {
        self.entries.iter()
    }

    /// Most recent entry
    pub fn last(&self) -> Option<&Transaction> {
        self.entries.last()
    }

    pub(crate) fn replace(&mut self, entries: Vec<Transaction>) -> Vec<Transaction> {
        std::mem::replace(&mut self.entries, entries)
    }

    pub(crate) fn push(&mut self, entry: Transaction) {
        self.entries.push(entry);
    }

    /// Timestamp for the next entry, strictly after the last one
    pub(crate) fn next_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last() {
            Some(last) if last.timestamp >= now => last.timestamp + chrono::Duration::nanoseconds(1),
            _ => now,
        }
    }
}

impl<'a> IntoIterator for &'a Wallet {
    type Item = &'a Transaction;
    type IntoIter = std::slice::Iter<'a, Transaction>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Salted password hash, format `SHA256:<salt>:<digest>`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential(String);

impl Credential {
    /// Hash a password with a fresh random salt
    pub fn generate(password: &str) -> Self {
        let salt: [u8; 16] = rand::random();
        let salt = to_hex(&salt);
        let digest = Self::digest(&salt, password);
        Self(format!("SHA256:{}:{}", salt, digest))
    }

    /// Wrap an already encoded credential
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Encoded form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check a password against this credential
    pub fn verify(&self, password: &str) -> bool {
        let mut parts = self.0.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("SHA256"), Some(salt), Some(expected)) => {
                let actual = Self::digest(salt, password);
                // compare every byte regardless of where the first mismatch is
                actual.len() == expected.len()
                    && actual
                        .bytes()
                        .zip(expected.bytes())
                        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                        == 0
            }
            _ => false,
        }
    }

    fn digest(salt: &str, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(password.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Registration input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    /// Account type
    pub account_type: AccountType,
    /// Customer name
    pub customer_name: String,
    /// Tax document (CPF/CNPJ)
    pub document_number: String,
    /// Login email
    pub email: String,
    /// Plain password, hashed on registration
    pub password: String,
    /// Contact phone
    pub phone_number: String,
}

impl NewAccount {
    /// Reject blank required fields
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("customer_name", &self.customer_name),
            ("document_number", &self.document_number),
            ("email", &self.email),
            ("password", &self.password),
            ("phone_number", &self.phone_number),
        ];

        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("{} is required", name)));
            }
        }

        Ok(())
    }
}

/// Account with its active wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Account ID
    pub id: Uuid,
    /// Account type
    pub account_type: AccountType,
    /// Customer name
    pub customer_name: String,
    /// Tax document
    pub document_number: String,
    /// Login email
    pub email: String,
    /// Salted password hash
    pub credential: Credential,
    /// Contact phone
    pub phone_number: String,
    /// Status
    pub status: AccountStatus,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
    /// Active (non-archived) entries
    #[serde(skip)]
    pub wallet: Wallet,
}

impl Account {
    /// Build an active account with an empty wallet
    pub fn new(input: NewAccount) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_type: input.account_type,
            customer_name: input.customer_name,
            document_number: input.document_number,
            email: input.email,
            credential: Credential::generate(&input.password),
            phone_number: input.phone_number,
            status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
            wallet: Wallet::default(),
        }
    }

    /// Append a deposit entry
    pub fn deposit(&mut self, amount: Money) -> Result<Transaction> {
        let account_id = self.id;
        let rejected = |violation| Error::InvalidState {
            violation,
            account_id,
            entry_type: EntryType::Deposit,
            amount,
        };

        if self.status == AccountStatus::Canceled {
            return Err(rejected(Violation::AccountCanceled));
        }

        let value = amount
            .absolute()
            .filter(|v| self.wallet.balance().checked_add(*v).is_some())
            .ok_or_else(|| rejected(Violation::BalanceOverflow))?;

        let entry = Transaction {
            id: Uuid::new_v4(),
            account_id,
            entry_type: EntryType::Deposit,
            amount: value,
            timestamp: self.wallet.next_timestamp(Utc::now()),
            correlated_id: None,
            snapshot_id: None,
            parent_id: self.wallet.last().map(|t| t.id),
        };

        self.wallet.push(entry.clone());
        Ok(entry)
    }

    /// Move `amount` from this account to `payee`, producing a matched pair of entries
    pub fn transfer(&mut self, payee: &mut Account, amount: Money) -> Result<TransferOutput> {
        let magnitude = amount.absolute();
        let value = magnitude.unwrap_or(Money::ZERO);
        let violation = if self.account_type == AccountType::Seller {
            Some(Violation::SellerCannotTransfer)
        } else if self.id == payee.id {
            Some(Violation::SelfTransfer)
        } else if magnitude.is_none() {
            Some(Violation::BalanceOverflow)
        } else if self.wallet.balance() < value {
            Some(Violation::InsufficientBalance)
        } else if payee.wallet.balance().checked_add(value).is_none() {
            Some(Violation::BalanceOverflow)
        } else {
            None
        };

        if let Some(violation) = violation {
            return Err(Error::InvalidState {
                violation,
                account_id: self.id,
                entry_type: EntryType::TransferOut,
                amount,
            });
        }

        let now = Utc::now();
        let correlated_id = Uuid::new_v4();

        let payer = Transaction {
            id: Uuid::new_v4(),
            account_id: self.id,
            entry_type: EntryType::TransferOut,
            amount: -value,
            timestamp: self.wallet.next_timestamp(now),
            correlated_id: Some(correlated_id),
            snapshot_id: None,
            parent_id: self.wallet.last().map(|t| t.id),
        };

        let payee_entry = Transaction {
            id: Uuid::new_v4(),
            account_id: payee.id,
            entry_type: EntryType::TransferIn,
            amount: value,
            timestamp: payee.wallet.next_timestamp(now),
            correlated_id: Some(correlated_id),
            snapshot_id: None,
            parent_id: payee.wallet.last().map(|t| t.id),
        };

        self.wallet.push(payer.clone());
        payee.wallet.push(payee_entry.clone());

        Ok(TransferOutput {
            payer,
            payee: payee_entry,
            correlated_id,
        })
    }

    /// Public view with the computed balance
    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            id: self.id,
            account_type: self.account_type,
            customer_name: self.customer_name.clone(),
            email: self.email.clone(),
            status: self.status,
            balance: self.wallet.balance(),
        }
    }
}

/// Both legs of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutput {
    /// Negative entry on the payer
    pub payer: Transaction,
    /// Positive entry on the payee
    pub payee: Transaction,
    /// Identifier shared by both legs
    pub correlated_id: Uuid,
}

/// Account view returned by queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    /// Account ID
    pub id: Uuid,
    /// Account type
    pub account_type: AccountType,
    /// Customer name
    pub customer_name: String,
    /// Login email
    pub email: String,
    /// Status
    pub status: AccountStatus,
    /// Balance replayed from the active wallet
    pub balance: Money,
}
