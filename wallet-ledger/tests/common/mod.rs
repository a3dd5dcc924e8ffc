//! Test doubles for the ledger gateways

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use tokio::sync::mpsc;
use wallet_ledger::{
    actor::{CompactionHandle, CompactionMessage},
    memory::MemoryRepository, mutex::LocalMutex, Account, AccountType, Authorizer, Config,
    DistributedMutex, Error, Gateways, Ledger, Metrics, Money, NewAccount, Notifier, Result,
    Transaction,
};

/// Notifier recording every delivery, optionally failing or stalling
#[derive(Default)]
pub struct RecordingNotifier {
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
    delivered: Mutex<Vec<(Uuid, Uuid)>>,
}

impl RecordingNotifier {
    /// Make every following delivery fail (or succeed again)
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Sleep before every following delivery
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// (account_id, entry_id) pairs delivered so far
    pub fn delivered(&self) -> Vec<(Uuid, Uuid)> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, account: &Account, entry: &Transaction) -> Result<()> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Notification("service unavailable".to_string()));
        }
        self.delivered.lock().push((account.id, entry.id));
        Ok(())
    }
}

/// Authorizer that can deny or stall
#[derive(Default)]
pub struct StubAuthorizer {
    deny: bool,
    delay: Option<Duration>,
}

impl StubAuthorizer {
    pub fn denying() -> Self {
        Self {
            deny: true,
            delay: None,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            deny: false,
            delay: Some(delay),
        }
    }
}

#[async_trait]
impl Authorizer for StubAuthorizer {
    async fn authorize(&self, account: &Account) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.deny {
            return Err(Error::Unauthorized(format!("account {} denied", account.id)));
        }
        Ok(())
    }
}

/// Mutex whose lock always fails
pub struct FailingMutex;

#[async_trait]
impl DistributedMutex for FailingMutex {
    async fn lock(&self, key: &str, _ttl: Duration) -> Result<()> {
        Err(Error::LockContention(key.to_string()))
    }

    async fn unlock(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// Mutex whose lock lands in `inner` but replies only after `delay`
pub struct SlowMutex {
    pub inner: LocalMutex,
    delay: Duration,
}

impl SlowMutex {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: LocalMutex::new(),
            delay,
        }
    }
}

#[async_trait]
impl DistributedMutex for SlowMutex {
    async fn lock(&self, key: &str, ttl: Duration) -> Result<()> {
        self.inner.lock(key, ttl).await?;
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn unlock(&self, key: &str) -> Result<()> {
        self.inner.unlock(key).await
    }
}

/// Ledger over in-memory gateways
pub struct Harness {
    pub ledger: Ledger,
    pub repo: MemoryRepository,
    pub mutex: LocalMutex,
    pub notifier: Arc<RecordingNotifier>,
    /// Receiving end of a mailbox nobody drains, see `HarnessBuilder::stalled_worker`
    pub mailbox: Option<mpsc::Receiver<CompactionMessage>>,
}

pub struct HarnessBuilder {
    config: Config,
    authorizer: StubAuthorizer,
    mutex: Option<Arc<dyn DistributedMutex>>,
    worker: bool,
    stalled: Option<usize>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            authorizer: StubAuthorizer::default(),
            mutex: None,
            worker: false,
            stalled: None,
        }
    }

    pub fn wallet_size(mut self, size: usize) -> Self {
        self.config.snapshot.wallet_size = size;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.ledger.transaction_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn authorizer(mut self, authorizer: StubAuthorizer) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn mutex(mut self, mutex: Arc<dyn DistributedMutex>) -> Self {
        self.mutex = Some(mutex);
        self
    }

    pub fn with_worker(mut self) -> Self {
        self.worker = true;
        self
    }

    /// Attach a compaction mailbox of `capacity` that is never read
    pub fn stalled_worker(mut self, capacity: usize) -> Self {
        self.stalled = Some(capacity);
        self
    }

    pub fn build(self) -> Harness {
        let repo = MemoryRepository::new();
        let local = LocalMutex::new();
        let notifier = Arc::new(RecordingNotifier::default());

        let gateways = Gateways {
            repository: Arc::new(repo.clone()),
            mutex: self.mutex.unwrap_or_else(|| Arc::new(local.clone())),
            notifier: notifier.clone(),
            authorizer: Arc::new(self.authorizer),
        };

        let metrics = Metrics::new().unwrap();
        let mut ledger = Ledger::new(gateways, self.config, metrics.clone());
        if self.worker {
            ledger = ledger.with_compaction_worker();
        }

        let mut mailbox = None;
        if let Some(capacity) = self.stalled {
            let (tx, rx) = mpsc::channel(capacity);
            ledger = ledger.with_compaction_handle(CompactionHandle::new(tx, metrics));
            mailbox = Some(rx);
        }

        Harness {
            ledger,
            repo,
            mutex: local,
            notifier,
            mailbox,
        }
    }
}

impl Harness {
    /// Register an account and fund it with `balance` (no deposit when zero)
    pub async fn account(&self, account_type: AccountType, email: &str, balance: Money) -> Uuid {
        let id = self
            .ledger
            .execute_new_account(NewAccount {
                account_type,
                customer_name: "Fulano De Tal".to_string(),
                document_number: "1235678910".to_string(),
                email: email.to_string(),
                password: "PASSWORD".to_string(),
                phone_number: "+5511996344108".to_string(),
            })
            .await
            .unwrap();

        if balance.is_positive() {
            self.ledger.execute_deposit(id, balance).await.unwrap();
        }
        id
    }

    pub async fn balance(&self, id: Uuid) -> Money {
        self.ledger.find_by_id(id).await.unwrap().balance
    }
}
