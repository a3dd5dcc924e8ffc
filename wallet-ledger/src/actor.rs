//! Background compaction worker
//!
//! Transfers hand compaction requests to a dedicated task through a bounded
//! mailbox. The producer side never waits: when the mailbox is full the request
//! is dropped and logged, and the next transfer on the account asks again.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │        Ledger::execute_transfer (many tasks)          │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ CompactionHandle::try_enqueue
//!                       │ mpsc::channel (bounded, try_send)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │            CompactionWorker (single task)             │
//! │  in-flight set: one compaction per account            │
//! │  semaphore: at most `max_concurrent` runs             │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ JoinSet
//!                       ▼
//!              Compactor::run(account_id)
//! ```

use crate::{config::SnapshotConfig, metrics::Metrics, snapshot::Compactor, Error, Result};
use dashmap::DashSet;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

/// Message sent to the compaction worker
pub enum CompactionMessage {
    /// Compact one account
    Compact(Uuid),

    /// Reply once every compaction received so far has finished
    Flush {
        /// Completion signal
        response: oneshot::Sender<()>,
    },

    /// Finish running compactions and stop
    Shutdown {
        /// Completion signal
        response: oneshot::Sender<()>,
    },
}

/// Worker that owns the receiving end of the compaction mailbox
pub struct CompactionWorker {
    compactor: Arc<Compactor>,
    mailbox: mpsc::Receiver<CompactionMessage>,
    permits: Arc<Semaphore>,
    in_flight: Arc<DashSet<Uuid>>,
    tasks: JoinSet<()>,
}

impl CompactionWorker {
    /// Create new worker
    pub fn new(
        compactor: Arc<Compactor>,
        mailbox: mpsc::Receiver<CompactionMessage>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            compactor,
            mailbox,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: Arc::new(DashSet::new()),
            tasks: JoinSet::new(),
        }
    }

    /// Run the worker event loop
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                msg = self.mailbox.recv() => match msg {
                    Some(CompactionMessage::Compact(account_id)) => {
                        self.start(account_id).await;
                    }
                    Some(CompactionMessage::Flush { response }) => {
                        self.drain().await;
                        let _ = response.send(());
                    }
                    Some(CompactionMessage::Shutdown { response }) => {
                        self.drain().await;
                        let _ = response.send(());
                        break;
                    }
                    // every handle dropped
                    None => {
                        self.drain().await;
                        break;
                    }
                },

                // Reap finished runs
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Compaction task failed: {}", e);
                    }
                }
            }
        }

        tracing::info!("Compaction worker stopped");
    }

    async fn start(&mut self, account_id: Uuid) {
        if !self.in_flight.insert(account_id) {
            tracing::debug!(account_id = %account_id, "Compaction already running, request ignored");
            return;
        }

        // Waiting here leaves requests in the mailbox, which is what bounds it
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.in_flight.remove(&account_id);
                return;
            }
        };

        let compactor = self.compactor.clone();
        let in_flight = self.in_flight.clone();

        self.tasks.spawn(async move {
            // failures are logged and counted by the compactor
            let _ = compactor.run(account_id).await;
            in_flight.remove(&account_id);
            drop(permit);
        });
    }

    async fn drain(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Compaction task failed: {}", e);
            }
        }
    }
}

/// Handle for sending messages to the worker
#[derive(Clone)]
pub struct CompactionHandle {
    sender: mpsc::Sender<CompactionMessage>,
    metrics: Metrics,
}

impl CompactionHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<CompactionMessage>, metrics: Metrics) -> Self {
        Self { sender, metrics }
    }

    /// Queue a compaction without waiting
    ///
    /// Returns `false` when the request was dropped because the mailbox is full
    /// or the worker is gone.
    pub fn try_enqueue(&self, account_id: Uuid) -> bool {
        match self.sender.try_send(CompactionMessage::Compact(account_id)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.metrics.compactions_dropped.inc();
                tracing::warn!(account_id = %account_id, "Compaction queue full, request dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.compactions_dropped.inc();
                tracing::warn!(account_id = %account_id, "Compaction worker stopped, request dropped");
                false
            }
        }
    }

    /// Wait until every request queued so far has been processed
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CompactionMessage::Flush { response: tx })
            .await
            .map_err(|_| Error::Concurrency("Compaction mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Stop the worker after running compactions complete
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CompactionMessage::Shutdown { response: tx })
            .await
            .map_err(|_| Error::Concurrency("Compaction mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }
}

/// Spawn the compaction worker
pub fn spawn_compaction_worker(
    compactor: Arc<Compactor>,
    config: &SnapshotConfig,
    metrics: Metrics,
) -> CompactionHandle {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let worker = CompactionWorker::new(compactor, rx, config.max_concurrent);

    tokio::spawn(async move {
        worker.run().await;
    });

    CompactionHandle::new(tx, metrics)
}
