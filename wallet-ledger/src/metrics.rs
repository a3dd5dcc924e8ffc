//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_accounts_created_total` - Accounts registered
//! - `ledger_deposits_total` - Committed deposits
//! - `ledger_transfers_total` - Committed transfers
//! - `ledger_compactions_total` - Committed snapshots
//! - `ledger_compactions_dropped_total` - Compaction requests dropped on a full queue
//! - `ledger_failures_total{kind}` - Failed operations by error kind
//! - `ledger_operation_duration_seconds{operation}` - Orchestration latency

use crate::error::ErrorKind;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Accounts registered
    pub accounts_created: IntCounter,

    /// Committed deposits
    pub deposits_total: IntCounter,

    /// Committed transfers
    pub transfers_total: IntCounter,

    /// Committed snapshots
    pub compactions_total: IntCounter,

    /// Compaction requests dropped
    pub compactions_dropped: IntCounter,

    /// Failures by error kind
    pub failures: IntCounterVec,

    /// Orchestration latency by operation
    pub operation_duration: HistogramVec,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("deposits_total", &self.deposits_total.get())
            .field("transfers_total", &self.transfers_total.get())
            .field("compactions_total", &self.compactions_total.get())
            .finish()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let accounts_created =
            IntCounter::new("ledger_accounts_created_total", "Accounts registered")?;
        registry.register(Box::new(accounts_created.clone()))?;

        let deposits_total = IntCounter::new("ledger_deposits_total", "Committed deposits")?;
        registry.register(Box::new(deposits_total.clone()))?;

        let transfers_total = IntCounter::new("ledger_transfers_total", "Committed transfers")?;
        registry.register(Box::new(transfers_total.clone()))?;

        let compactions_total =
            IntCounter::new("ledger_compactions_total", "Committed wallet snapshots")?;
        registry.register(Box::new(compactions_total.clone()))?;

        let compactions_dropped = IntCounter::new(
            "ledger_compactions_dropped_total",
            "Compaction requests dropped on a full or closed queue",
        )?;
        registry.register(Box::new(compactions_dropped.clone()))?;

        let failures = IntCounterVec::new(
            Opts::new("ledger_failures_total", "Failed operations by error kind"),
            &["kind"],
        )?;
        registry.register(Box::new(failures.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "ledger_operation_duration_seconds",
                "Histogram of orchestration latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            accounts_created,
            deposits_total,
            transfers_total,
            compactions_total,
            compactions_dropped,
            failures,
            operation_duration,
            registry,
        })
    }

    /// Record a failed operation
    pub fn record_failure(&self, kind: ErrorKind) {
        self.failures.with_label_values(&[kind.as_str()]).inc();
    }

    /// Failures recorded for `kind`
    pub fn failure_count(&self, kind: ErrorKind) -> u64 {
        self.failures.with_label_values(&[kind.as_str()]).get()
    }

    /// Latency histogram for one operation
    pub fn duration(&self, operation: &str) -> Histogram {
        self.operation_duration.with_label_values(&[operation])
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("metric names are static and unique")
    }
}
