//! ---
//! pps_section: "04-persistence"
//! pps_subsection: "module"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Prometheus metrics for the file store."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{self, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

/// Metrics published by the file store.
#[derive(Clone)]
pub struct StoreMetrics {
    snapshots_saved: IntCounter,
    snapshots_failed: IntCounter,
    journal_bytes: IntCounter,
    mutations: IntCounterVec,
    active_conflicts: IntCounter,
    open_duration: Histogram,
    #[allow(dead_code)]
    registry: Arc<Registry>,
}

impl StoreMetrics {
    /// Register all store metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> prometheus::Result<Self> {
        let snapshots_saved = IntCounter::new(
            "pps_store_snapshots_saved_total",
            "Total number of store snapshots successfully persisted",
        )?;
        registry.register(Box::new(snapshots_saved.clone()))?;

        let snapshots_failed = IntCounter::new(
            "pps_store_snapshots_failed_total",
            "Total number of store snapshot writes that failed",
        )?;
        registry.register(Box::new(snapshots_failed.clone()))?;

        let journal_bytes = IntCounter::new(
            "pps_store_journal_bytes_total",
            "Total bytes appended to the mutation journal",
        )?;
        registry.register(Box::new(journal_bytes.clone()))?;

        let mutations = IntCounterVec::new(
            Opts::new("pps_store_mutations_total", "Store mutations by operation"),
            &["op"],
        )?;
        registry.register(Box::new(mutations.clone()))?;

        let active_conflicts = IntCounter::new(
            "pps_store_active_conflicts_total",
            "Inserts rejected because the pair already had an active entitlement",
        )?;
        registry.register(Box::new(active_conflicts.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "pps_store_open_duration_seconds",
            "Time spent loading the store from disk",
        )
        .buckets(prometheus::exponential_buckets(0.001, 2.0, 12)?);
        let open_duration = Histogram::with_opts(histogram_opts)?;
        registry.register(Box::new(open_duration.clone()))?;

        Ok(Self {
            snapshots_saved,
            snapshots_failed,
            journal_bytes,
            mutations,
            active_conflicts,
            open_duration,
            registry,
        })
    }

    /// Record a snapshot write.
    pub fn record_snapshot(&self, ok: bool) {
        if ok {
            self.snapshots_saved.inc();
        } else {
            self.snapshots_failed.inc();
        }
    }

    /// Record a journal append.
    pub fn record_mutation(&self, op: &str, bytes: usize) {
        self.mutations.with_label_values(&[op]).inc();
        self.journal_bytes.inc_by(bytes as u64);
    }

    /// Record a rejected duplicate active insert.
    pub fn record_conflict(&self) {
        self.active_conflicts.inc();
    }

    /// Observe how long opening the store took.
    pub fn observe_open(&self, seconds: f64) {
        self.open_duration.observe(seconds);
    }

    /// Successful snapshot writes so far.
    pub fn snapshots_saved(&self) -> u64 {
        self.snapshots_saved.get()
    }

    /// Rejected duplicate inserts so far.
    pub fn conflicts(&self) -> u64 {
        self.active_conflicts.get()
    }
}
