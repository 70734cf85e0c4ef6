//! ---
//! pps_section: "02-entitlements"
//! pps_subsection: "module"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Prometheus counters for reconciliation runs."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

use crate::model::SourceKind;
use crate::outcome::{CandidateStatus, Disposition};

/// Metrics published by the reconciliation pipeline.
#[derive(Clone)]
pub struct ReconcileMetrics {
    grants_created: IntCounterVec,
    candidates_skipped: IntCounterVec,
    candidate_failures: IntCounter,
    purchases_processed: IntCounterVec,
    lookup_failures: IntCounter,
    revocations: IntCounter,
    #[allow(dead_code)]
    registry: Arc<Registry>,
}

impl ReconcileMetrics {
    /// Register all reconciliation metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> prometheus::Result<Self> {
        let grants_created = IntCounterVec::new(
            Opts::new(
                "pps_entitlements_granted_total",
                "Entitlement rows created, by source type",
            ),
            &["source"],
        )?;
        registry.register(Box::new(grants_created.clone()))?;

        let candidates_skipped = IntCounterVec::new(
            Opts::new(
                "pps_candidates_skipped_total",
                "Candidate products skipped during reconciliation, by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(candidates_skipped.clone()))?;

        let candidate_failures = IntCounter::new(
            "pps_candidate_failures_total",
            "Candidate grants that failed to write",
        )?;
        registry.register(Box::new(candidate_failures.clone()))?;

        let purchases_processed = IntCounterVec::new(
            Opts::new(
                "pps_purchases_processed_total",
                "Purchases run through the pipeline, by disposition",
            ),
            &["disposition"],
        )?;
        registry.register(Box::new(purchases_processed.clone()))?;

        let lookup_failures = IntCounter::new(
            "pps_lookup_failures_total",
            "Reconciliations aborted because current entitlements could not be read",
        )?;
        registry.register(Box::new(lookup_failures.clone()))?;

        let revocations = IntCounter::new(
            "pps_entitlements_revoked_total",
            "Entitlement rows deactivated",
        )?;
        registry.register(Box::new(revocations.clone()))?;

        Ok(Self {
            grants_created,
            candidates_skipped,
            candidate_failures,
            purchases_processed,
            lookup_failures,
            revocations,
            registry,
        })
    }

    pub fn record_candidate(&self, status: CandidateStatus, source: SourceKind) {
        match status {
            CandidateStatus::Granted => self
                .grants_created
                .with_label_values(&[source.as_str()])
                .inc(),
            CandidateStatus::SkippedDuplicate | CandidateStatus::SkippedUnrecognized => self
                .candidates_skipped
                .with_label_values(&[status.as_str()])
                .inc(),
            CandidateStatus::Failed => self.candidate_failures.inc(),
        }
    }

    pub fn record_purchase(&self, disposition: Disposition) {
        self.purchases_processed
            .with_label_values(&[disposition.as_str()])
            .inc();
    }

    pub fn record_lookup_failure(&self) {
        self.lookup_failures.inc();
    }

    pub fn record_revocations(&self, count: usize) {
        self.revocations.inc_by(count as u64);
    }

    /// Current value of the grant counter for a source.
    pub fn grants(&self, source: SourceKind) -> u64 {
        self.grants_created.with_label_values(&[source.as_str()]).get()
    }

    pub fn skipped(&self, status: CandidateStatus) -> u64 {
        self.candidates_skipped
            .with_label_values(&[status.as_str()])
            .get()
    }
}
