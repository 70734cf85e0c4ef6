//! ---
//! pps_section: "02-entitlements"
//! pps_subsection: "module"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Structured reconciliation outcomes and reports."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use std::fmt;

use serde::Serialize;

use crate::model::{Entitlement, EntitlementId, ProductId, PurchaseId, UserId};

/// Per-candidate result of running the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Granted,
    SkippedDuplicate,
    SkippedUnrecognized,
    Failed,
}

impl CandidateStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CandidateStatus::Granted => "granted",
            CandidateStatus::SkippedDuplicate => "skipped_duplicate",
            CandidateStatus::SkippedUnrecognized => "skipped_unrecognized",
            CandidateStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateOutcome {
    pub product: ProductId,
    pub status: CandidateStatus,
    /// Row created by this run, when granted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entitlement: Option<EntitlementId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CandidateOutcome {
    pub fn new(product: ProductId, status: CandidateStatus) -> Self {
        Self {
            product,
            status,
            entitlement: None,
            error: None,
        }
    }

    pub fn granted(product: ProductId, entitlement: EntitlementId) -> Self {
        Self {
            entitlement: Some(entitlement),
            ..Self::new(product, CandidateStatus::Granted)
        }
    }

    pub fn failed(product: ProductId, error: impl fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(product, CandidateStatus::Failed)
        }
    }
}

/// How a purchase as a whole was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Candidates were evaluated against current entitlements.
    Reconciled,
    /// Status is not `completed`; nothing granted.
    NotCompleted,
    /// Completed purchase without an owner.
    MissingUser,
}

impl Disposition {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Reconciled => "reconciled",
            Disposition::NotCompleted => "not_completed",
            Disposition::MissingUser => "missing_user",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of processing one purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseReport {
    pub purchase: PurchaseId,
    pub user: Option<UserId>,
    pub disposition: Disposition,
    pub outcomes: Vec<CandidateOutcome>,
    /// Whether `entitlements_created` was set by this run.
    pub marked_processed: bool,
}

impl PurchaseReport {
    pub fn count(&self, status: CandidateStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == status)
            .count()
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.count(CandidateStatus::Failed) > 0
    }

    /// Products granted by this run.
    pub fn granted(&self) -> impl Iterator<Item = &ProductId> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == CandidateStatus::Granted)
            .map(|outcome| &outcome.product)
    }
}

/// A purchase a batch could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub purchase: PurchaseId,
    pub error: String,
    pub retryable: bool,
}

/// Candidate counts summed over a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchTotals {
    pub purchases: usize,
    pub granted: usize,
    pub skipped_duplicate: usize,
    pub skipped_unrecognized: usize,
    pub failed: usize,
    pub errors: usize,
}

/// Result of a repair run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub reports: Vec<PurchaseReport>,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn totals(&self) -> BatchTotals {
        let mut totals = BatchTotals {
            purchases: self.reports.len() + self.failures.len(),
            errors: self.failures.len(),
            ..BatchTotals::default()
        };
        for report in &self.reports {
            totals.granted += report.count(CandidateStatus::Granted);
            totals.skipped_duplicate += report.count(CandidateStatus::SkippedDuplicate);
            totals.skipped_unrecognized += report.count(CandidateStatus::SkippedUnrecognized);
            totals.failed += report.count(CandidateStatus::Failed);
        }
        totals
    }

    /// True when every purchase was processed without failures.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.reports.iter().all(|report| !report.has_failures())
    }
}

/// More than one active row for the same pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateActive {
    pub user: UserId,
    pub product: ProductId,
    pub entitlements: Vec<EntitlementId>,
}

/// Completed purchase naming products this build does not know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnrecognizedPurchase {
    pub purchase: PurchaseId,
    pub products: Vec<ProductId>,
}

/// Integrity findings. Reporting only; nothing is changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditReport {
    /// Active rows whose product is not in the catalog.
    pub unknown_products: Vec<Entitlement>,
    /// Active purchase-sourced rows whose purchase no longer exists.
    pub orphaned: Vec<Entitlement>,
    pub duplicate_active: Vec<DuplicateActive>,
    /// Owned completed purchases whose entitlements were never marked created.
    pub unprocessed_purchases: Vec<PurchaseId>,
    /// Completed purchases without an owner; repair cannot act on them.
    pub ownerless_purchases: Vec<PurchaseId>,
    /// Completed purchases with candidates missing from the catalog.
    pub unrecognized_purchases: Vec<UnrecognizedPurchase>,
}

impl AuditReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.unknown_products.is_empty()
            && self.orphaned.is_empty()
            && self.duplicate_active.is_empty()
            && self.unprocessed_purchases.is_empty()
            && self.ownerless_purchases.is_empty()
            && self.unrecognized_purchases.is_empty()
    }
}
