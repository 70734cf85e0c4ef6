//! ---
//! pps_section: "02-entitlements"
//! pps_subsection: "module"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Entitlement reconciliation engine for PMU Profit System purchases."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
//! Product catalog, purchase normalization, and idempotent entitlement
//! reconciliation.
//!
//! Every caller (checkout completion, admin repair, dashboard checks) goes
//! through the same pipeline: [`PurchaseNormalizer`] turns a raw purchase into
//! candidate products, [`Reconciler`] compares them with the user's active
//! entitlements, and [`EntitlementWriter`] inserts the missing rows while
//! keeping at most one active row per (user, product).

pub mod catalog;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod normalizer;
pub mod outcome;
pub mod query;
pub mod reconciler;
pub mod service;
pub mod store;
pub mod writer;

pub use catalog::{AddOn, Product, ProductCatalog, ProductKind, Resolved};
pub use memory::{MemoryStore, StoreState};
pub use metrics::ReconcileMetrics;
pub use model::{
    Entitlement, EntitlementId, EntitlementSource, EntitlementState, ProductId, Purchase,
    PurchaseId, PurchaseStatus, SourceKind, UserId,
};
pub use normalizer::{AddOnFlags, Candidate, NormalizedPurchase, PurchaseNormalizer, PurchaseShape};
pub use outcome::{
    AuditReport, BatchFailure, BatchReport, BatchTotals, CandidateOutcome, CandidateStatus,
    Disposition, DuplicateActive, PurchaseReport, UnrecognizedPurchase,
};
pub use query::QueryFacade;
pub use reconciler::{GrantInstruction, PlannedAction, PlannedStep, ReconcilePlan, Reconciler};
pub use service::{EntitlementService, RepairFilter, RepairScope};
pub use store::{EntitlementFilter, EntitlementStore, PurchaseFilter, StoreError, StoreResult};
pub use writer::{EntitlementWriter, PairLocks, WriteOutcome};

/// Result alias for catalog construction.
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// Errors raised while building a product catalog.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("duplicate canonical product id: {0}")]
    DuplicateId(String),
    #[error("duplicate legacy product key: {0}")]
    DuplicateLegacyKey(String),
    #[error("catalog is missing required product `{0}`")]
    MissingRequired(&'static str),
}

/// Result alias used by the reconciliation pipeline.
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Error type for the reconciliation pipeline.
///
/// Write conflicts and unrecognized bundle products are not errors; they are
/// reported as per-candidate outcomes.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Reading the user's current entitlements failed; nothing was written.
    #[error("entitlement lookup failed for purchase {purchase}: {error}")]
    LookupFailure {
        purchase: PurchaseId,
        #[source]
        error: StoreError,
    },
    /// Any other store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("unknown purchase: {0}")]
    UnknownPurchase(PurchaseId),
    #[error("no purchase carries payment reference {0}")]
    UnknownPaymentReference(String),
    /// Raised by operations that only accept catalog products.
    #[error("unrecognized product: {0}")]
    UnrecognizedProduct(String),
}

impl ReconcileError {
    /// Whether re-running the same operation later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::LookupFailure { .. } => true,
            ReconcileError::Store(error) => error.is_transient(),
            _ => false,
        }
    }
}
