//! ---
//! pps_section: "02-entitlements"
//! pps_subsection: "module"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Storage contract for purchases and entitlements."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};

use crate::model::{
    Entitlement, EntitlementId, ProductId, Purchase, PurchaseId, PurchaseStatus, UserId,
};

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures reported by an [`EntitlementStore`].
///
/// A missing row is never an error; lookups return `Ok(None)` or an empty list.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing service could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// An active row already exists for the pair.
    #[error("active entitlement already exists for user {user} and product {product}")]
    ActiveConflict { user: UserId, product: ProductId },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// A persisted snapshot failed integrity verification.
    #[error("snapshot hash mismatch")]
    HashMismatch,
    #[error("corrupt store state: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Transient failures are worth retrying; everything else needs an operator.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}

/// Selection of entitlement rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitlementFilter {
    pub user: Option<UserId>,
    pub product: Option<ProductId>,
    pub active_only: bool,
}

impl EntitlementFilter {
    /// Every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Rows of one user.
    pub fn for_user(user: &UserId) -> Self {
        Self {
            user: Some(user.clone()),
            ..Self::default()
        }
    }

    /// Rows of one (user, product) pair.
    pub fn for_pair(user: &UserId, product: &ProductId) -> Self {
        Self {
            user: Some(user.clone()),
            product: Some(product.clone()),
            active_only: false,
        }
    }

    /// Restrict to active rows.
    #[must_use]
    pub fn active(mut self) -> Self {
        self.active_only = true;
        self
    }

    pub fn matches(&self, row: &Entitlement) -> bool {
        (!self.active_only || row.is_active)
            && self.user.as_ref().map_or(true, |user| &row.user_id == user)
            && self
                .product
                .as_ref()
                .map_or(true, |product| &row.product_id == product)
    }
}

/// Selection of purchase rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurchaseFilter {
    pub user: Option<UserId>,
    pub status: Option<PurchaseStatus>,
    /// Only purchases whose entitlements have not been created yet.
    pub unprocessed_only: bool,
    /// Only purchases with a non-blank owner.
    pub owned_only: bool,
    pub payment_reference: Option<String>,
    pub limit: Option<usize>,
}

impl PurchaseFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Purchases recorded under a checkout or payment reference.
    pub fn by_payment_reference(reference: impl Into<String>) -> Self {
        Self {
            payment_reference: Some(reference.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: PurchaseStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_user(mut self, user: UserId) -> Self {
        self.user = Some(user);
        self
    }

    #[must_use]
    pub fn unprocessed(mut self) -> Self {
        self.unprocessed_only = true;
        self
    }

    #[must_use]
    pub fn owned(mut self) -> Self {
        self.owned_only = true;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Row-level predicate; `limit` is applied by the store.
    pub fn matches(&self, purchase: &Purchase) -> bool {
        self.status.map_or(true, |status| purchase.status == status)
            && (!self.unprocessed_only || !purchase.entitlements_created)
            && (!self.owned_only || purchase.owner().is_some())
            && self
                .user
                .as_ref()
                .map_or(true, |user| purchase.owner() == Some(user))
            && self.payment_reference.as_deref().map_or(true, |reference| {
                purchase.payment_reference.as_deref() == Some(reference)
            })
    }
}

/// Persistence contract for the reconciliation pipeline.
///
/// Implementations must make their writes visible to subsequent reads on the
/// same handle.
pub trait EntitlementStore: Send + Sync {
    /// Rows matching the filter.
    fn entitlements(&self, filter: &EntitlementFilter) -> StoreResult<Vec<Entitlement>>;

    /// Insert a row.
    ///
    /// Stores that report [`enforces_active_uniqueness`](Self::enforces_active_uniqueness)
    /// must reject an active row for a pair that already has one with
    /// [`StoreError::ActiveConflict`], atomically with the insert.
    fn insert_entitlement(&self, row: Entitlement) -> StoreResult<Entitlement>;

    /// Deactivate a row and stamp `valid_until`. Returns `None` for unknown ids.
    fn deactivate_entitlement(
        &self,
        id: EntitlementId,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Entitlement>>;

    fn purchase(&self, id: &PurchaseId) -> StoreResult<Option<Purchase>>;

    /// Purchases matching the filter, oldest first.
    fn purchases(&self, filter: &PurchaseFilter) -> StoreResult<Vec<Purchase>>;

    /// Insert or replace a purchase row.
    fn save_purchase(&self, purchase: Purchase) -> StoreResult<()>;

    /// Set `entitlements_created`. Returns `false` when the purchase is unknown.
    fn mark_entitlements_created(&self, id: &PurchaseId) -> StoreResult<bool>;

    /// Whether [`insert_entitlement`](Self::insert_entitlement) enforces the
    /// one-active-row-per-pair constraint itself.
    fn enforces_active_uniqueness(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntitlementSource;

    #[test]
    fn entitlement_filter_matches_pair_and_activity() {
        let user = UserId::from("u");
        let product = ProductId::from("p");
        let mut row = Entitlement::grant(
            user.clone(),
            product.clone(),
            EntitlementSource::manual("ops"),
            Utc::now(),
        );
        let filter = EntitlementFilter::for_pair(&user, &product).active();
        assert!(filter.matches(&row));
        assert!(!EntitlementFilter::for_user(&UserId::from("other")).matches(&row));
        row.revoke(Utc::now());
        assert!(!filter.matches(&row));
        assert!(EntitlementFilter::for_pair(&user, &product).matches(&row));
    }

    #[test]
    fn purchase_filter_combines_predicates() {
        let mut purchase = Purchase::new("p", Some(UserId::from("u")), PurchaseStatus::Completed)
            .with_payment_reference("cs_test_1");
        let filter = PurchaseFilter::all()
            .with_status(PurchaseStatus::Completed)
            .unprocessed();
        assert!(filter.matches(&purchase));
        assert!(PurchaseFilter::by_payment_reference("cs_test_1").matches(&purchase));
        assert!(!PurchaseFilter::by_payment_reference("cs_test_2").matches(&purchase));
        purchase.entitlements_created = true;
        assert!(!filter.matches(&purchase));
    }

    #[test]
    fn owned_filter_skips_blank_owners() {
        let owned = PurchaseFilter::all().owned();
        let mut purchase = Purchase::new("p", Some(UserId::from("  ")), PurchaseStatus::Completed);
        assert!(!owned.matches(&purchase));
        assert!(!PurchaseFilter::all().with_user(UserId::from("  ")).matches(&purchase));
        purchase.user_id = None;
        assert!(!owned.matches(&purchase));
        purchase.user_id = Some(UserId::from("u"));
        assert!(owned.matches(&purchase));
    }

    #[test]
    fn only_connectivity_errors_are_transient() {
        assert!(StoreError::Unavailable("timeout".into()).is_transient());
        assert!(!StoreError::HashMismatch.is_transient());
        assert!(!StoreError::ActiveConflict {
            user: UserId::from("u"),
            product: ProductId::from("p"),
        }
        .is_transient());
    }
}
