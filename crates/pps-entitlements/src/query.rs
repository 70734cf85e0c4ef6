//! ---
//! pps_section: "02-entitlements"
//! pps_subsection: "module"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Read-only entitlement queries."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use std::sync::Arc;

use crate::catalog::ProductCatalog;
use crate::model::{Entitlement, EntitlementState, ProductId, UserId};
use crate::store::{EntitlementFilter, EntitlementStore, StoreResult};

/// Answers access checks for the dashboard and feeds the reconciler.
#[derive(Clone)]
pub struct QueryFacade {
    store: Arc<dyn EntitlementStore>,
    catalog: Arc<ProductCatalog>,
}

impl QueryFacade {
    pub fn new(store: Arc<dyn EntitlementStore>, catalog: Arc<ProductCatalog>) -> Self {
        Self { store, catalog }
    }

    /// Canonical id for a legacy key or canonical id; unknown input is used as is.
    fn canonical(&self, product: &str) -> ProductId {
        self.catalog
            .product(product)
            .map(|entry| entry.id.clone())
            .unwrap_or_else(|| ProductId::from(product.trim()))
    }

    /// Whether the user currently holds the product.
    pub fn has_active_entitlement(&self, user: &UserId, product: &str) -> StoreResult<bool> {
        let filter = EntitlementFilter::for_pair(user, &self.canonical(product)).active();
        Ok(!self.store.entitlements(&filter)?.is_empty())
    }

    /// Active rows of the user, newest first.
    pub fn list_active_entitlements(&self, user: &UserId) -> StoreResult<Vec<Entitlement>> {
        let mut rows = self
            .store
            .entitlements(&EntitlementFilter::for_user(user).active())?;
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    pub fn entitlement_state(&self, user: &UserId, product: &str) -> StoreResult<EntitlementState> {
        let rows = self
            .store
            .entitlements(&EntitlementFilter::for_pair(user, &self.canonical(product)))?;
        Ok(EntitlementState::from_rows(&rows))
    }
}
