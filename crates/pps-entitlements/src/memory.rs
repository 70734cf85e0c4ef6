//! ---
//! pps_section: "02-entitlements"
//! pps_subsection: "module"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "In-memory store state shared by the store backends."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::model::{Entitlement, EntitlementId, Purchase, PurchaseId};
use crate::store::{EntitlementFilter, EntitlementStore, PurchaseFilter, StoreError, StoreResult};

/// Plain purchase and entitlement tables.
///
/// Backends wrap this in their own lock; every method assumes exclusive access.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub purchases: BTreeMap<PurchaseId, Purchase>,
    /// Insertion order.
    #[serde(default)]
    pub entitlements: Vec<Entitlement>,
}

impl StoreState {
    pub fn entitlements(&self, filter: &EntitlementFilter) -> Vec<Entitlement> {
        self.entitlements
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect()
    }

    /// Insert a row, rejecting a second active row for a pair when `enforce` is set.
    pub fn insert_entitlement(&mut self, row: Entitlement, enforce: bool) -> StoreResult<Entitlement> {
        if enforce
            && row.is_active
            && self
                .entitlements
                .iter()
                .any(|existing| existing.is_active_for(&row.user_id, &row.product_id))
        {
            return Err(StoreError::ActiveConflict {
                user: row.user_id,
                product: row.product_id,
            });
        }
        if self.entitlements.iter().any(|existing| existing.id == row.id) {
            return Err(StoreError::Corrupt(format!("duplicate entitlement id {}", row.id)));
        }
        self.entitlements.push(row.clone());
        Ok(row)
    }

    pub fn deactivate_entitlement(
        &mut self,
        id: EntitlementId,
        at: DateTime<Utc>,
    ) -> Option<Entitlement> {
        let row = self.entitlements.iter_mut().find(|row| row.id == id)?;
        if row.is_active {
            row.revoke(at);
        }
        Some(row.clone())
    }

    pub fn purchases(&self, filter: &PurchaseFilter) -> Vec<Purchase> {
        let mut rows: Vec<Purchase> = self
            .purchases
            .values()
            .filter(|purchase| filter.matches(purchase))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        rows
    }

    pub fn save_purchase(&mut self, purchase: Purchase) {
        self.purchases.insert(purchase.id.clone(), purchase);
    }

    pub fn mark_entitlements_created(&mut self, id: &PurchaseId, at: DateTime<Utc>) -> bool {
        match self.purchases.get_mut(id) {
            Some(purchase) => {
                purchase.entitlements_created = true;
                purchase.updated_at = at;
                true
            }
            None => false,
        }
    }
}

/// Process-local store, used by tests and dry runs.
///
/// With uniqueness enforcement switched off it behaves like a backend without
/// a partial unique index, leaving pair serialization to the writer.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    enforce_active_uniqueness: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_state(StoreState::default(), true)
    }

    /// Store without the atomic one-active-row constraint.
    pub fn without_uniqueness() -> Self {
        Self::with_state(StoreState::default(), false)
    }

    pub fn with_state(state: StoreState, enforce_active_uniqueness: bool) -> Self {
        Self {
            state: Mutex::new(state),
            enforce_active_uniqueness,
        }
    }

    /// Copy of the current tables.
    pub fn snapshot(&self) -> StoreState {
        self.state.lock().clone()
    }
}

impl EntitlementStore for MemoryStore {
    fn entitlements(&self, filter: &EntitlementFilter) -> StoreResult<Vec<Entitlement>> {
        Ok(self.state.lock().entitlements(filter))
    }

    fn insert_entitlement(&self, row: Entitlement) -> StoreResult<Entitlement> {
        self.state
            .lock()
            .insert_entitlement(row, self.enforce_active_uniqueness)
    }

    fn deactivate_entitlement(
        &self,
        id: EntitlementId,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Entitlement>> {
        Ok(self.state.lock().deactivate_entitlement(id, at))
    }

    fn purchase(&self, id: &PurchaseId) -> StoreResult<Option<Purchase>> {
        Ok(self.state.lock().purchases.get(id).cloned())
    }

    fn purchases(&self, filter: &PurchaseFilter) -> StoreResult<Vec<Purchase>> {
        Ok(self.state.lock().purchases(filter))
    }

    fn save_purchase(&self, purchase: Purchase) -> StoreResult<()> {
        self.state.lock().save_purchase(purchase);
        Ok(())
    }

    fn mark_entitlements_created(&self, id: &PurchaseId) -> StoreResult<bool> {
        Ok(self.state.lock().mark_entitlements_created(id, Utc::now()))
    }

    fn enforces_active_uniqueness(&self) -> bool {
        self.enforce_active_uniqueness
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntitlementSource, ProductId, PurchaseStatus, UserId};

    fn row() -> Entitlement {
        Entitlement::grant(
            UserId::from("u"),
            ProductId::from("p"),
            EntitlementSource::manual("ops"),
            Utc::now(),
        )
    }

    #[test]
    fn enforcing_store_rejects_second_active_row() {
        let store = MemoryStore::new();
        store.insert_entitlement(row()).unwrap();
        let err = store.insert_entitlement(row()).unwrap_err();
        assert!(matches!(err, StoreError::ActiveConflict { .. }));
        assert_eq!(store.entitlements(&EntitlementFilter::all()).unwrap().len(), 1);
    }

    #[test]
    fn relaxed_store_accepts_duplicates() {
        let store = MemoryStore::without_uniqueness();
        store.insert_entitlement(row()).unwrap();
        store.insert_entitlement(row()).unwrap();
        assert!(!store.enforces_active_uniqueness());
        assert_eq!(store.entitlements(&EntitlementFilter::all().active()).unwrap().len(), 2);
    }

    #[test]
    fn revoked_pair_accepts_a_fresh_row() {
        let store = MemoryStore::new();
        let first = store.insert_entitlement(row()).unwrap();
        let revoked = store
            .deactivate_entitlement(first.id, Utc::now())
            .unwrap()
            .unwrap();
        assert!(!revoked.is_active);
        assert!(revoked.valid_until.is_some());
        store.insert_entitlement(row()).unwrap();
        assert_eq!(store.entitlements(&EntitlementFilter::all()).unwrap().len(), 2);
    }

    #[test]
    fn purchases_are_listed_oldest_first_with_limit() {
        let store = MemoryStore::new();
        for (id, minutes) in [("b", 2), ("a", 1), ("c", 3)] {
            let mut purchase = Purchase::new(id, None, PurchaseStatus::Completed);
            purchase.created_at = Utc::now() - chrono::Duration::minutes(10 - minutes);
            store.save_purchase(purchase).unwrap();
        }
        let listed = store
            .purchases(&PurchaseFilter::all().with_limit(Some(2)))
            .unwrap();
        let ids: Vec<_> = listed.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(store.mark_entitlements_created(&PurchaseId::from("a")).unwrap());
        assert!(!store.mark_entitlements_created(&PurchaseId::from("zzz")).unwrap());
    }
}
