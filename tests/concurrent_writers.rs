//! ---
//! pps_section: "15-testing-qa-runbook"
//! pps_subsection: "integration-tests"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Concurrent delivery checks: one active entitlement per user and product."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use std::sync::{Arc, Barrier};
use std::thread;

use pps_entitlements::{
    CandidateStatus, EntitlementFilter, EntitlementService, EntitlementStore, MemoryStore,
    ProductId, Purchase, PurchaseStatus, UserId,
};
use pps_store::FileStore;
use serde_json::json;

const MAIN: &str = "4a554622-d759-42b7-b830-79c9136d2f96";
const WORKERS: usize = 8;

fn bundle(id: &str) -> Purchase {
    let mut purchase = Purchase::new(id, Some(UserId::from("user-1")), PurchaseStatus::Completed);
    purchase.include_ad_generator = Some(json!(true));
    purchase
}

/// Deliver the same purchase from several threads at once and return the
/// number of grants reported across all of them.
fn race(store: Arc<dyn EntitlementStore>) -> usize {
    let purchase = bundle("p-race");
    store.save_purchase(purchase.clone()).unwrap();
    let service = Arc::new(EntitlementService::new(Arc::clone(&store)));
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            let purchase = purchase.clone();
            thread::spawn(move || {
                barrier.wait();
                service
                    .process_purchase(&purchase)
                    .unwrap()
                    .count(CandidateStatus::Granted)
            })
        })
        .collect();
    handles.into_iter().map(|handle| handle.join().unwrap()).sum()
}

/// Same race, but every thread builds its own service over the shared store.
fn race_separate_services(store: Arc<dyn EntitlementStore>) -> usize {
    let purchase = bundle("p-race-services");
    store.save_purchase(purchase.clone()).unwrap();
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let service = EntitlementService::new(Arc::clone(&store));
            let barrier = Arc::clone(&barrier);
            let purchase = purchase.clone();
            thread::spawn(move || {
                barrier.wait();
                service
                    .process_purchase(&purchase)
                    .unwrap()
                    .count(CandidateStatus::Granted)
            })
        })
        .collect();
    handles.into_iter().map(|handle| handle.join().unwrap()).sum()
}

fn assert_single_active(store: &dyn EntitlementStore) {
    let user = UserId::from("user-1");
    let active = store
        .entitlements(&EntitlementFilter::for_user(&user).active())
        .unwrap();
    assert_eq!(active.len(), 2, "main product and ad generator only");
    let main = active
        .iter()
        .filter(|row| row.product_id == ProductId::from(MAIN))
        .count();
    assert_eq!(main, 1);
}

#[test]
fn enforcing_memory_store_grants_once() {
    let store: Arc<dyn EntitlementStore> = Arc::new(MemoryStore::new());
    assert_eq!(race(Arc::clone(&store)), 2);
    assert_single_active(store.as_ref());
}

#[test]
fn pair_locks_cover_stores_without_uniqueness() {
    let store: Arc<dyn EntitlementStore> = Arc::new(MemoryStore::without_uniqueness());
    assert_eq!(race(Arc::clone(&store)), 2);
    assert_single_active(store.as_ref());
}

#[test]
fn separate_services_on_a_store_without_uniqueness_grant_once() {
    let store: Arc<dyn EntitlementStore> = Arc::new(MemoryStore::without_uniqueness());
    assert_eq!(race_separate_services(Arc::clone(&store)), 2);
    assert_single_active(store.as_ref());
}

#[test]
fn file_store_grants_once_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store: Arc<dyn EntitlementStore> = Arc::new(FileStore::open(dir.path(), true).unwrap());
        assert_eq!(race(Arc::clone(&store)), 2);
        assert_single_active(store.as_ref());
    }
    let reopened = FileStore::open(dir.path(), true).unwrap();
    assert_single_active(&reopened);
    assert!(reopened
        .purchase(&"p-race".into())
        .unwrap()
        .unwrap()
        .entitlements_created);
}
