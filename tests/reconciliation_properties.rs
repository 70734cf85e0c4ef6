//! ---
//! pps_section: "15-testing-qa-runbook"
//! pps_subsection: "integration-tests"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Behavioural checks of the reconciliation pipeline across crates."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use std::sync::Arc;

use pps_entitlements::{
    CandidateStatus, Disposition, EntitlementFilter, EntitlementService, EntitlementState,
    EntitlementStore, MemoryStore, ProductId, Purchase, PurchaseStatus, RepairFilter, RepairScope,
    SourceKind, UserId,
};
use serde_json::json;

const MAIN: &str = "4a554622-d759-42b7-b830-79c9136d2f96";
const AD_GENERATOR: &str = "4ba5c775-a8e4-449e-828f-19f938e3710b";
const BLUEPRINT: &str = "e5749058-500d-4333-8938-c8a19b16cd65";

fn setup() -> (Arc<MemoryStore>, EntitlementService) {
    let store = Arc::new(MemoryStore::new());
    let service = EntitlementService::new(store.clone());
    (store, service)
}

fn user() -> UserId {
    UserId::from("user-1")
}

fn bundle(id: &str) -> Purchase {
    let mut purchase = Purchase::new(id, Some(user()), PurchaseStatus::Completed);
    purchase.include_ad_generator = Some(json!(true));
    purchase.include_blueprint = Some(json!("true"));
    purchase
}

fn granted_products(service: &EntitlementService, purchase: &Purchase) -> Vec<String> {
    let mut products: Vec<String> = service
        .plan_purchase(purchase)
        .unwrap()
        .grants()
        .into_iter()
        .map(|grant| grant.product.to_string())
        .collect();
    products.sort();
    products
}

fn sorted(ids: &[&str]) -> Vec<String> {
    let mut ids: Vec<String> = ids.iter().map(|id| (*id).to_owned()).collect();
    ids.sort();
    ids
}

#[test]
fn single_legacy_product_grants_its_canonical_id() {
    let (_, service) = setup();
    let purchase = Purchase::new("p-a", Some(user()), PurchaseStatus::Completed)
        .with_product("consultation-success-blueprint");
    let plan = service.plan_purchase(&purchase).unwrap();
    let grants = plan.grants();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].user, user());
    assert_eq!(grants[0].product.as_str(), BLUEPRINT);
    assert_eq!(grants[0].source.kind, SourceKind::Purchase);
    assert_eq!(grants[0].source.id, "p-a");
}

#[test]
fn bundle_with_both_flags_grants_three_products() {
    let (_, service) = setup();
    assert_eq!(
        granted_products(&service, &bundle("p-b")),
        sorted(&[MAIN, AD_GENERATOR, BLUEPRINT])
    );
}

#[test]
fn bundle_skips_products_already_held() {
    let (_, service) = setup();
    service
        .grant_manual(&user(), "pmu-ad-generator", None)
        .unwrap();
    assert_eq!(
        granted_products(&service, &bundle("p-c")),
        sorted(&[MAIN, BLUEPRINT])
    );
}

#[test]
fn pending_purchase_grants_nothing() {
    let (_, service) = setup();
    let purchase = Purchase::new("p-d", Some(user()), PurchaseStatus::Pending)
        .with_product("pricing-template");
    let plan = service.plan_purchase(&purchase).unwrap();
    assert_eq!(plan.disposition, Disposition::NotCompleted);
    assert!(plan.grants().is_empty());
}

#[test]
fn no_entitlement_exists_before_completion() {
    let (store, service) = setup();
    for (id, status) in [
        ("p-pending", PurchaseStatus::Pending),
        ("p-failed", PurchaseStatus::Failed),
        ("p-cancelled", PurchaseStatus::Cancelled),
    ] {
        let purchase = bundle(id);
        let purchase = Purchase { status, ..purchase };
        store.save_purchase(purchase.clone()).unwrap();
        let report = service.process_purchase(&purchase).unwrap();
        assert_eq!(report.disposition, Disposition::NotCompleted);
        assert!(!report.marked_processed);
    }
    assert!(store.entitlements(&EntitlementFilter::all()).unwrap().is_empty());
}

#[test]
fn processing_is_idempotent() {
    let (store, service) = setup();
    let purchase = bundle("p-idem");
    store.save_purchase(purchase.clone()).unwrap();

    let first = service.process_purchase(&purchase).unwrap();
    assert_eq!(first.count(CandidateStatus::Granted), 3);
    assert!(first.marked_processed);
    let rows_after_first = store.entitlements(&EntitlementFilter::all()).unwrap();

    let second = service.process_purchase(&purchase).unwrap();
    assert_eq!(second.count(CandidateStatus::Granted), 0);
    assert_eq!(second.count(CandidateStatus::SkippedDuplicate), 3);

    let repair = service
        .repair(&RepairFilter {
            scope: RepairScope::AllCompleted,
            ..RepairFilter::default()
        })
        .unwrap();
    assert_eq!(repair.totals().granted, 0);
    assert_eq!(
        store.entitlements(&EntitlementFilter::all()).unwrap(),
        rows_after_first
    );
}

#[test]
fn only_exact_true_values_include_add_ons() {
    let (_, service) = setup();
    for value in [json!("TRUE"), json!("yes"), json!(1), json!("false"), json!(null), json!(" true")] {
        let mut purchase = Purchase::new("p-flags", Some(user()), PurchaseStatus::Completed);
        purchase.include_blueprint = Some(value.clone());
        let purchase = purchase.with_metadata("includeAdGenerator", value.clone());
        assert_eq!(
            granted_products(&service, &purchase),
            sorted(&[MAIN]),
            "flag value {value} must not include add-ons"
        );
    }
}

#[test]
fn legacy_keys_and_canonical_ids_answer_alike() {
    let (_, service) = setup();
    service.grant_manual(&user(), BLUEPRINT, None).unwrap();
    let query = service.query();
    for identifier in ["consultation-success-blueprint", BLUEPRINT, " Consultation-Success-Blueprint "] {
        assert!(query.has_active_entitlement(&user(), identifier).unwrap());
        assert_eq!(
            query.entitlement_state(&user(), identifier).unwrap(),
            EntitlementState::Active
        );
    }
    assert!(!query.has_active_entitlement(&user(), "pmu-ad-generator").unwrap());
}

#[test]
fn manual_grant_prevents_purchase_double_grant() {
    let (store, service) = setup();
    let manual = service.grant_manual(&user(), "pmu-profit-system", Some("comp".into())).unwrap();
    assert_eq!(manual.status, CandidateStatus::Granted);

    let purchase = Purchase::new("p-main", Some(user()), PurchaseStatus::Completed)
        .with_product(MAIN);
    store.save_purchase(purchase.clone()).unwrap();
    let report = service.process_purchase(&purchase).unwrap();
    assert_eq!(report.count(CandidateStatus::SkippedDuplicate), 1);
    assert!(report.marked_processed);

    let active = store
        .entitlements(&EntitlementFilter::for_pair(&user(), &ProductId::from(MAIN)).active())
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].source.kind, SourceKind::Manual);
    assert_eq!(active[0].note.as_deref(), Some("comp"));
}

#[test]
fn revoked_pair_is_regranted_as_a_new_row() {
    let (store, service) = setup();
    service.grant_manual(&user(), "pricing-template", None).unwrap();
    let revoked = service
        .revoke(&user(), "pricing-template", "refund issued")
        .unwrap();
    assert_eq!(revoked.len(), 1);
    assert!(!revoked[0].is_active);
    assert_eq!(
        service.query().entitlement_state(&user(), "pricing-template").unwrap(),
        EntitlementState::Revoked
    );

    let purchase = Purchase::new("p-again", Some(user()), PurchaseStatus::Completed)
        .with_product("pricing-template");
    store.save_purchase(purchase.clone()).unwrap();
    let report = service.process_purchase(&purchase).unwrap();
    assert_eq!(report.count(CandidateStatus::Granted), 1);

    let pricing = service.catalog().product("pricing-template").unwrap().id.clone();
    let rows = store
        .entitlements(&EntitlementFilter::for_pair(&user(), &pricing))
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.iter().filter(|row| row.is_active).count(), 1);
    assert!(service
        .query()
        .has_active_entitlement(&user(), "pricing-template")
        .unwrap());
}

#[test]
fn unrecognized_product_is_reported_and_purchase_still_marked() {
    let (store, service) = setup();
    let purchase = Purchase::new("p-unknown", Some(user()), PurchaseStatus::Completed)
        .with_product("retired-masterclass");
    store.save_purchase(purchase.clone()).unwrap();
    let report = service.process_purchase(&purchase).unwrap();
    assert_eq!(report.count(CandidateStatus::SkippedUnrecognized), 1);
    assert_eq!(report.count(CandidateStatus::Granted), 0);
    assert!(report.marked_processed);
    assert!(store.entitlements(&EntitlementFilter::all()).unwrap().is_empty());
}
