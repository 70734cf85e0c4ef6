//! ---
//! pps_section: "02-entitlements"
//! pps_subsection: "module"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Entitlement service: pipeline entry point and lifecycle operations."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use pps_logging::{log_system_event, pps_error, pps_info, pps_warn, LogContext, SystemEventOutcome};
use serde::{Deserialize, Serialize};

use crate::catalog::ProductCatalog;
use crate::metrics::ReconcileMetrics;
use crate::model::{
    Entitlement, EntitlementSource, ProductId, Purchase, PurchaseId, PurchaseStatus, SourceKind,
    UserId,
};
use crate::normalizer::PurchaseNormalizer;
use crate::outcome::{
    AuditReport, BatchFailure, BatchReport, CandidateOutcome, CandidateStatus, Disposition,
    DuplicateActive, PurchaseReport, UnrecognizedPurchase,
};
use crate::query::QueryFacade;
use crate::reconciler::{PlannedAction, ReconcilePlan, Reconciler};
use crate::store::{EntitlementFilter, EntitlementStore, PurchaseFilter};
use crate::writer::{EntitlementWriter, WriteOutcome};
use crate::{ReconcileError, Result};

/// Which stored purchases a repair run visits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepairScope {
    /// Completed purchases not yet marked processed.
    #[default]
    Unprocessed,
    /// Every completed purchase.
    AllCompleted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairFilter {
    pub scope: RepairScope,
    pub user: Option<UserId>,
    pub limit: Option<usize>,
}

impl RepairFilter {
    /// Store query selecting the purchases this repair visits.
    pub fn purchase_filter(&self) -> PurchaseFilter {
        let mut filter = PurchaseFilter::all()
            .with_status(PurchaseStatus::Completed)
            .owned()
            .with_limit(self.limit);
        if self.scope == RepairScope::Unprocessed {
            filter = filter.unprocessed();
        }
        if let Some(user) = &self.user {
            filter = filter.with_user(user.clone());
        }
        filter
    }
}

/// The one reconciliation pipeline, shared by checkout completion and repair
/// tooling, plus manual lifecycle operations on entitlements.
#[derive(Clone)]
pub struct EntitlementService {
    store: Arc<dyn EntitlementStore>,
    catalog: Arc<ProductCatalog>,
    query: QueryFacade,
    reconciler: Reconciler,
    writer: EntitlementWriter,
    metrics: Option<ReconcileMetrics>,
}

impl EntitlementService {
    /// Service over the built-in catalog.
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self::with_catalog(store, Arc::new(ProductCatalog::builtin().clone()))
    }

    pub fn with_catalog(store: Arc<dyn EntitlementStore>, catalog: Arc<ProductCatalog>) -> Self {
        let query = QueryFacade::new(Arc::clone(&store), Arc::clone(&catalog));
        Self {
            reconciler: Reconciler::new(Arc::clone(&catalog), query.clone()),
            writer: EntitlementWriter::new(Arc::clone(&store)),
            store,
            catalog,
            query,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: ReconcileMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn query(&self) -> &QueryFacade {
        &self.query
    }

    pub fn catalog(&self) -> &ProductCatalog {
        &self.catalog
    }

    /// Dry run: what processing the purchase would do right now.
    pub fn plan_purchase(&self, purchase: &Purchase) -> Result<ReconcilePlan> {
        self.reconciler.reconcile(purchase)
    }

    /// Run the full pipeline for one purchase.
    ///
    /// Safe to repeat: products already held are reported as skipped. The
    /// purchase is marked processed only when no grant failed.
    pub fn process_purchase(&self, purchase: &Purchase) -> Result<PurchaseReport> {
        let plan = match self.reconciler.reconcile(purchase) {
            Ok(plan) => plan,
            Err(error) => {
                if matches!(error, ReconcileError::LookupFailure { .. }) {
                    self.with_metrics_do(|metrics| metrics.record_lookup_failure());
                }
                return Err(error);
            }
        };

        let mut report = PurchaseReport {
            purchase: plan.purchase.clone(),
            user: plan.user.clone(),
            disposition: plan.disposition,
            outcomes: Vec::with_capacity(plan.steps.len()),
            marked_processed: false,
        };
        self.with_metrics_do(|metrics| metrics.record_purchase(plan.disposition));
        if plan.disposition != Disposition::Reconciled {
            return Ok(report);
        }

        let now = Utc::now();
        let mut grants = plan.grants().into_iter();
        for step in &plan.steps {
            let outcome = match step.action {
                PlannedAction::SkipDuplicate => {
                    CandidateOutcome::new(step.product.clone(), CandidateStatus::SkippedDuplicate)
                }
                PlannedAction::SkipUnrecognized => {
                    pps_warn!(
                        context = LogContext::new()
                            .with_purchase(purchase.id.as_str())
                            .with_product(step.product.as_str()),
                        "skipping unrecognized product"
                    );
                    CandidateOutcome::new(step.product.clone(), CandidateStatus::SkippedUnrecognized)
                }
                PlannedAction::Grant => match grants.next() {
                    Some(instruction) => match self.writer.apply(&instruction, now) {
                        Ok(WriteOutcome::Granted(row)) => {
                            CandidateOutcome::granted(step.product.clone(), row.id)
                        }
                        Ok(WriteOutcome::AlreadyGranted(_)) => CandidateOutcome::new(
                            step.product.clone(),
                            CandidateStatus::SkippedDuplicate,
                        ),
                        Err(error) => {
                            pps_error!(
                                context = LogContext::new()
                                    .with_purchase(purchase.id.as_str())
                                    .with_product(step.product.as_str()),
                                "entitlement write failed: {error}"
                            );
                            CandidateOutcome::failed(step.product.clone(), error)
                        }
                    },
                    None => CandidateOutcome::failed(step.product.clone(), "grant instruction missing"),
                },
            };
            self.with_metrics_do(|metrics| metrics.record_candidate(outcome.status, SourceKind::Purchase));
            report.outcomes.push(outcome);
        }

        if !report.has_failures() {
            report.marked_processed = self.writer.mark_entitlements_created(&purchase.id)?;
        }
        pps_info!(
            context = LogContext::new()
                .with_purchase(purchase.id.as_str())
                .with_user(report.user.as_ref().map_or("", UserId::as_str)),
            "purchase reconciled: {} granted, {} already held",
            report.count(CandidateStatus::Granted),
            report.count(CandidateStatus::SkippedDuplicate)
        );
        Ok(report)
    }

    /// Load a stored purchase and process it.
    pub fn process_purchase_id(&self, id: &PurchaseId) -> Result<PurchaseReport> {
        let purchase = self
            .store
            .purchase(id)?
            .ok_or_else(|| ReconcileError::UnknownPurchase(id.clone()))?;
        self.process_purchase(&purchase)
    }

    /// Backfill missing entitlements across stored purchases.
    ///
    /// A purchase whose lookup fails is recorded and the batch moves on.
    pub fn repair(&self, filter: &RepairFilter) -> Result<BatchReport> {
        let purchases = self.store.purchases(&filter.purchase_filter())?;
        let mut batch = BatchReport::default();
        for purchase in &purchases {
            match self.process_purchase(purchase) {
                Ok(report) => batch.reports.push(report),
                Err(error) => {
                    pps_warn!(
                        context = LogContext::new().with_purchase(purchase.id.as_str()),
                        "repair skipped purchase: {error}"
                    );
                    batch.failures.push(BatchFailure {
                        purchase: purchase.id.clone(),
                        retryable: error.is_retryable(),
                        error: error.to_string(),
                    });
                }
            }
        }

        let totals = batch.totals();
        let message = format!(
            "repair visited {} purchases: {} granted, {} already held, {} errors",
            totals.purchases, totals.granted, totals.skipped_duplicate, totals.errors
        );
        let outcome = if batch.is_clean() {
            SystemEventOutcome::Success
        } else {
            SystemEventOutcome::Attention
        };
        log_system_event(None, "repair.batch", &message, outcome);
        Ok(batch)
    }

    /// Payment confirmed for a checkout reference.
    ///
    /// Pending purchases carrying the reference become completed; every
    /// matching purchase is then reconciled.
    pub fn complete_payment(&self, payment_reference: &str) -> Result<Vec<PurchaseReport>> {
        let matching = self
            .store
            .purchases(&PurchaseFilter::by_payment_reference(payment_reference))?;
        if matching.is_empty() {
            return Err(ReconcileError::UnknownPaymentReference(
                payment_reference.to_owned(),
            ));
        }

        let mut reports = Vec::with_capacity(matching.len());
        for mut purchase in matching {
            if purchase.status == PurchaseStatus::Pending {
                purchase.status = PurchaseStatus::Completed;
                purchase.updated_at = Utc::now();
                self.store.save_purchase(purchase.clone())?;
                pps_info!(
                    context = LogContext::new().with_purchase(purchase.id.as_str()),
                    "purchase completed by payment confirmation"
                );
            }
            reports.push(self.process_purchase(&purchase)?);
        }
        Ok(reports)
    }

    /// Grant a catalog product outside any purchase.
    pub fn grant_manual(
        &self,
        user: &UserId,
        product: &str,
        note: Option<String>,
    ) -> Result<CandidateOutcome> {
        let product_id = self.recognized(product)?;
        let reference = format!("manual-{}", Utc::now().format("%Y%m%dT%H%M%S%.3fZ"));
        let mut row = Entitlement::grant(
            user.clone(),
            product_id.clone(),
            EntitlementSource::manual(reference),
            Utc::now(),
        );
        row.note = note;
        let outcome = match self.writer.insert_unique(row)? {
            WriteOutcome::Granted(row) => CandidateOutcome::granted(product_id, row.id),
            WriteOutcome::AlreadyGranted(_) => {
                CandidateOutcome::new(product_id, CandidateStatus::SkippedDuplicate)
            }
        };
        self.with_metrics_do(|metrics| metrics.record_candidate(outcome.status, SourceKind::Manual));
        Ok(outcome)
    }

    /// Deactivate every active row of the pair. Empty when nothing was active.
    pub fn revoke(&self, user: &UserId, product: &str, reason: &str) -> Result<Vec<Entitlement>> {
        let product_id = self
            .catalog
            .product(product)
            .map(|entry| entry.id.clone())
            .unwrap_or_else(|| ProductId::from(product.trim()));
        let active = self
            .store
            .entitlements(&EntitlementFilter::for_pair(user, &product_id).active())?;
        self.deactivate_all(active, reason)
    }

    /// Revoke every active entitlement of the user except the main product.
    pub fn clear_add_ons(&self, user: &UserId) -> Result<Vec<Entitlement>> {
        let main = &self.catalog.main_product().id;
        let add_ons = self
            .store
            .entitlements(&EntitlementFilter::for_user(user).active())?
            .into_iter()
            .filter(|row| &row.product_id != main)
            .collect();
        self.deactivate_all(add_ons, "add-ons cleared")
    }

    fn deactivate_all(&self, rows: Vec<Entitlement>, reason: &str) -> Result<Vec<Entitlement>> {
        let now = Utc::now();
        let mut revoked = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(updated) = self.store.deactivate_entitlement(row.id, now)? {
                let source = updated.source.to_string();
                pps_info!(
                    context = LogContext::new()
                        .with_user(updated.user_id.as_str())
                        .with_product(updated.product_id.as_str())
                        .with_source(&source),
                    "entitlement revoked: {reason}"
                );
                revoked.push(updated);
            }
        }
        self.with_metrics_do(|metrics| metrics.record_revocations(revoked.len()));
        Ok(revoked)
    }

    /// Integrity findings for one user, or for the whole store.
    pub fn audit(&self, user: Option<&UserId>) -> Result<AuditReport> {
        let filter = match user {
            Some(user) => EntitlementFilter::for_user(user).active(),
            None => EntitlementFilter::all().active(),
        };
        let active = self.store.entitlements(&filter)?;
        let mut report = AuditReport::default();

        let mut pairs: BTreeMap<(UserId, ProductId), Vec<&Entitlement>> = BTreeMap::new();
        for row in &active {
            pairs
                .entry((row.user_id.clone(), row.product_id.clone()))
                .or_default()
                .push(row);
            if !self.catalog.is_recognized(row.product_id.as_str()) {
                report.unknown_products.push(row.clone());
            }
            if row.source.kind == SourceKind::Purchase
                && self
                    .store
                    .purchase(&PurchaseId::from(row.source.id.as_str()))?
                    .is_none()
            {
                report.orphaned.push(row.clone());
            }
        }
        report.duplicate_active = pairs
            .into_iter()
            .filter(|(_, rows)| rows.len() > 1)
            .map(|((user, product), rows)| DuplicateActive {
                user,
                product,
                entitlements: rows.iter().map(|row| row.id).collect(),
            })
            .collect();

        let mut completed = PurchaseFilter::all().with_status(PurchaseStatus::Completed);
        if let Some(user) = user {
            completed = completed.with_user(user.clone());
        }
        let normalizer = PurchaseNormalizer::new(&self.catalog);
        for purchase in self.store.purchases(&completed)? {
            if purchase.owner().is_none() {
                report.ownerless_purchases.push(purchase.id.clone());
            } else if !purchase.entitlements_created {
                report.unprocessed_purchases.push(purchase.id.clone());
            }
            let unknown: Vec<ProductId> = normalizer
                .normalize(&purchase)
                .unrecognized()
                .cloned()
                .collect();
            if !unknown.is_empty() {
                report.unrecognized_purchases.push(UnrecognizedPurchase {
                    purchase: purchase.id,
                    products: unknown,
                });
            }
        }
        Ok(report)
    }

    fn recognized(&self, product: &str) -> Result<ProductId> {
        self.catalog
            .product(product)
            .map(|entry| entry.id.clone())
            .ok_or_else(|| ReconcileError::UnrecognizedProduct(product.trim().to_owned()))
    }

    fn with_metrics_do(&self, f: impl FnOnce(&ReconcileMetrics)) {
        if let Some(metrics) = &self.metrics {
            f(metrics);
        }
    }
}
