//! ---
//! pps_section: "02-entitlements"
//! pps_subsection: "module"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Computes the grants a purchase still needs."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use std::sync::Arc;

use pps_logging::{pps_warn, LogContext};
use serde::Serialize;

use crate::catalog::ProductCatalog;
use crate::model::{Entitlement, EntitlementSource, ProductId, Purchase, PurchaseId, UserId};
use crate::normalizer::{NormalizedPurchase, PurchaseNormalizer};
use crate::outcome::Disposition;
use crate::query::QueryFacade;
use crate::{ReconcileError, Result};

/// Request to create one active entitlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantInstruction {
    pub user: UserId,
    pub product: ProductId,
    pub source: EntitlementSource,
}

/// What the reconciler decided for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedAction {
    Grant,
    /// The user already holds an active row for the product.
    SkipDuplicate,
    SkipUnrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStep {
    pub product: ProductId,
    pub action: PlannedAction,
}

/// Reconciliation result for one purchase, before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    pub purchase: PurchaseId,
    pub user: Option<UserId>,
    pub disposition: Disposition,
    pub steps: Vec<PlannedStep>,
}

impl ReconcilePlan {
    fn empty(purchase: &Purchase, disposition: Disposition) -> Self {
        Self {
            purchase: purchase.id.clone(),
            user: purchase.owner().cloned(),
            disposition,
            steps: Vec::new(),
        }
    }

    /// Grant instructions in candidate order.
    pub fn grants(&self) -> Vec<GrantInstruction> {
        let Some(user) = &self.user else {
            return Vec::new();
        };
        self.steps
            .iter()
            .filter(|step| step.action == PlannedAction::Grant)
            .map(|step| GrantInstruction {
                user: user.clone(),
                product: step.product.clone(),
                source: EntitlementSource::purchase(&self.purchase),
            })
            .collect()
    }
}

/// Decide the step for each candidate of a completed, owned purchase.
///
/// Pure: `active` must hold the user's currently active rows.
pub fn plan_steps(normalized: &NormalizedPurchase, active: &[Entitlement]) -> Vec<PlannedStep> {
    normalized
        .candidates
        .iter()
        .map(|candidate| {
            let action = if !candidate.recognized {
                PlannedAction::SkipUnrecognized
            } else if active
                .iter()
                .any(|row| row.is_active && row.product_id == candidate.product)
            {
                PlannedAction::SkipDuplicate
            } else {
                PlannedAction::Grant
            };
            PlannedStep {
                product: candidate.product.clone(),
                action,
            }
        })
        .collect()
}

/// Gates purchases by status and owner, then plans against current state.
#[derive(Clone)]
pub struct Reconciler {
    catalog: Arc<ProductCatalog>,
    query: QueryFacade,
}

impl Reconciler {
    pub fn new(catalog: Arc<ProductCatalog>, query: QueryFacade) -> Self {
        Self { catalog, query }
    }

    /// Plan the grants for one purchase.
    ///
    /// Fails only when the current entitlements cannot be read, in which
    /// case no instruction may be acted upon.
    pub fn reconcile(&self, purchase: &Purchase) -> Result<ReconcilePlan> {
        if !purchase.status.grants_access() {
            return Ok(ReconcilePlan::empty(purchase, Disposition::NotCompleted));
        }
        let Some(user) = purchase.owner() else {
            pps_warn!(
                context = LogContext::new().with_purchase(purchase.id.as_str()),
                "completed purchase has no user; skipping"
            );
            return Ok(ReconcilePlan::empty(purchase, Disposition::MissingUser));
        };

        let normalized = PurchaseNormalizer::new(&self.catalog).normalize(purchase);
        let active = self
            .query
            .list_active_entitlements(user)
            .map_err(|error| ReconcileError::LookupFailure {
                purchase: purchase.id.clone(),
                error,
            })?;

        Ok(ReconcilePlan {
            purchase: purchase.id.clone(),
            user: Some(user.clone()),
            disposition: Disposition::Reconciled,
            steps: plan_steps(&normalized, &active),
        })
    }
}
