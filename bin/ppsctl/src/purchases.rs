//! ---
//! pps_section: "05-admin-tooling"
//! pps_subsection: "binary"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Admin CLI for entitlement repair and lifecycle operations."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use pps_entitlements::{
    BatchFailure, CandidateStatus, EntitlementService, EntitlementStore, Purchase, PurchaseId,
    PurchaseReport,
};
use pps_logging::{log_system_event, pps_warn, LogContext, SystemEventOutcome};
use serde::Serialize;

use crate::runtime::Runtime;
use crate::Output;

#[derive(Debug, Args)]
pub struct ProcessCommand {
    /// Purchase identifier.
    #[arg(value_name = "PURCHASE_ID")]
    purchase: String,

    /// Print the plan without writing.
    #[arg(long = "dry-run", action = clap::ArgAction::SetTrue)]
    dry_run: bool,
}

impl ProcessCommand {
    pub fn execute(self, runtime: &Runtime, output: Output) -> Result<()> {
        let id = PurchaseId::from(self.purchase.as_str());
        if self.dry_run {
            let purchase = runtime
                .store
                .purchase(&id)?
                .with_context(|| format!("unknown purchase {id}"))?;
            let plan = runtime.service.plan_purchase(&purchase)?;
            return output.emit(&plan, || {
                let grants = plan.grants();
                format!(
                    "{} ({}): would grant {}",
                    plan.purchase,
                    plan.disposition,
                    if grants.is_empty() {
                        "nothing".to_owned()
                    } else {
                        grants
                            .iter()
                            .map(|grant| grant.product.to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    }
                )
            });
        }

        let report = runtime.service.process_purchase_id(&id)?;
        output.emit(&report, || describe(&report))
    }
}

#[derive(Debug, Args)]
pub struct CompleteCommand {
    /// Checkout session or payment intent reference.
    #[arg(value_name = "PAYMENT_REFERENCE")]
    reference: String,
}

impl CompleteCommand {
    pub fn execute(self, runtime: &Runtime, output: Output) -> Result<()> {
        let reports = runtime.service.complete_payment(&self.reference)?;
        output.emit(&reports, || {
            reports.iter().map(describe).collect::<Vec<_>>().join("\n")
        })
    }
}

#[derive(Debug, Args)]
pub struct ImportCommand {
    /// JSON array or JSON-lines file of purchase rows.
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Reconcile each imported purchase right away.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    process: bool,
}

#[derive(Debug, Serialize)]
struct ImportSummary {
    imported: usize,
    reports: Vec<PurchaseReport>,
    failures: Vec<BatchFailure>,
}

impl ImportCommand {
    pub fn execute(self, runtime: &Runtime, output: Output) -> Result<()> {
        let raw = fs::read_to_string(&self.file)
            .with_context(|| format!("unable to read {}", self.file.display()))?;
        let purchases = parse_purchases(&raw)
            .with_context(|| format!("unable to parse purchases in {}", self.file.display()))?;

        let summary = import(
            runtime.store.as_ref(),
            &runtime.service,
            purchases,
            self.process,
        )?;

        let file = self.file.display().to_string();
        log_system_event(
            Some(&LogContext::new().with_source(&file)),
            "purchases.import",
            &format!(
                "imported {} purchases, {} failed to process",
                summary.imported,
                summary.failures.len()
            ),
            if summary.failures.is_empty() {
                SystemEventOutcome::Success
            } else {
                SystemEventOutcome::Attention
            },
        );
        output.emit(&summary, || {
            let mut lines = vec![format!("imported {} purchases", summary.imported)];
            lines.extend(summary.reports.iter().map(describe));
            for failure in &summary.failures {
                lines.push(format!("  {}: {}", failure.purchase, failure.error));
            }
            lines.join("\n")
        })?;
        if !summary.failures.is_empty() {
            return Err(anyhow!(
                "import finished with {} unprocessed purchases; run repair to retry",
                summary.failures.len()
            ));
        }
        Ok(())
    }
}

/// Save every row, then optionally reconcile it. A failed reconciliation is
/// recorded and the rest of the file still goes through.
fn import(
    store: &dyn EntitlementStore,
    service: &EntitlementService,
    purchases: Vec<Purchase>,
    process: bool,
) -> Result<ImportSummary> {
    let mut summary = ImportSummary {
        imported: 0,
        reports: Vec::new(),
        failures: Vec::new(),
    };
    for purchase in purchases {
        store.save_purchase(purchase.clone())?;
        summary.imported += 1;
        if !process {
            continue;
        }
        match service.process_purchase(&purchase) {
            Ok(report) => summary.reports.push(report),
            Err(error) => {
                pps_warn!(
                    context = LogContext::new().with_purchase(purchase.id.as_str()),
                    "import could not process purchase: {error}"
                );
                summary.failures.push(BatchFailure {
                    purchase: purchase.id.clone(),
                    retryable: error.is_retryable(),
                    error: error.to_string(),
                });
            }
        }
    }
    Ok(summary)
}

/// Accept either a JSON array of rows or one row per line.
fn parse_purchases(raw: &str) -> Result<Vec<Purchase>> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    trimmed
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str::<Purchase>(line).with_context(|| format!("line {}", index + 1))
        })
        .collect()
}

pub fn describe(report: &PurchaseReport) -> String {
    let mut line = format!(
        "{} ({}): {} granted, {} already held, {} unrecognized, {} failed",
        report.purchase,
        report.disposition,
        report.count(CandidateStatus::Granted),
        report.count(CandidateStatus::SkippedDuplicate),
        report.count(CandidateStatus::SkippedUnrecognized),
        report.count(CandidateStatus::Failed)
    );
    if report.marked_processed {
        line.push_str(", marked processed");
    }
    line
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Utc};
    use pps_entitlements::{
        Entitlement, EntitlementFilter, EntitlementId, MemoryStore, PurchaseFilter,
        PurchaseStatus, StoreError, StoreResult, UserId,
    };

    use super::*;

    /// Accepts purchases but cannot read entitlements.
    struct ReadOutage(MemoryStore);

    impl EntitlementStore for ReadOutage {
        fn entitlements(&self, _filter: &EntitlementFilter) -> StoreResult<Vec<Entitlement>> {
            Err(StoreError::Unavailable("replica lagging".into()))
        }

        fn insert_entitlement(&self, row: Entitlement) -> StoreResult<Entitlement> {
            self.0.insert_entitlement(row)
        }

        fn deactivate_entitlement(
            &self,
            id: EntitlementId,
            at: DateTime<Utc>,
        ) -> StoreResult<Option<Entitlement>> {
            self.0.deactivate_entitlement(id, at)
        }

        fn purchase(&self, id: &PurchaseId) -> StoreResult<Option<Purchase>> {
            self.0.purchase(id)
        }

        fn purchases(&self, filter: &PurchaseFilter) -> StoreResult<Vec<Purchase>> {
            self.0.purchases(filter)
        }

        fn save_purchase(&self, purchase: Purchase) -> StoreResult<()> {
            self.0.save_purchase(purchase)
        }

        fn mark_entitlements_created(&self, id: &PurchaseId) -> StoreResult<bool> {
            self.0.mark_entitlements_created(id)
        }

        fn enforces_active_uniqueness(&self) -> bool {
            true
        }
    }

    #[test]
    fn import_keeps_going_after_a_processing_failure() {
        let store = Arc::new(ReadOutage(MemoryStore::new()));
        let service = EntitlementService::new(store.clone());
        let rows = vec![
            Purchase::new("p-1", Some(UserId::from("u-1")), PurchaseStatus::Completed)
                .with_product("pricing-template"),
            Purchase::new("p-2", Some(UserId::from("u-2")), PurchaseStatus::Completed)
                .with_product("pricing-template"),
        ];

        let summary = import(store.as_ref(), &service, rows, true).unwrap();
        assert_eq!(summary.imported, 2);
        assert!(summary.reports.is_empty());
        let failed: Vec<&str> = summary
            .failures
            .iter()
            .map(|failure| failure.purchase.as_str())
            .collect();
        assert_eq!(failed, vec!["p-1", "p-2"]);
        assert!(summary.failures.iter().all(|failure| failure.retryable));
        assert!(store.purchase(&PurchaseId::from("p-2")).unwrap().is_some());
    }

    #[test]
    fn parses_json_lines_and_arrays() {
        let lines = "{\"id\":\"a\",\"status\":\"completed\"}\n\n{\"id\":\"b\",\"status\":\"pending\"}\n";
        assert_eq!(parse_purchases(lines).unwrap().len(), 2);
        let array = "[{\"id\":\"a\",\"status\":\"completed\"}]";
        assert_eq!(parse_purchases(array).unwrap()[0].id.as_str(), "a");
        assert!(parse_purchases("{\"id\":1}").is_err());
    }
}
