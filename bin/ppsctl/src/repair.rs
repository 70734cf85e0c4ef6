//! ---
//! pps_section: "05-admin-tooling"
//! pps_subsection: "binary"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Admin CLI for entitlement repair and lifecycle operations."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use anyhow::{anyhow, Result};
use clap::Args;
use pps_common::config::RepairScope as ConfiguredScope;
use pps_entitlements::{BatchReport, PlannedAction, ReconcilePlan, RepairFilter, RepairScope, UserId};
use serde::Serialize;

use crate::runtime::Runtime;
use crate::Output;

#[derive(Debug, Args)]
pub struct RepairCommand {
    /// Revisit every completed purchase, not only unprocessed ones.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    all: bool,

    /// Restrict the run to one user.
    #[arg(long, value_name = "USER_ID")]
    user: Option<String>,

    /// Maximum number of purchases to visit (defaults to repair.batch_limit).
    #[arg(long, value_name = "N")]
    limit: Option<usize>,

    /// Show what would be granted without writing anything.
    #[arg(long = "dry-run", action = clap::ArgAction::SetTrue)]
    dry_run: bool,
}

#[derive(Debug, Serialize)]
struct DryRun {
    plans: Vec<ReconcilePlan>,
    would_grant: usize,
}

impl RepairCommand {
    fn filter(&self, runtime: &Runtime) -> RepairFilter {
        let configured = match runtime.config.repair.scope {
            ConfiguredScope::Unprocessed => RepairScope::Unprocessed,
            ConfiguredScope::AllCompleted => RepairScope::AllCompleted,
        };
        RepairFilter {
            scope: if self.all {
                RepairScope::AllCompleted
            } else {
                configured
            },
            user: self.user.as_deref().map(UserId::from),
            limit: self.limit.or(runtime.config.repair.batch_limit),
        }
    }

    pub fn execute(self, runtime: &Runtime, output: Output) -> Result<()> {
        let filter = self.filter(runtime);
        if self.dry_run {
            return dry_run(runtime, &filter, output);
        }

        let batch = runtime.service.repair(&filter)?;
        output.emit(&batch, || summary(&batch))?;
        if !batch.is_clean() {
            return Err(anyhow!(
                "repair finished with {} failed purchases; rerun to retry",
                batch.failures.len() + batch.reports.iter().filter(|r| r.has_failures()).count()
            ));
        }
        Ok(())
    }
}

fn dry_run(runtime: &Runtime, filter: &RepairFilter, output: Output) -> Result<()> {
    let mut plans = Vec::new();
    for purchase in runtime.store.purchases(&filter.purchase_filter())? {
        plans.push(runtime.service.plan_purchase(&purchase)?);
    }
    let would_grant = plans
        .iter()
        .flat_map(|plan| &plan.steps)
        .filter(|step| step.action == PlannedAction::Grant)
        .count();
    let report = DryRun { plans, would_grant };
    output.emit(&report, || {
        let mut lines = vec![format!(
            "dry run: {} purchases, {} grants pending",
            report.plans.len(),
            report.would_grant
        )];
        for plan in &report.plans {
            for step in plan.steps.iter().filter(|s| s.action == PlannedAction::Grant) {
                lines.push(format!(
                    "  {} -> {} ({})",
                    plan.purchase,
                    step.product,
                    runtime
                        .service
                        .catalog()
                        .display_name(step.product.as_str())
                        .unwrap_or("unknown")
                ));
            }
        }
        lines.join("\n")
    })
}

fn summary(batch: &BatchReport) -> String {
    let totals = batch.totals();
    let mut lines = vec![format!(
        "visited {} purchases: {} granted, {} already held, {} unrecognized, {} failed, {} errors",
        totals.purchases,
        totals.granted,
        totals.skipped_duplicate,
        totals.skipped_unrecognized,
        totals.failed,
        totals.errors
    )];
    for failure in &batch.failures {
        lines.push(format!("  {}: {}", failure.purchase, failure.error));
    }
    lines.join("\n")
}
