//! ---
//! pps_section: "05-admin-tooling"
//! pps_subsection: "binary"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Admin CLI for entitlement repair and lifecycle operations."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use anyhow::Result;
use clap::Args;
use pps_entitlements::{AuditReport, EntitlementState, UserId};
use serde::Serialize;

use crate::runtime::Runtime;
use crate::Output;

#[derive(Debug, Args)]
pub struct CheckCommand {
    #[arg(value_name = "USER_ID")]
    user: String,

    /// Canonical product id or legacy key.
    #[arg(value_name = "PRODUCT")]
    product: String,
}

#[derive(Debug, Serialize)]
struct CheckResult<'a> {
    user: &'a str,
    product: &'a str,
    active: bool,
    state: EntitlementState,
}

impl CheckCommand {
    pub fn execute(self, runtime: &Runtime, output: Output) -> Result<()> {
        let user = UserId::from(self.user.as_str());
        let query = runtime.service.query();
        let result = CheckResult {
            user: &self.user,
            product: &self.product,
            active: query.has_active_entitlement(&user, &self.product)?,
            state: query.entitlement_state(&user, &self.product)?,
        };
        output.emit(&result, || {
            format!(
                "{} {} {} ({:?})",
                result.user,
                if result.active { "holds" } else { "does not hold" },
                result.product,
                result.state
            )
        })
    }
}

#[derive(Debug, Args)]
pub struct ListCommand {
    #[arg(value_name = "USER_ID")]
    user: String,
}

impl ListCommand {
    pub fn execute(self, runtime: &Runtime, output: Output) -> Result<()> {
        let user = UserId::from(self.user.as_str());
        let rows = runtime.service.query().list_active_entitlements(&user)?;
        let catalog = runtime.service.catalog();
        output.emit(&rows, || {
            if rows.is_empty() {
                return format!("{user} has no active entitlements");
            }
            rows.iter()
                .map(|row| {
                    format!(
                        "{}  {:<32} {}  since {}",
                        row.product_id,
                        catalog.display_name(row.product_id.as_str()).unwrap_or("-"),
                        row.source,
                        row.valid_from.format("%Y-%m-%d")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
    }
}

pub fn catalog(runtime: &Runtime, output: Output) -> Result<()> {
    let products = runtime.service.catalog().products();
    output.emit(&products, || {
        products
            .iter()
            .map(|product| {
                format!(
                    "{}  {:<32} {:<32} {:>6.2} {}  {}",
                    product.id,
                    product.legacy_key,
                    product.name,
                    f64::from(product.price_minor) / 100.0,
                    product.currency,
                    product.kind
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}

#[derive(Debug, Args)]
pub struct AuditCommand {
    /// Restrict the audit to one user.
    #[arg(long, value_name = "USER_ID")]
    user: Option<String>,
}

impl AuditCommand {
    pub fn execute(self, runtime: &Runtime, output: Output) -> Result<()> {
        let user = self.user.as_deref().map(UserId::from);
        let report = runtime.service.audit(user.as_ref())?;
        output.emit(&report, || describe_audit(&report))
    }
}

fn describe_audit(report: &AuditReport) -> String {
    if report.is_clean() {
        return "no findings".to_owned();
    }
    let mut lines = Vec::new();
    for row in &report.unknown_products {
        lines.push(format!("unknown product: {} held by {}", row.product_id, row.user_id));
    }
    for row in &report.orphaned {
        lines.push(format!(
            "orphaned: {} held by {} from missing {}",
            row.product_id, row.user_id, row.source
        ));
    }
    for duplicate in &report.duplicate_active {
        lines.push(format!(
            "duplicate active: {} x{} for {}",
            duplicate.product,
            duplicate.entitlements.len(),
            duplicate.user
        ));
    }
    for purchase in &report.unprocessed_purchases {
        lines.push(format!("unprocessed purchase: {purchase}"));
    }
    for purchase in &report.ownerless_purchases {
        lines.push(format!("purchase without owner: {purchase}"));
    }
    for unrecognized in &report.unrecognized_purchases {
        let products: Vec<String> = unrecognized
            .products
            .iter()
            .map(ToString::to_string)
            .collect();
        lines.push(format!(
            "unrecognized products in {}: {}",
            unrecognized.purchase,
            products.join(", ")
        ));
    }
    lines.join("\n")
}
