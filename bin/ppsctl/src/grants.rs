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
use pps_entitlements::{CandidateStatus, Entitlement, UserId};

use crate::runtime::Runtime;
use crate::Output;

#[derive(Debug, Args)]
pub struct GrantCommand {
    #[arg(value_name = "USER_ID")]
    user: String,

    /// Canonical product id or legacy key.
    #[arg(value_name = "PRODUCT")]
    product: String,

    /// Free-text note stored on the entitlement.
    #[arg(long, value_name = "TEXT")]
    note: Option<String>,
}

impl GrantCommand {
    pub fn execute(self, runtime: &Runtime, output: Output) -> Result<()> {
        let user = UserId::from(self.user.as_str());
        let outcome = runtime
            .service
            .grant_manual(&user, &self.product, self.note)?;
        output.emit(&outcome, || match outcome.status {
            CandidateStatus::Granted => format!("granted {} to {user}", outcome.product),
            _ => format!("{user} already holds {}", outcome.product),
        })
    }
}

#[derive(Debug, Args)]
pub struct RevokeCommand {
    #[arg(value_name = "USER_ID")]
    user: String,

    /// Canonical product id or legacy key.
    #[arg(value_name = "PRODUCT")]
    product: String,

    /// Reason recorded in the logs.
    #[arg(long, value_name = "TEXT", default_value = "manual revocation")]
    reason: String,
}

impl RevokeCommand {
    pub fn execute(self, runtime: &Runtime, output: Output) -> Result<()> {
        let user = UserId::from(self.user.as_str());
        let revoked = runtime.service.revoke(&user, &self.product, &self.reason)?;
        output.emit(&revoked, || describe_revoked(&user, &revoked))
    }
}

#[derive(Debug, Args)]
pub struct ClearAddOnsCommand {
    #[arg(value_name = "USER_ID")]
    user: String,
}

impl ClearAddOnsCommand {
    pub fn execute(self, runtime: &Runtime, output: Output) -> Result<()> {
        let user = UserId::from(self.user.as_str());
        let revoked = runtime.service.clear_add_ons(&user)?;
        output.emit(&revoked, || describe_revoked(&user, &revoked))
    }
}

fn describe_revoked(user: &UserId, revoked: &[Entitlement]) -> String {
    if revoked.is_empty() {
        return format!("{user}: nothing active to revoke");
    }
    revoked
        .iter()
        .map(|row| format!("{user}: revoked {} ({})", row.product_id, row.source))
        .collect::<Vec<_>>()
        .join("\n")
}
