//! ---
//! pps_section: "05-admin-tooling"
//! pps_subsection: "binary"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Admin CLI for entitlement repair and lifecycle operations."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod grants;
mod purchases;
mod query;
mod repair;
mod runtime;

use runtime::Runtime;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "PMU Profit System entitlement administration",
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to ./pps.toml or ./configs/pps.toml; PPS_CONFIG wins).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the store data directory.
    #[arg(long = "data-dir", global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Backfill missing entitlements across stored purchases.
    Repair(repair::RepairCommand),
    /// Reconcile one stored purchase.
    Process(purchases::ProcessCommand),
    /// Mark purchases carrying a payment reference as paid and reconcile them.
    Complete(purchases::CompleteCommand),
    /// Load purchase rows from a JSON or JSON-lines export.
    Import(purchases::ImportCommand),
    /// Grant a product manually.
    Grant(grants::GrantCommand),
    /// Revoke a user's active entitlement for a product.
    Revoke(grants::RevokeCommand),
    /// Revoke every add-on entitlement of a user, keeping the main product.
    #[command(name = "clear-add-ons")]
    ClearAddOns(grants::ClearAddOnsCommand),
    /// Check whether a user holds a product.
    Check(query::CheckCommand),
    /// List a user's active entitlements.
    List(query::ListCommand),
    /// Show the product catalog.
    Catalog,
    /// Report entitlement integrity problems.
    Audit(query::AuditCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = Runtime::bootstrap(cli.config.as_deref(), cli.data_dir.as_deref())?;
    let output = Output { json: cli.json };

    let result = match cli.command {
        Commands::Repair(cmd) => cmd.execute(&runtime, output),
        Commands::Process(cmd) => cmd.execute(&runtime, output),
        Commands::Complete(cmd) => cmd.execute(&runtime, output),
        Commands::Import(cmd) => cmd.execute(&runtime, output),
        Commands::Grant(cmd) => cmd.execute(&runtime, output),
        Commands::Revoke(cmd) => cmd.execute(&runtime, output),
        Commands::ClearAddOns(cmd) => cmd.execute(&runtime, output),
        Commands::Check(cmd) => cmd.execute(&runtime, output),
        Commands::List(cmd) => cmd.execute(&runtime, output),
        Commands::Catalog => query::catalog(&runtime, output),
        Commands::Audit(cmd) => cmd.execute(&runtime, output),
    };
    runtime.dump_metrics()?;
    result
}

/// Rendering switch shared by the subcommands.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
}

impl Output {
    /// Print `value` as JSON, or the text produced by `human`.
    pub fn emit<T: serde::Serialize>(self, value: &T, human: impl FnOnce() -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", human());
        }
        Ok(())
    }
}
