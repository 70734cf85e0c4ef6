//! ---
//! pps_section: "01-core-functionality"
//! pps_subsection: "module"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Shared primitives and utilities for the entitlement tooling."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
//! Shared primitives for the PMU Profit System workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the admin tooling.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, RepairConfig, RepairScope,
    StoreBackend, StoreConfig,
};
pub use logging::{init_tracing, LogFormat};
