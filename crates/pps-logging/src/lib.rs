//! ---
//! pps_section: "03-logging"
//! pps_subsection: "module"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Structured logging adapters for entitlement events."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Logging helpers shared by the entitlement crates and the admin tooling.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

#[doc(hidden)]
pub use tracing;

/// Initialize a baseline tracing subscriber suitable for tools and tests.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// User the event concerns.
    pub user: Option<&'a str>,
    /// Product identifier, canonical or as received.
    pub product: Option<&'a str>,
    /// Purchase record being reconciled.
    pub purchase: Option<&'a str>,
    /// Provenance tag of the entitlement source (purchase, manual, ...).
    pub source: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a user identifier.
    pub fn with_user(mut self, user: &'a str) -> Self {
        self.user = Some(user);
        self
    }

    /// Attach a product identifier.
    pub fn with_product(mut self, product: &'a str) -> Self {
        self.product = Some(product);
        self
    }

    /// Attach a purchase identifier.
    pub fn with_purchase(mut self, purchase: &'a str) -> Self {
        self.purchase = Some(purchase);
        self
    }

    /// Attach the entitlement source tag.
    pub fn with_source(mut self, source: &'a str) -> Self {
        self.source = Some(source);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation completed but needs operator follow-up.
    Attention,
    /// The operation failed or was aborted.
    Fault,
}

impl SystemEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Attention => "attention",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized system event with an outcome.
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    let user = ctx.user.unwrap_or("");
    let product = ctx.product.unwrap_or("");
    let purchase = ctx.purchase.unwrap_or("");
    let source = ctx.source.unwrap_or("");
    // `tracing::event!` needs a constant level, hence the explicit branches.
    match outcome {
        SystemEventOutcome::Success => tracing::info!(
            event,
            outcome = outcome.as_str(),
            user,
            product,
            purchase,
            source,
            message = %message
        ),
        SystemEventOutcome::Attention => tracing::warn!(
            event,
            outcome = outcome.as_str(),
            user,
            product,
            purchase,
            source,
            message = %message
        ),
        SystemEventOutcome::Fault => tracing::error!(
            event,
            outcome = outcome.as_str(),
            user,
            product,
            purchase,
            source,
            message = %message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::new()
            .with_user("user-1")
            .with_product("pmu-ad-generator");
        pps_info!(context = ctx.clone(), "entitlement granted");
        pps_warn!("unrecognized product {}", "mystery-box");
        pps_error!(context = ctx, "write failed: {}", "store offline");
    }

    #[test]
    fn context_builder_sets_fields() {
        let ctx = LogContext::new()
            .with_user("u")
            .with_purchase("p")
            .with_source("manual");
        assert_eq!(ctx.user, Some("u"));
        assert_eq!(ctx.purchase, Some("p"));
        assert_eq!(ctx.source, Some("manual"));
        assert_eq!(ctx.product, None);
    }

    #[test]
    fn system_event_helper_emits() {
        init();
        let ctx = LogContext::new().with_purchase("purchase-1");
        log_system_event(
            Some(&ctx),
            "repair.batch",
            "batch finished",
            SystemEventOutcome::Success,
        );
        log_system_event(
            None,
            "repair.batch",
            "batch aborted",
            SystemEventOutcome::Fault,
        );
    }
}
