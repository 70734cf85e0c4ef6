//! ---
//! pps_section: "03-logging"
//! pps_subsection: "module"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Structured logging adapters for entitlement events."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
//! Context-aware logging macros.

#[doc(hidden)]
#[macro_export]
macro_rules! __pps_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::tracing::event!(
            $level,
            user = ctx.user.unwrap_or(""),
            product = ctx.product.unwrap_or(""),
            purchase = ctx.purchase.unwrap_or(""),
            source = ctx.source.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with entitlement context.
#[macro_export]
macro_rules! pps_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__pps_event!($crate::tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__pps_event!($crate::tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with entitlement context.
#[macro_export]
macro_rules! pps_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__pps_event!($crate::tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__pps_event!($crate::tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with entitlement context.
#[macro_export]
macro_rules! pps_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__pps_event!($crate::tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__pps_event!($crate::tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
