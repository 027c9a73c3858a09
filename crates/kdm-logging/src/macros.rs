//! ---
//! kdm_section: "03-persistence-logging"
//! kdm_subsection: "module"
//! kdm_type: "source"
//! kdm_scope: "code"
//! kdm_description: "Structured logging adapters and sinks."
//! kdm_version: "v0.1.0"
//! kdm_owner: "tbd"
//! ---
/// Emit an informational log enriched with KDM context.
#[macro_export]
macro_rules! kdm_info {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::INFO,
            tenant = ctx.tenant.unwrap_or(""),
            build = ctx.build.unwrap_or(""),
            replica = ctx.replica.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        tracing::event!(
            tracing::Level::INFO,
            tenant = ctx.tenant.unwrap_or(""),
            build = ctx.build.unwrap_or(""),
            replica = ctx.replica.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit a debug log enriched with KDM context.
#[macro_export]
macro_rules! kdm_debug {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::DEBUG,
            tenant = ctx.tenant.unwrap_or(""),
            build = ctx.build.unwrap_or(""),
            replica = ctx.replica.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        tracing::event!(
            tracing::Level::DEBUG,
            tenant = ctx.tenant.unwrap_or(""),
            build = ctx.build.unwrap_or(""),
            replica = ctx.replica.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an error log enriched with KDM context.
#[macro_export]
macro_rules! kdm_error {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::ERROR,
            tenant = ctx.tenant.unwrap_or(""),
            build = ctx.build.unwrap_or(""),
            replica = ctx.replica.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        tracing::event!(
            tracing::Level::ERROR,
            tenant = ctx.tenant.unwrap_or(""),
            build = ctx.build.unwrap_or(""),
            replica = ctx.replica.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}
