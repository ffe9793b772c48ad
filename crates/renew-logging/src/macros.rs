//! ---
//! renew_section: "03-persistence-logging"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Logging macros that attach the update context to tracing events."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
/// Emit an informational log enriched with update context.
#[macro_export]
macro_rules! renew_info {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::INFO,
            attempt = ctx.attempt.unwrap_or(""),
            version = ctx.version.unwrap_or(""),
            previous = ctx.previous.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::UpdateContext::default();
        tracing::event!(
            tracing::Level::INFO,
            attempt = ctx.attempt.unwrap_or(""),
            version = ctx.version.unwrap_or(""),
            previous = ctx.previous.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit a warning log enriched with update context.
#[macro_export]
macro_rules! renew_warn {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::WARN,
            attempt = ctx.attempt.unwrap_or(""),
            version = ctx.version.unwrap_or(""),
            previous = ctx.previous.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::UpdateContext::default();
        tracing::event!(
            tracing::Level::WARN,
            attempt = ctx.attempt.unwrap_or(""),
            version = ctx.version.unwrap_or(""),
            previous = ctx.previous.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an error log enriched with update context.
#[macro_export]
macro_rules! renew_error {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::ERROR,
            attempt = ctx.attempt.unwrap_or(""),
            version = ctx.version.unwrap_or(""),
            previous = ctx.previous.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::UpdateContext::default();
        tracing::event!(
            tracing::Level::ERROR,
            attempt = ctx.attempt.unwrap_or(""),
            version = ctx.version.unwrap_or(""),
            previous = ctx.previous.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}
