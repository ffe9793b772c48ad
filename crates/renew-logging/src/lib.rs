//! ---
//! renew_section: "03-persistence-logging"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Update-event logging with attempt, version and step context."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Helpers that give every update-related log line the same shape: the
//! attempt it belongs to, the version being installed, and the step of the
//! update pipeline that emitted it.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for CLIs and tests.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct UpdateContext<'a> {
    /// Identifier of the update attempt.
    pub attempt: Option<&'a str>,
    /// Target version of the attempt.
    pub version: Option<&'a str>,
    /// Version being replaced.
    pub previous: Option<&'a str>,
    /// Pipeline step (checking, downloading, applying...).
    pub step: Option<&'a str>,
}

impl<'a> UpdateContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an attempt identifier.
    pub fn with_attempt(mut self, attempt: &'a str) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Attach the target version.
    pub fn with_version(mut self, version: &'a str) -> Self {
        self.version = Some(version);
        self
    }

    /// Attach the version being replaced.
    pub fn with_previous(mut self, previous: &'a str) -> Self {
        self.previous = Some(previous);
        self
    }

    /// Attach a pipeline step.
    pub fn with_step(mut self, step: &'a str) -> Self {
        self.step = Some(step);
        self
    }
}

/// High-level outcome used when emitting update lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateEventOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation failed or was aborted; the installation is consistent.
    Fault,
    /// A recovery action failed; the installation may be inconsistent.
    Critical,
}

impl UpdateEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            UpdateEventOutcome::Success => "success",
            UpdateEventOutcome::Fault => "fault",
            UpdateEventOutcome::Critical => "critical",
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, UpdateEventOutcome::Critical)
    }
}

/// Emit a standardized update event with its outcome.
pub fn log_update_event(
    context: Option<&UpdateContext>,
    event: &str,
    message: &str,
    outcome: UpdateEventOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    // `tracing::event!` needs a constant level, hence the explicit branches.
    match outcome {
        UpdateEventOutcome::Success => tracing::event!(
            Level::INFO,
            event,
            outcome = outcome.as_str(),
            critical = false,
            attempt = ctx.attempt.unwrap_or(""),
            version = ctx.version.unwrap_or(""),
            previous = ctx.previous.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            message = %message
        ),
        UpdateEventOutcome::Fault | UpdateEventOutcome::Critical => tracing::event!(
            Level::ERROR,
            event,
            outcome = outcome.as_str(),
            critical = outcome.is_critical(),
            attempt = ctx.attempt.unwrap_or(""),
            version = ctx.version.unwrap_or(""),
            previous = ctx.previous.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
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
        let ctx = UpdateContext::new()
            .with_attempt("a1b2")
            .with_version("1.1.0.0");
        renew_info!(context = ctx.clone(), "download complete");
        renew_warn!("stop request failed: {}", "timeout");
        renew_error!(context = ctx, "extraction failed: {}", 42);
    }

    #[test]
    fn update_event_helper_emits_every_outcome() {
        init();
        let ctx = UpdateContext::new()
            .with_version("1.1.0.0")
            .with_previous("1.0.0.0")
            .with_step("applying");
        for outcome in [
            UpdateEventOutcome::Success,
            UpdateEventOutcome::Fault,
            UpdateEventOutcome::Critical,
        ] {
            log_update_event(Some(&ctx), "test.event", "update event helper", outcome);
        }
        log_update_event(None, "test.event", "no context", UpdateEventOutcome::Fault);
    }

    #[test]
    fn critical_outcome_is_flagged() {
        assert!(UpdateEventOutcome::Critical.is_critical());
        assert!(!UpdateEventOutcome::Fault.is_critical());
        assert_eq!(UpdateEventOutcome::Success.as_str(), "success");
    }
}
