//! ---
//! renew_section: "01-core-functionality"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Update attempt state machine and cycle outcomes."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use std::fmt;

use serde::Serialize;

/// Step of an attempt that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStep {
    Checking,
    Downloading,
    BackingUp,
    Extracting,
    Verifying,
    Handoff,
    Stopping,
}

impl UpdateStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStep::Checking => "checking",
            UpdateStep::Downloading => "downloading",
            UpdateStep::BackingUp => "backing_up",
            UpdateStep::Extracting => "extracting",
            UpdateStep::Verifying => "verifying",
            UpdateStep::Handoff => "handoff",
            UpdateStep::Stopping => "stopping",
        }
    }
}

impl fmt::Display for UpdateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the primary process currently is within an attempt.
///
/// `Idle -> CheckingVersion -> UpdateFound -> Downloading -> Downloaded ->
/// BackingUp -> Extracting -> Verifying -> HandoffPrepared -> Stopping`.
/// Any step may divert to `Failed`, after which the orchestrator returns to
/// `Idle` for the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "step")]
pub enum UpdateState {
    #[default]
    Idle,
    CheckingVersion,
    UpdateFound,
    Downloading,
    Downloaded,
    BackingUp,
    Extracting,
    Verifying,
    HandoffPrepared,
    Stopping,
    Failed(UpdateStep),
}

impl UpdateState {
    /// `true` while an attempt holds the in-progress flag.
    pub fn is_active(&self) -> bool {
        !matches!(self, UpdateState::Idle | UpdateState::Failed(_))
    }
}

/// Result of one `check_for_updates` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another attempt was already running, or a handoff already happened.
    Skipped,
    /// Nothing newer and applicable was published, or the check failed softly.
    NoUpdate,
    Cancelled,
    /// The applier was launched and the service stop was requested.
    HandedOff { version: String },
    Failed { step: UpdateStep, error: String },
}

impl CycleOutcome {
    /// Label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Skipped => "skipped",
            CycleOutcome::NoUpdate => "no_update",
            CycleOutcome::Cancelled => "cancelled",
            CycleOutcome::HandedOff { .. } => "handed_off",
            CycleOutcome::Failed { .. } => "failed",
        }
    }
}
