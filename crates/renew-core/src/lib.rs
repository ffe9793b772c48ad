//! ---
//! renew_section: "01-core-functionality"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Renew update pipeline: fetcher, stager, backup, handoff and applier."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
//! The update pipeline: the primary process downloads, backs up, stages, and
//! hands off; a separate applier process replaces files, rolls back on
//! failure, restarts the service, and records the outcome.

pub mod applier;
pub mod backup;
pub mod error;
pub mod fetcher;
pub mod fsutil;
pub mod handoff;
pub mod history;
pub mod orchestrator;
pub mod retention;
pub mod service;
pub mod staging;
pub mod state;

pub use applier::{Applier, ApplierSettings, ApplyReport, FileOutcome, UpdateResult};
pub use backup::{BackupManager, BackupSnapshot};
pub use error::UpdateError;
pub use fetcher::{ArtifactExpectation, ArtifactFetcher, FetchedArtifact};
pub use handoff::{
    ApplierLauncher, HandoffCoordinator, ProcessLauncher, RecordError, TransferRecord,
    APPLY_SUBCOMMAND,
};
pub use history::{HistoryRecord, HistoryStore};
pub use orchestrator::{RuntimeContext, UpdateOrchestrator};
pub use retention::{Retention, RetentionPolicy, RetentionReport};
pub use service::{ServiceControl, SystemdServiceControl};
pub use staging::{PackageStager, StagedPackage};
pub use state::{CycleOutcome, UpdateState, UpdateStep};
