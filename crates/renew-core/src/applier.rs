//! ---
//! renew_section: "01-core-functionality"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Out-of-process file replacement with rollback."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use renew_logging::{log_update_event, UpdateContext, UpdateEventOutcome};

use crate::backup::BackupManager;
use crate::error::UpdateError;
use crate::fsutil;
use crate::handoff::TransferRecord;
use crate::history::{HistoryRecord, HistoryStore};
use crate::service::ServiceControl;

/// Outcome the applier leaves for the next primary process to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub success: bool,
    pub completion_time: DateTime<Utc>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl UpdateResult {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            completion_time: Utc::now(),
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            completion_time: Utc::now(),
            error_message: Some(message.into()),
        }
    }

    /// Read the last result, if one was written.
    pub fn load(path: &Path) -> Result<Option<Self>, UpdateError> {
        let body = match fs::read(path) {
            Ok(body) => body,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(UpdateError::Io {
                    context: format!("unable to read {}", path.display()),
                    source,
                })
            }
        };
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|source| UpdateError::Encode {
                context: path.display().to_string(),
                source,
            })
    }

    pub fn write(&self, path: &Path) -> Result<(), UpdateError> {
        fsutil::write_json_atomic(path, self)
    }
}

/// What happened to the installation during an apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Staged files were copied over the installation.
    Applied,
    /// Nothing was touched because a precondition failed.
    Skipped { reason: String },
    /// Copy failed and the backup was restored.
    RolledBack { reason: String },
    /// Copy failed and so did the restore; the installation is inconsistent.
    RollbackFailed { reason: String, rollback: String },
}

impl FileOutcome {
    fn error_message(&self) -> Option<String> {
        match self {
            FileOutcome::Applied => None,
            FileOutcome::Skipped { reason } => Some(reason.clone()),
            FileOutcome::RolledBack { reason } => {
                Some(format!("{reason}; installation restored from backup"))
            }
            FileOutcome::RollbackFailed { reason, rollback } => {
                Some(format!("{reason}; rollback failed: {rollback}"))
            }
        }
    }
}

/// Summary of one applier run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub result: UpdateResult,
    pub files: FileOutcome,
    pub restarted: bool,
}

/// Knobs the applier needs that are not in the transfer record.
#[derive(Debug, Clone)]
pub struct ApplierSettings {
    /// Pause before touching files so the primary can release them.
    pub grace_period: Duration,
    pub result_file: PathBuf,
    /// Restarted when the transfer record cannot be read.
    pub fallback_service: String,
}

/// Second-process role: replaces files, rolls back, restarts, and records.
pub struct Applier {
    service: Arc<dyn ServiceControl>,
    history: HistoryStore,
    settings: ApplierSettings,
}

impl Applier {
    pub fn new(
        service: Arc<dyn ServiceControl>,
        history: HistoryStore,
        settings: ApplierSettings,
    ) -> Self {
        Self {
            service,
            history,
            settings,
        }
    }

    /// Apply the update described by the record at `record_path`.
    ///
    /// Every path ends with a restart request for the service and a written
    /// result; nothing here returns early without one.
    pub async fn run(&self, record_path: &Path) -> ApplyReport {
        let record = match TransferRecord::load(record_path) {
            Ok(record) => record,
            Err(err) => return self.abandon(err.to_string()).await,
        };
        let version = record.version.to_string();
        let previous = record.previous_version.to_string();
        let context = UpdateContext::new()
            .with_version(&version)
            .with_previous(&previous)
            .with_step("apply");
        info!(
            service = %record.service_name,
            source = %record.source_path.display(),
            install_dir = %record.target_path.display(),
            grace_ms = self.settings.grace_period.as_millis() as u64,
            "applier waiting for primary to release files"
        );
        tokio::time::sleep(self.settings.grace_period).await;

        let files = {
            let record = record.clone();
            match tokio::task::spawn_blocking(move || replace_files(&record)).await {
                Ok(outcome) => outcome,
                Err(err) => FileOutcome::Skipped {
                    reason: format!("apply task failed: {err}"),
                },
            }
        };
        match &files {
            FileOutcome::Applied => log_update_event(
                Some(&context),
                "update.apply",
                "staged files copied into installation",
                UpdateEventOutcome::Success,
            ),
            FileOutcome::Skipped { reason } | FileOutcome::RolledBack { reason } => {
                log_update_event(
                    Some(&context),
                    "update.apply",
                    reason,
                    UpdateEventOutcome::Fault,
                )
            }
            FileOutcome::RollbackFailed { reason, rollback } => log_update_event(
                Some(&context),
                "update.rollback",
                &format!("{reason}; rollback failed: {rollback}; installation may be inconsistent"),
                UpdateEventOutcome::Critical,
            ),
        }

        let restart = self.restart(&record.service_name).await;
        let mut error_message = files.error_message();
        if let Err(err) = &restart {
            let message = format!("service restart failed: {err}");
            error_message = Some(match error_message {
                Some(existing) => format!("{existing}; {message}"),
                None => message,
            });
        }
        let result = match error_message {
            None => UpdateResult::succeeded(),
            Some(message) => UpdateResult::failed(message),
        };
        self.write_result(&result);

        self.history.append(HistoryRecord {
            version: record.version,
            previous_version: record.previous_version,
            update_date: result.completion_time,
            release_notes: record.release_notes.clone(),
            was_successful: result.success,
            error_message: result.error_message.clone(),
        });

        if result.success {
            if let Err(err) = fsutil::remove_entry(&record.source_path) {
                warn!(staging = %record.source_path.display(), error = %err, "failed to remove staging directory");
            }
            log_update_event(
                Some(&context),
                "update.complete",
                "update applied and service restarted",
                UpdateEventOutcome::Success,
            );
        }

        ApplyReport {
            result,
            files,
            restarted: restart.is_ok(),
        }
    }

    /// Unreadable record: touch nothing, bring the service back, record why.
    async fn abandon(&self, reason: String) -> ApplyReport {
        log_update_event(
            None,
            "update.apply",
            &format!("transfer record unusable: {reason}"),
            UpdateEventOutcome::Fault,
        );
        let restart = self.restart(&self.settings.fallback_service).await;
        let result = UpdateResult::failed(reason.clone());
        self.write_result(&result);
        ApplyReport {
            result,
            files: FileOutcome::Skipped { reason },
            restarted: restart.is_ok(),
        }
    }

    async fn restart(&self, service: &str) -> Result<(), UpdateError> {
        let outcome = self.service.start(service).await;
        match &outcome {
            Ok(()) => info!(service, "service start requested"),
            Err(err) => log_update_event(
                None,
                "update.restart",
                &format!("failed to start {service}: {err}"),
                UpdateEventOutcome::Critical,
            ),
        }
        outcome
    }

    fn write_result(&self, result: &UpdateResult) {
        if let Err(err) = result.write(&self.settings.result_file) {
            warn!(path = %self.settings.result_file.display(), error = %err, "failed to write update result");
        }
    }
}

fn replace_files(record: &TransferRecord) -> FileOutcome {
    for (label, dir) in [
        ("staged package", &record.source_path),
        ("installation", &record.target_path),
    ] {
        if !dir.is_dir() {
            return FileOutcome::Skipped {
                reason: format!("{label} {} does not exist", dir.display()),
            };
        }
    }
    let error = match fsutil::overlay_tree(&record.source_path, &record.target_path) {
        Ok(stats) => {
            info!(%stats, install_dir = %record.target_path.display(), "installation updated");
            return FileOutcome::Applied;
        }
        Err(err) => err,
    };
    let reason = format!("copy into {} failed: {error}", record.target_path.display());
    warn!(backup = %record.backup_path.display(), "copy failed; restoring backup");
    match BackupManager::restore(&record.backup_path, &record.target_path) {
        Ok(_) => FileOutcome::RolledBack { reason },
        Err(rollback) => FileOutcome::RollbackFailed {
            reason,
            rollback: rollback.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use renew_versioning::ReleaseVersion;
    use tempfile::{tempdir, TempDir};

    use super::*;

    #[derive(Default)]
    struct FakeService {
        started: Mutex<Vec<String>>,
        fail_start: bool,
    }

    #[async_trait]
    impl ServiceControl for FakeService {
        async fn stop(&self, _service: &str) -> Result<(), UpdateError> {
            Ok(())
        }

        async fn start(&self, service: &str) -> Result<(), UpdateError> {
            self.started.lock().push(service.to_owned());
            if self.fail_start {
                Err(UpdateError::ServiceControl {
                    service: service.to_owned(),
                    action: "start",
                    reason: "unit not found".to_owned(),
                })
            } else {
                Ok(())
            }
        }
    }

    struct Fixture {
        dir: TempDir,
        record: TransferRecord,
        record_path: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let root = dir.path();
            let install = root.join("opt/renewd");
            let staging = root.join("staging/update_1");
            let backup = root.join("backups/backup_1");
            for (path, body) in [
                (install.join("renewd"), "v1"),
                (install.join("renewd.toml"), "cfg-v1"),
                (staging.join("renewd"), "v2"),
                (staging.join("renewd.toml"), "cfg-v2"),
                (backup.join("renewd"), "v1"),
                (backup.join("renewd.toml"), "cfg-v1"),
            ] {
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, body).unwrap();
            }
            let record = TransferRecord {
                service_name: "renewd".to_owned(),
                source_path: staging,
                target_path: install,
                backup_path: backup,
                version: ReleaseVersion::new(1, 1, 0, 0),
                previous_version: ReleaseVersion::new(1, 0, 0, 0),
                update_time: Utc::now(),
                release_notes: "fixes".to_owned(),
            };
            let record_path = root.join("transfer.json");
            record.write(&record_path).unwrap();
            Self {
                dir,
                record,
                record_path,
            }
        }

        fn applier(&self, service: Arc<FakeService>) -> Applier {
            Applier::new(
                service,
                HistoryStore::new(self.dir.path().join("update_history.json"), 10),
                ApplierSettings {
                    grace_period: Duration::ZERO,
                    result_file: self.result_file(),
                    fallback_service: "renewd".to_owned(),
                },
            )
        }

        fn result_file(&self) -> PathBuf {
            self.dir.path().join("update_result.json")
        }

        fn history(&self) -> Vec<HistoryRecord> {
            HistoryStore::new(self.dir.path().join("update_history.json"), 10).load()
        }
    }

    #[tokio::test]
    async fn successful_apply_replaces_files_and_restarts() {
        let fixture = Fixture::new();
        let service = Arc::new(FakeService::default());
        let report = fixture.applier(service.clone()).run(&fixture.record_path).await;

        assert_eq!(report.files, FileOutcome::Applied);
        assert!(report.result.success);
        assert!(report.restarted);
        assert_eq!(
            fs::read_to_string(fixture.record.target_path.join("renewd")).unwrap(),
            "v2"
        );
        assert!(!fixture.record.source_path.exists());
        assert_eq!(service.started.lock().as_slice(), &["renewd".to_owned()]);

        let stored = UpdateResult::load(&fixture.result_file()).unwrap().unwrap();
        assert!(stored.success);
        let history = fixture.history();
        assert_eq!(history.len(), 1);
        assert!(history[0].was_successful);
        assert_eq!(history[0].version, ReleaseVersion::new(1, 1, 0, 0));
    }

    #[tokio::test]
    async fn missing_staging_touches_nothing_but_restarts() {
        let fixture = Fixture::new();
        fs::remove_dir_all(&fixture.record.source_path).unwrap();
        let service = Arc::new(FakeService::default());
        let report = fixture.applier(service.clone()).run(&fixture.record_path).await;

        assert!(matches!(report.files, FileOutcome::Skipped { .. }));
        assert!(!report.result.success);
        assert_eq!(
            fs::read_to_string(fixture.record.target_path.join("renewd")).unwrap(),
            "v1"
        );
        assert_eq!(service.started.lock().len(), 1);
        assert!(!fixture.history()[0].was_successful);
    }

    /// A bound socket cannot be copied, even by root, so the overlay fails.
    #[cfg(unix)]
    fn stage_uncopyable_entry(fixture: &Fixture) -> std::os::unix::net::UnixListener {
        fs::write(fixture.record.source_path.join("aaa-new"), "added in v2").unwrap();
        std::os::unix::net::UnixListener::bind(fixture.record.source_path.join("zz-sock")).unwrap()
    }

    #[cfg(unix)]
    fn tree(dir: &Path) -> Vec<(String, String)> {
        let mut entries: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| {
                let entry = entry.unwrap();
                let body = fs::read_to_string(entry.path()).unwrap();
                (entry.file_name().to_string_lossy().into_owned(), body)
            })
            .collect();
        entries.sort();
        entries
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn copy_failure_rolls_back_to_backup() {
        let fixture = Fixture::new();
        let _socket = stage_uncopyable_entry(&fixture);
        let service = Arc::new(FakeService::default());
        let report = fixture.applier(service.clone()).run(&fixture.record_path).await;

        match &report.files {
            FileOutcome::RolledBack { reason } => assert!(reason.contains("zz-sock"), "{reason}"),
            other => panic!("expected rollback, got {other:?}"),
        }
        assert!(report.restarted);
        assert!(!report.result.success);
        assert_eq!(
            tree(&fixture.record.target_path),
            tree(&fixture.record.backup_path)
        );
        assert!(!fixture.record.target_path.join("zz-sock").exists());
        assert!(!fixture.record.target_path.join("aaa-new").exists());
        assert!(fixture.record.source_path.exists());
        assert_eq!(service.started.lock().as_slice(), &["renewd".to_owned()]);

        let stored = UpdateResult::load(&fixture.result_file()).unwrap().unwrap();
        assert!(!stored.success);
        assert!(stored
            .error_message
            .unwrap()
            .contains("installation restored from backup"));
        assert!(!fixture.history()[0].was_successful);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_rollback_still_restarts_service() {
        let fixture = Fixture::new();
        let _socket = stage_uncopyable_entry(&fixture);
        fs::remove_dir_all(&fixture.record.backup_path).unwrap();
        let service = Arc::new(FakeService::default());
        let report = fixture.applier(service.clone()).run(&fixture.record_path).await;

        assert!(matches!(report.files, FileOutcome::RollbackFailed { .. }));
        assert!(report.restarted);
        assert_eq!(service.started.lock().as_slice(), &["renewd".to_owned()]);
        assert!(!report.result.success);
        assert!(report
            .result
            .error_message
            .unwrap()
            .contains("rollback failed"));
        let stored = UpdateResult::load(&fixture.result_file()).unwrap().unwrap();
        assert!(!stored.success);
        assert_eq!(fixture.history().len(), 1);
    }

    #[tokio::test]
    async fn corrupt_record_restarts_fallback_service() {
        let fixture = Fixture::new();
        fs::write(&fixture.record_path, b"garbage").unwrap();
        let service = Arc::new(FakeService::default());
        let report = fixture.applier(service.clone()).run(&fixture.record_path).await;

        assert!(!report.result.success);
        assert!(report.restarted);
        assert_eq!(
            fs::read_to_string(fixture.record.target_path.join("renewd")).unwrap(),
            "v1"
        );
        let stored = UpdateResult::load(&fixture.result_file()).unwrap().unwrap();
        assert!(!stored.success);
        assert!(stored.error_message.unwrap().contains("malformed"));
    }

    #[tokio::test]
    async fn restart_failure_marks_result_failed() {
        let fixture = Fixture::new();
        let service = Arc::new(FakeService {
            fail_start: true,
            ..FakeService::default()
        });
        let report = fixture.applier(service).run(&fixture.record_path).await;

        assert_eq!(report.files, FileOutcome::Applied);
        assert!(!report.restarted);
        assert!(!report.result.success);
        assert!(report
            .result
            .error_message
            .unwrap()
            .contains("service restart failed"));
    }

    #[test]
    fn missing_result_file_reads_none() {
        let dir = tempdir().unwrap();
        assert_eq!(
            UpdateResult::load(&dir.path().join("update_result.json")).unwrap(),
            None
        );
    }
}
