//! ---
//! renew_section: "01-core-functionality"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Crate-level tests for the applier, backups and update history."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use renew_core::{
    Applier, ApplierSettings, BackupManager, HistoryStore, ServiceControl, TransferRecord,
    UpdateError, UpdateResult,
};
use renew_versioning::ReleaseVersion;
use tempfile::tempdir;

struct NoopService;

#[async_trait]
impl ServiceControl for NoopService {
    async fn stop(&self, _service: &str) -> Result<(), UpdateError> {
        Ok(())
    }

    async fn start(&self, _service: &str) -> Result<(), UpdateError> {
        Ok(())
    }
}

fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (name, body) in files {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }
}

#[tokio::test]
async fn repeated_updates_keep_history_bounded() {
    let dir = tempdir().unwrap();
    let install = dir.path().join("opt/renewd");
    write_tree(&install, &[("renewd", "0"), ("renewd.toml", "cfg")]);
    let backups = BackupManager::new(dir.path().join("backups"));
    let history_file = dir.path().join("update_history.json");
    let applier = Applier::new(
        Arc::new(NoopService),
        HistoryStore::new(&history_file, 3),
        ApplierSettings {
            grace_period: Duration::ZERO,
            result_file: dir.path().join("update_result.json"),
            fallback_service: "renewd".to_owned(),
        },
    );

    for revision in 1..=5u64 {
        let snapshot = backups.create(&install).unwrap();
        let staging = dir.path().join(format!("staging/staged_{revision}"));
        write_tree(&staging, &[("renewd", &revision.to_string()), ("renewd.toml", "cfg")]);
        let record = TransferRecord {
            service_name: "renewd".to_owned(),
            source_path: staging,
            target_path: install.clone(),
            backup_path: snapshot.path,
            version: ReleaseVersion::new(1, 0, 0, revision),
            previous_version: ReleaseVersion::new(1, 0, 0, revision - 1),
            update_time: Utc::now(),
            release_notes: String::new(),
        };
        let record_path = dir.path().join("transfer.json");
        record.write(&record_path).unwrap();
        assert!(applier.run(&record_path).await.result.success);
        backups.prune(2).unwrap();
    }

    assert_eq!(fs::read_to_string(install.join("renewd")).unwrap(), "5");
    let history = HistoryStore::new(&history_file, 3).load();
    let revisions: Vec<u64> = history.iter().map(|r| r.version.revision()).collect();
    assert_eq!(revisions, vec![3, 4, 5]);
    assert_eq!(backups.list().unwrap().len(), 2);
}

#[tokio::test]
async fn missing_record_still_restarts_and_reports() {
    let dir = tempdir().unwrap();
    let applier = Applier::new(
        Arc::new(NoopService),
        HistoryStore::new(dir.path().join("update_history.json"), 10),
        ApplierSettings {
            grace_period: Duration::ZERO,
            result_file: dir.path().join("update_result.json"),
            fallback_service: "renewd".to_owned(),
        },
    );
    let report = applier.run(&dir.path().join("transfer.json")).await;
    assert!(report.restarted);
    assert!(!report.result.success);
    let stored = UpdateResult::load(&dir.path().join("update_result.json"))
        .unwrap()
        .expect("result written");
    assert!(stored.error_message.is_some());
}
