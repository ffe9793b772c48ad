//! ---
//! renew_section: "01-core-functionality"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Timestamped snapshots of the live installation."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{IoResultExt, UpdateError};
use crate::fsutil::{self, TreeStats};

/// Prefix of backup directories; retention matches on it.
pub const BACKUP_PREFIX: &str = "backup_";

/// A verified copy of the installation taken before an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSnapshot {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub stats: TreeStats,
}

/// Creates, restores, and prunes installation backups.
#[derive(Debug, Clone)]
pub struct BackupManager {
    root: PathBuf,
}

impl BackupManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy the whole of `install_dir` into a new `backup_{timestamp}` directory.
    ///
    /// The copy is compared against the source by file count and total bytes;
    /// an incomplete snapshot is removed and reported as an error.
    pub fn create(&self, install_dir: &Path) -> Result<BackupSnapshot, UpdateError> {
        if !install_dir.is_dir() {
            return Err(UpdateError::MissingInstallation(install_dir.to_path_buf()));
        }
        fs::create_dir_all(&self.root)
            .io_context(|| format!("unable to create backup root {}", self.root.display()))?;
        let path = fsutil::timestamped_path(&self.root, BACKUP_PREFIX, None);
        let created_at = Utc::now();
        let expected = fsutil::tree_stats(install_dir)?;
        debug!(install_dir = %install_dir.display(), backup = %path.display(), %expected, "creating backup");

        let copied = fsutil::copy_dir(install_dir, &path).and_then(|_| fsutil::tree_stats(&path));
        let actual = match copied {
            Ok(actual) => actual,
            Err(err) => {
                let _ = fsutil::remove_entry(&path);
                return Err(err);
            }
        };
        if actual != expected {
            let _ = fsutil::remove_entry(&path);
            return Err(UpdateError::IncompleteBackup {
                path,
                expected,
                actual,
            });
        }
        info!(path = %path.display(), stats = %actual, "backup created");
        Ok(BackupSnapshot {
            path,
            created_at,
            stats: actual,
        })
    }

    /// Make `install_dir` content-equal to the snapshot at `backup`.
    pub fn restore(backup: &Path, install_dir: &Path) -> Result<TreeStats, UpdateError> {
        let stats = fsutil::restore_tree(backup, install_dir)?;
        info!(backup = %backup.display(), install_dir = %install_dir.display(), %stats, "installation restored from backup");
        Ok(stats)
    }

    /// Backups on disk, oldest first.
    pub fn list(&self) -> Result<Vec<PathBuf>, UpdateError> {
        fsutil::list_prefixed(&self.root, BACKUP_PREFIX)
    }

    /// Keep only the newest `retain` backups.
    pub fn prune(&self, retain: usize) -> Result<Vec<PathBuf>, UpdateError> {
        fsutil::prune_oldest(&self.root, BACKUP_PREFIX, retain.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn install(root: &Path) -> PathBuf {
        let dir = root.join("install");
        fs::create_dir_all(dir.join("lib")).unwrap();
        fs::write(dir.join("renewd"), b"binary-v1").unwrap();
        fs::write(dir.join("renewd.toml"), b"config").unwrap();
        fs::write(dir.join("lib/libfoo.so"), b"library").unwrap();
        dir
    }

    #[test]
    fn backup_is_complete_copy() {
        let dir = tempdir().unwrap();
        let install_dir = install(dir.path());
        let manager = BackupManager::new(dir.path().join("backups"));
        let snapshot = manager.create(&install_dir).unwrap();
        assert_eq!(snapshot.stats.files, 3);
        assert_eq!(snapshot.stats, fsutil::tree_stats(&install_dir).unwrap());
        assert_eq!(
            fs::read(snapshot.path.join("lib/libfoo.so")).unwrap(),
            b"library"
        );
        assert!(snapshot
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(BACKUP_PREFIX));
    }

    #[test]
    fn missing_installation_is_rejected() {
        let dir = tempdir().unwrap();
        let manager = BackupManager::new(dir.path().join("backups"));
        let result = manager.create(&dir.path().join("absent"));
        assert!(matches!(result, Err(UpdateError::MissingInstallation(_))));
    }

    #[test]
    fn restore_returns_installation_to_snapshot() {
        let dir = tempdir().unwrap();
        let install_dir = install(dir.path());
        let manager = BackupManager::new(dir.path().join("backups"));
        let snapshot = manager.create(&install_dir).unwrap();

        fs::write(install_dir.join("renewd"), b"binary-v2").unwrap();
        fs::write(install_dir.join("extra"), b"new").unwrap();
        BackupManager::restore(&snapshot.path, &install_dir).unwrap();

        assert_eq!(fs::read(install_dir.join("renewd")).unwrap(), b"binary-v1");
        assert!(!install_dir.join("extra").exists());
    }

    #[test]
    fn prune_keeps_requested_number() {
        let dir = tempdir().unwrap();
        let install_dir = install(dir.path());
        let manager = BackupManager::new(dir.path().join("backups"));
        for _ in 0..4 {
            manager.create(&install_dir).unwrap();
        }
        assert_eq!(manager.list().unwrap().len(), 4);
        let removed = manager.prune(2).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(manager.list().unwrap().len(), 2);
    }
}
