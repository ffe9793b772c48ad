//! ---
//! renew_section: "01-core-functionality"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Cleanup of old downloads, staging, and backups."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use renew_common::{AppConfig, UpdateConfig};

use crate::backup::BACKUP_PREFIX;
use crate::fetcher::DOWNLOAD_PREFIX;
use crate::fsutil;
use crate::staging::STAGING_PREFIX;

/// How many artifacts of each kind survive a cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub downloads: usize,
    pub staging: usize,
    pub backups: usize,
}

impl RetentionPolicy {
    pub fn from_config(update: &UpdateConfig) -> Self {
        Self {
            downloads: update.history_count,
            // The package just handed off must survive until the applier runs.
            staging: 1,
            backups: update.backup_retention,
        }
    }
}

/// Paths removed by one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub downloads: Vec<PathBuf>,
    pub staging: Vec<PathBuf>,
    pub backups: Vec<PathBuf>,
}

impl RetentionReport {
    pub fn total(&self) -> usize {
        self.downloads.len() + self.staging.len() + self.backups.len()
    }
}

/// Applies a [`RetentionPolicy`] to the update working directories.
#[derive(Debug, Clone)]
pub struct Retention {
    policy: RetentionPolicy,
    download_dir: PathBuf,
    staging_dir: PathBuf,
    backup_dir: PathBuf,
}

impl Retention {
    pub fn new(
        policy: RetentionPolicy,
        download_dir: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            policy,
            download_dir: download_dir.into(),
            staging_dir: staging_dir.into(),
            backup_dir: backup_dir.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            RetentionPolicy::from_config(&config.update),
            config.paths.download_dir(),
            config.paths.staging_dir(),
            config.paths.backup_dir(),
        )
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Prune every directory. Failures are logged and never abort the pass.
    pub fn enforce(&self) -> RetentionReport {
        let report = RetentionReport {
            downloads: prune(&self.download_dir, DOWNLOAD_PREFIX, self.policy.downloads),
            staging: prune(&self.staging_dir, STAGING_PREFIX, self.policy.staging),
            backups: prune(&self.backup_dir, BACKUP_PREFIX, self.policy.backups),
        };
        if report.total() > 0 {
            info!(
                downloads = report.downloads.len(),
                staging = report.staging.len(),
                backups = report.backups.len(),
                "retention cleanup removed old artifacts"
            );
        }
        report
    }
}

fn prune(dir: &Path, prefix: &str, keep: usize) -> Vec<PathBuf> {
    match fsutil::prune_oldest(dir, prefix, keep) {
        Ok(removed) => removed,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "retention cleanup failed");
            Vec::new()
        }
    }
}
