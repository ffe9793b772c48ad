//! ---
//! renew_section: "01-core-functionality"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Transfer record and launch of the out-of-process applier."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use renew_common::LaunchStrategy;
use renew_versioning::ReleaseVersion;

use crate::error::{IoResultExt, UpdateError};
use crate::fsutil;

/// Subcommand the applier executable is started with.
pub const APPLY_SUBCOMMAND: &str = "applyupdate";

/// Environment variable carrying the configuration path into the applier.
pub const CONFIG_ENV: &str = renew_common::AppConfig::ENV_CONFIG_PATH;

/// Everything the applier needs, written by the primary before it stops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub service_name: String,
    /// Staged package root.
    pub source_path: PathBuf,
    /// Live installation directory.
    pub target_path: PathBuf,
    pub backup_path: PathBuf,
    pub version: ReleaseVersion,
    pub previous_version: ReleaseVersion,
    pub update_time: DateTime<Utc>,
    #[serde(default)]
    pub release_notes: String,
}

/// A transfer record that cannot be trusted.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("unable to read transfer record {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("transfer record {path} is malformed: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("transfer record {path} is invalid: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

impl TransferRecord {
    /// Read and validate the record at `path`.
    pub fn load(path: &Path) -> Result<Self, RecordError> {
        let body = fs::read(path).map_err(|source| RecordError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let record: Self = serde_json::from_slice(&body).map_err(|source| RecordError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        record.validate().map_err(|reason| RecordError::Invalid {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(record)
    }

    pub fn write(&self, path: &Path) -> Result<(), UpdateError> {
        fsutil::write_json_atomic(path, self)
    }

    fn validate(&self) -> Result<(), String> {
        if self.service_name.trim().is_empty() {
            return Err("serviceName is empty".to_owned());
        }
        for (field, value) in [
            ("sourcePath", &self.source_path),
            ("targetPath", &self.target_path),
            ("backupPath", &self.backup_path),
        ] {
            if !value.is_absolute() {
                return Err(format!("{field} '{}' is not absolute", value.display()));
            }
        }
        Ok(())
    }
}

/// Starts the applier so that it outlives the primary process.
#[async_trait]
pub trait ApplierLauncher: Send + Sync {
    async fn launch(&self, applier: &Path, record: &Path) -> Result<(), UpdateError>;
}

/// Launches the applier as an operating-system process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    strategy: LaunchStrategy,
    unit_prefix: String,
    config_path: Option<PathBuf>,
}

impl ProcessLauncher {
    /// `config_path` is forwarded so the applier reads the same configuration.
    pub fn new(strategy: LaunchStrategy, service_name: &str, config_path: Option<PathBuf>) -> Self {
        Self {
            strategy,
            unit_prefix: format!("{service_name}-applier"),
            config_path,
        }
    }

    async fn launch_transient_unit(&self, applier: &Path, record: &Path) -> Result<(), UpdateError> {
        let unit = format!("{}-{}", self.unit_prefix, Utc::now().format("%Y%m%d%H%M%S"));
        let mut command = tokio::process::Command::new("systemd-run");
        command
            .arg(format!("--unit={unit}"))
            .arg("--collect")
            .arg("--quiet");
        if let Some(config) = &self.config_path {
            command.arg(format!("--setenv={CONFIG_ENV}={}", config.display()));
        }
        let output = command
            .arg(applier)
            .arg(APPLY_SUBCOMMAND)
            .arg(record)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| launch_error(applier, err.to_string()))?;
        if !output.status.success() {
            return Err(launch_error(
                applier,
                format!(
                    "systemd-run exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        info!(unit = %unit, applier = %applier.display(), "applier started as transient unit");
        Ok(())
    }

    fn launch_detached(&self, applier: &Path, record: &Path) -> Result<(), UpdateError> {
        let mut command = std::process::Command::new(applier);
        command
            .arg(APPLY_SUBCOMMAND)
            .arg(record)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(config) = &self.config_path {
            command.env(CONFIG_ENV, config);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let child = command
            .spawn()
            .map_err(|err| launch_error(applier, err.to_string()))?;
        info!(pid = child.id(), applier = %applier.display(), "applier started detached");
        // Never awaited: the applier must keep running after this process exits.
        drop(child);
        Ok(())
    }
}

#[async_trait]
impl ApplierLauncher for ProcessLauncher {
    async fn launch(&self, applier: &Path, record: &Path) -> Result<(), UpdateError> {
        match self.strategy {
            LaunchStrategy::SystemdRun => self.launch_transient_unit(applier, record).await,
            LaunchStrategy::Detached => self.launch_detached(applier, record),
        }
    }
}

fn launch_error(applier: &Path, reason: String) -> UpdateError {
    UpdateError::Launch {
        path: applier.to_path_buf(),
        reason,
    }
}

/// Prepares and performs the handoff to the applier.
#[derive(Clone)]
pub struct HandoffCoordinator {
    record_path: PathBuf,
    applier_path: PathBuf,
    launcher: Arc<dyn ApplierLauncher>,
}

impl std::fmt::Debug for HandoffCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandoffCoordinator")
            .field("record_path", &self.record_path)
            .field("applier_path", &self.applier_path)
            .finish_non_exhaustive()
    }
}

impl HandoffCoordinator {
    pub fn new(
        record_path: impl Into<PathBuf>,
        applier_path: impl Into<PathBuf>,
        launcher: Arc<dyn ApplierLauncher>,
    ) -> Self {
        Self {
            record_path: record_path.into(),
            applier_path: applier_path.into(),
            launcher,
        }
    }

    /// Default applier location: beside the installation directory, never inside it.
    pub fn default_applier_path(install_dir: &Path, service_name: &str) -> PathBuf {
        let file_name = applier_file_name(service_name);
        match install_dir.parent() {
            Some(parent) => parent.join(file_name),
            None => install_dir.join(file_name),
        }
    }

    pub fn record_path(&self) -> &Path {
        &self.record_path
    }

    pub fn applier_path(&self) -> &Path {
        &self.applier_path
    }

    /// Refresh the applier executable at its fixed location.
    ///
    /// A dedicated applier shipped inside the installation wins; otherwise the
    /// running executable is copied. Either way the copy lives outside the
    /// directory the applier will overwrite.
    pub fn ensure_applier(
        &self,
        install_dir: &Path,
        current_exe: &Path,
    ) -> Result<PathBuf, UpdateError> {
        let dedicated = self
            .applier_path
            .file_name()
            .map(|name| install_dir.join(name))
            .filter(|candidate| candidate.is_file());
        let source = dedicated.as_deref().unwrap_or(current_exe);
        if let Some(parent) = self.applier_path.parent() {
            fs::create_dir_all(parent)
                .io_context(|| format!("unable to create {}", parent.display()))?;
        }
        let staging = self.applier_path.with_extension("renew-tmp");
        fs::copy(source, &staging).io_context(|| {
            format!(
                "unable to copy applier {} to {}",
                source.display(),
                staging.display()
            )
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&staging, fs::Permissions::from_mode(0o755))
                .io_context(|| format!("unable to mark {} executable", staging.display()))?;
        }
        fs::rename(&staging, &self.applier_path)
            .io_context(|| format!("unable to install applier {}", self.applier_path.display()))?;
        debug!(source = %source.display(), applier = %self.applier_path.display(), "applier refreshed");
        Ok(self.applier_path.clone())
    }

    /// Persist the record, refresh the applier, and launch it.
    pub async fn hand_off(
        &self,
        record: &TransferRecord,
        current_exe: &Path,
    ) -> Result<PathBuf, UpdateError> {
        record.write(&self.record_path)?;
        let applier = self.ensure_applier(&record.target_path, current_exe)?;
        self.launcher.launch(&applier, &self.record_path).await?;
        info!(
            record = %self.record_path.display(),
            applier = %applier.display(),
            version = %record.version,
            "handoff launched"
        );
        Ok(self.record_path.clone())
    }
}

fn applier_file_name(service_name: &str) -> String {
    if cfg!(windows) {
        format!("{service_name}-applier.exe")
    } else {
        format!("{service_name}-applier")
    }
}
