//! ---
//! renew_section: "01-core-functionality"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "TOML configuration model for renewd with defaults and validation."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_service_name() -> String {
    "renewd".to_owned()
}

fn default_install_dir() -> PathBuf {
    PathBuf::from("/opt/renew")
}

fn default_executable() -> String {
    "renewd".to_owned()
}

fn default_config_companion() -> String {
    "renewd.toml".to_owned()
}

fn default_endpoint() -> Url {
    Url::parse("https://updates.renew.invalid/renewd/version.json")
        .expect("valid default update endpoint")
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(3600)
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_check_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_apply_grace_period() -> Duration {
    Duration::from_secs(10)
}

fn default_history_count() -> usize {
    10
}

fn default_backup_retention() -> usize {
    5
}

fn default_enforce_checksum() -> bool {
    true
}

fn default_user_agent() -> String {
    format!("renewd/{}", env!("CARGO_PKG_VERSION"))
}

fn default_data_root() -> PathBuf {
    PathBuf::from("/var/lib/renew")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9464))
}

/// Primary configuration object for the Renew daemon and its applier.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub update: UpdateConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "RENEW_CONFIG";

    /// Load configuration from disk, respecting the `RENEW_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    ///
    /// Fails when neither the environment override nor any candidate exists.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Some(loaded) = Self::try_load(candidates)? {
            return Ok(loaded);
        }
        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Like [`AppConfig::load_with_source`] but falls back to defaults when no file exists.
    pub fn load_or_default<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        match Self::try_load(candidates)? {
            Some(loaded) => Ok(loaded),
            None => {
                let config = AppConfig::default();
                config.validate()?;
                Ok(LoadedAppConfig {
                    config,
                    source: None,
                })
            }
        }
    }

    fn try_load<P: AsRef<Path>>(candidates: &[P]) -> Result<Option<LoadedAppConfig>> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(Some(LoadedAppConfig {
                    config,
                    source: Some(path),
                }));
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(Some(LoadedAppConfig {
                    config,
                    source: Some(path),
                }));
            }
        }
        Ok(None)
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.service.validate()?;
        self.update.validate()?;
        let install_dir = &self.service.install_dir;
        let work_dirs = [
            ("download_dir", self.paths.download_dir()),
            ("backup_dir", self.paths.backup_dir()),
            ("staging_dir", self.paths.staging_dir()),
        ];
        for (index, (label, dir)) in work_dirs.iter().enumerate() {
            if dir.starts_with(install_dir) {
                return Err(anyhow!(
                    "paths.{} {} must not be inside the install directory {}",
                    label,
                    dir.display(),
                    install_dir.display()
                ));
            }
            // Retention prunes each of these by prefix.
            if let Some((other, _)) = work_dirs[..index].iter().find(|(_, seen)| seen == dir) {
                return Err(anyhow!(
                    "paths.{} and paths.{} must be different directories (both {})",
                    other,
                    label,
                    dir.display()
                ));
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Identity and layout of the live installation managed by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Unit name registered with the service manager.
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,
    /// File name of the main executable inside `install_dir`.
    #[serde(default = "default_executable")]
    pub executable: String,
    /// File name of the configuration companion shipped next to the executable.
    #[serde(default = "default_config_companion")]
    pub config_companion: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            install_dir: default_install_dir(),
            executable: default_executable(),
            config_companion: default_config_companion(),
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("service.name cannot be empty"));
        }
        if !self.install_dir.is_absolute() {
            return Err(anyhow!(
                "service.install_dir {} must be an absolute path",
                self.install_dir.display()
            ));
        }
        if self.executable.trim().is_empty() || self.config_companion.trim().is_empty() {
            return Err(anyhow!(
                "service.executable and service.config_companion are required"
            ));
        }
        Ok(())
    }

    /// Entries a staged package must contain before it is trusted.
    pub fn required_entries(&self) -> Vec<String> {
        vec![self.executable.clone(), self.config_companion.clone()]
    }
}

/// How the applier process is detached from the primary process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LaunchStrategy {
    /// New process group with null stdio; works without a service manager.
    Detached,
    /// Transient unit via `systemd-run`, outside the service's cgroup.
    #[default]
    SystemdRun,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: Url,
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde(default = "default_initial_delay")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub initial_delay: Duration,
    #[serde(default = "default_check_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub check_timeout: Duration,
    #[serde(default = "default_download_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub download_timeout: Duration,
    #[serde(default = "default_apply_grace_period")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub apply_grace_period: Duration,
    /// Retention count for history records and downloaded artifacts.
    #[serde(default = "default_history_count")]
    pub history_count: usize,
    #[serde(default = "default_backup_retention")]
    pub backup_retention: usize,
    #[serde(default = "default_enforce_checksum")]
    pub enforce_checksum: bool,
    /// Overrides the version baked in at build time.
    #[serde(default)]
    pub current_version: Option<String>,
    #[serde(default)]
    pub applier_path: Option<PathBuf>,
    #[serde(default)]
    pub launch: LaunchStrategy,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            poll_interval: default_poll_interval(),
            initial_delay: default_initial_delay(),
            check_timeout: default_check_timeout(),
            download_timeout: default_download_timeout(),
            apply_grace_period: default_apply_grace_period(),
            history_count: default_history_count(),
            backup_retention: default_backup_retention(),
            enforce_checksum: default_enforce_checksum(),
            current_version: None,
            applier_path: None,
            launch: LaunchStrategy::default(),
            user_agent: default_user_agent(),
        }
    }
}

impl UpdateConfig {
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.endpoint.scheme(), "http" | "https") {
            return Err(anyhow!(
                "update.endpoint {} must use http or https",
                self.endpoint
            ));
        }
        if self.history_count == 0 {
            return Err(anyhow!("update.history_count must be at least 1"));
        }
        if self.backup_retention == 0 {
            return Err(anyhow!("update.backup_retention must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("update.poll_interval must be non-zero"));
        }
        Ok(())
    }
}

/// Filesystem layout rooted at a common application-data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub history_file: Option<PathBuf>,
    #[serde(default)]
    pub transfer_record: Option<PathBuf>,
    #[serde(default)]
    pub result_file: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self::rooted_at(default_data_root())
    }
}

impl PathsConfig {
    /// Layout with every location derived from `data_root`.
    pub fn rooted_at(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            download_dir: None,
            backup_dir: None,
            staging_dir: None,
            log_dir: None,
            history_file: None,
            transfer_record: None,
            result_file: None,
        }
    }

    fn resolve(&self, value: &Option<PathBuf>, default: &str) -> PathBuf {
        value
            .clone()
            .unwrap_or_else(|| self.data_root.join(default))
    }

    pub fn download_dir(&self) -> PathBuf {
        self.resolve(&self.download_dir, "downloads")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.resolve(&self.backup_dir, "backups")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.resolve(&self.staging_dir, "staging")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.resolve(&self.log_dir, "logs")
    }

    pub fn history_file(&self) -> PathBuf {
        self.resolve(&self.history_file, "update_history.json")
    }

    pub fn transfer_record(&self) -> PathBuf {
        self.resolve(&self.transfer_record, "transfer.json")
    }

    pub fn result_file(&self) -> PathBuf {
        self.resolve(&self.result_file, "update_result.json")
    }

    /// Create every configured directory, including parents of the record files.
    pub fn ensure_dirs(&self) -> Result<()> {
        let mut dirs = vec![
            self.download_dir(),
            self.backup_dir(),
            self.staging_dir(),
            self.log_dir(),
        ];
        for file in [
            self.history_file(),
            self.transfer_record(),
            self.result_file(),
        ] {
            if let Some(parent) = file.parent() {
                dirs.push(parent.to_path_buf());
            }
        }
        for dir in dirs {
            fs::create_dir_all(&dir)
                .with_context(|| format!("unable to create directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}
