//! ---
//! renew_section: "01-core-functionality"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Update cycle state machine: check, download, back up, stage, verify and hand off."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use renew_common::AppConfig;
use renew_logging::{log_update_event, renew_info, renew_warn, UpdateContext, UpdateEventOutcome};
use renew_metrics::UpdateMetrics;
use renew_versioning::{
    ReleaseVersion, ResolveOutcome, ResolvedUpdate, VersionInfo, VersionResolver,
};

use crate::backup::BackupManager;
use crate::error::UpdateError;
use crate::fetcher::{ArtifactExpectation, ArtifactFetcher};
use crate::handoff::{ApplierLauncher, HandoffCoordinator, TransferRecord};
use crate::retention::Retention;
use crate::service::ServiceControl;
use crate::staging::PackageStager;
use crate::state::{CycleOutcome, UpdateState, UpdateStep};

/// Process facts the orchestrator cannot read from configuration.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub current_version: ReleaseVersion,
    /// Executable copied to the applier location when the package ships none.
    pub current_exe: PathBuf,
}

impl RuntimeContext {
    /// Running version from `update.current_version` or the build metadata.
    pub fn detect(config: &AppConfig) -> Result<Self> {
        let current_version = match &config.update.current_version {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("invalid update.current_version '{raw}'"))?,
            None => VersionInfo::current()
                .release_version()
                .context("package version is not a dotted release version")?,
        };
        let current_exe =
            std::env::current_exe().context("unable to locate the running executable")?;
        Ok(Self {
            current_version,
            current_exe,
        })
    }
}

/// Drives periodic update checks and everything up to the handoff.
pub struct UpdateOrchestrator {
    service_name: String,
    install_dir: PathBuf,
    runtime: RuntimeContext,
    poll_interval: Duration,
    initial_delay: Duration,
    resolver: VersionResolver,
    fetcher: ArtifactFetcher,
    backups: BackupManager,
    stager: PackageStager,
    handoff: HandoffCoordinator,
    retention: Retention,
    service: Arc<dyn ServiceControl>,
    metrics: UpdateMetrics,
    in_progress: AtomicBool,
    handed_off: AtomicBool,
    state: Mutex<UpdateState>,
}

impl std::fmt::Debug for UpdateOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateOrchestrator")
            .field("service_name", &self.service_name)
            .field("install_dir", &self.install_dir)
            .field("current_version", &self.runtime.current_version)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl UpdateOrchestrator {
    pub fn from_config(
        config: &AppConfig,
        runtime: RuntimeContext,
        service: Arc<dyn ServiceControl>,
        launcher: Arc<dyn ApplierLauncher>,
        metrics: UpdateMetrics,
    ) -> Result<Self> {
        let update = &config.update;
        let resolver = VersionResolver::new(
            update.endpoint.clone(),
            update.check_timeout,
            &update.user_agent,
        )
        .context("failed to construct version resolver")?;
        let fetcher = ArtifactFetcher::new(
            config.paths.download_dir(),
            update.download_timeout,
            update.enforce_checksum,
            &update.user_agent,
        )
        .context("failed to construct artifact fetcher")?;
        let applier_path = update.applier_path.clone().unwrap_or_else(|| {
            HandoffCoordinator::default_applier_path(
                &config.service.install_dir,
                &config.service.name,
            )
        });
        Ok(Self {
            service_name: config.service.name.clone(),
            install_dir: config.service.install_dir.clone(),
            runtime,
            poll_interval: update.poll_interval,
            initial_delay: update.initial_delay,
            resolver,
            fetcher,
            backups: BackupManager::new(config.paths.backup_dir()),
            stager: PackageStager::new(
                config.paths.staging_dir(),
                config.service.required_entries(),
            ),
            handoff: HandoffCoordinator::new(
                config.paths.transfer_record(),
                applier_path,
                launcher,
            ),
            retention: Retention::from_config(config),
            service,
            metrics,
            in_progress: AtomicBool::new(false),
            handed_off: AtomicBool::new(false),
            state: Mutex::new(UpdateState::Idle),
        })
    }

    pub fn state(&self) -> UpdateState {
        *self.state.lock()
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// `true` once an applier has been launched by this process.
    pub fn handed_off(&self) -> bool {
        self.handed_off.load(Ordering::Acquire)
    }

    pub fn current_version(&self) -> ReleaseVersion {
        self.runtime.current_version
    }

    /// Check once and, if warranted, run the attempt through to handoff.
    ///
    /// Never fails: every problem is logged and folded into the outcome.
    /// Returns [`CycleOutcome::Skipped`] without touching the network when
    /// another attempt holds the in-progress flag.
    pub async fn check_for_updates(&self, cancel: &CancellationToken) -> CycleOutcome {
        if self.handed_off() {
            debug!("handoff already performed; ignoring check");
            self.metrics.record_outcome(CycleOutcome::Skipped.label());
            return CycleOutcome::Skipped;
        }
        let Some(_guard) = InProgressGuard::acquire(&self.in_progress) else {
            info!("update attempt already in progress; skipping check");
            self.metrics.record_outcome(CycleOutcome::Skipped.label());
            return CycleOutcome::Skipped;
        };
        self.metrics.inc_check();
        self.metrics.set_in_progress(true);

        let outcome = self.attempt(cancel).await;
        // Only a handoff leaves the machine outside `Idle`; failures carry
        // their step in the outcome.
        if !matches!(outcome, CycleOutcome::HandedOff { .. }) {
            self.set_state(UpdateState::Idle);
        }

        self.metrics.set_in_progress(false);
        self.metrics.record_outcome(outcome.label());
        outcome
    }

    /// Poll until cancelled or until a handoff has been made.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            current = %self.runtime.current_version,
            endpoint = %self.resolver.endpoint(),
            initial_delay_s = self.initial_delay.as_secs(),
            poll_interval_s = self.poll_interval.as_secs(),
            "update orchestrator started"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("update orchestrator cancelled before first check");
                return;
            }
            _ = tokio::time::sleep(self.initial_delay) => {}
        }

        let mut ticker = tokio::time::interval(self.poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let CycleOutcome::HandedOff { version } = self.check_for_updates(&cancel).await {
                info!(%version, "handoff complete; update orchestrator stopping");
                break;
            }
        }
        info!("update orchestrator stopped");
    }

    async fn attempt(&self, cancel: &CancellationToken) -> CycleOutcome {
        self.set_state(UpdateState::CheckingVersion);
        let current = self.runtime.current_version;
        let resolved = match self.resolver.resolve(current, cancel).await {
            ResolveOutcome::Resolved(resolved) => resolved,
            ResolveOutcome::Unavailable => return CycleOutcome::NoUpdate,
            ResolveOutcome::Cancelled => return CycleOutcome::Cancelled,
        };
        if !resolved.is_newer {
            debug!(%current, latest = %resolved.target(), "already up to date");
            return CycleOutcome::NoUpdate;
        }
        if !resolved.meets_minimum() {
            warn!(
                %current,
                latest = %resolved.target(),
                minimum = ?resolved.descriptor.minimum_required_version.map(|v| v.to_string()),
                "newer version requires a newer base install; skipping"
            );
            return CycleOutcome::NoUpdate;
        }
        self.set_state(UpdateState::UpdateFound);

        let attempt_id = Uuid::new_v4().simple().to_string();
        let attempt_id = &attempt_id[..8];
        let version = resolved.target().to_string();
        let previous = current.to_string();
        let context = UpdateContext::new()
            .with_attempt(attempt_id)
            .with_version(&version)
            .with_previous(&previous);
        renew_info!(
            context = context,
            "update available (mandatory: {})",
            resolved.descriptor.is_mandatory
        );

        match self.prepare_and_hand_off(&resolved, &context, cancel).await {
            Ok(()) => CycleOutcome::HandedOff {
                version: version.clone(),
            },
            Err((_, UpdateError::Cancelled)) => {
                renew_info!(context = context, "update attempt cancelled");
                CycleOutcome::Cancelled
            }
            Err((step, err)) => {
                self.set_state(UpdateState::Failed(step));
                self.metrics.record_step_failure(step.as_str());
                log_update_event(
                    Some(&context.clone().with_step(step.as_str())),
                    "update.attempt",
                    &err.to_string(),
                    UpdateEventOutcome::Fault,
                );
                CycleOutcome::Failed {
                    step,
                    error: err.to_string(),
                }
            }
        }
    }

    async fn prepare_and_hand_off(
        &self,
        resolved: &ResolvedUpdate,
        context: &UpdateContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), (UpdateStep, UpdateError)> {
        let descriptor = &resolved.descriptor;

        self.set_state(UpdateState::Downloading);
        let artifact = self
            .fetcher
            .fetch(
                &descriptor.download_url,
                &ArtifactExpectation::from(descriptor),
                cancel,
            )
            .await
            .at(UpdateStep::Downloading)?;
        self.metrics.add_downloaded_bytes(artifact.size);
        self.set_state(UpdateState::Downloaded);
        ensure_live(cancel).at(UpdateStep::Downloading)?;

        self.set_state(UpdateState::BackingUp);
        let backups = self.backups.clone();
        let install_dir = self.install_dir.clone();
        let snapshot = blocking(move || backups.create(&install_dir))
            .await
            .at(UpdateStep::BackingUp)?;
        ensure_live(cancel).at(UpdateStep::BackingUp)?;

        self.set_state(UpdateState::Extracting);
        let stager = self.stager.clone();
        let archive = artifact.path.clone();
        let staged = blocking(move || stager.extract(&archive))
            .await
            .at(UpdateStep::Extracting)?;

        self.set_state(UpdateState::Verifying);
        if let Err(err) = self.stager.verify(&staged).and_then(|()| ensure_live(cancel)) {
            self.stager.discard(&staged);
            return Err((UpdateStep::Verifying, err));
        }

        self.set_state(UpdateState::HandoffPrepared);
        let record = TransferRecord {
            service_name: self.service_name.clone(),
            source_path: staged.path.clone(),
            target_path: self.install_dir.clone(),
            backup_path: snapshot.path.clone(),
            version: resolved.target(),
            previous_version: resolved.current,
            update_time: Utc::now(),
            release_notes: descriptor.release_notes.clone(),
        };
        if let Err(err) = self
            .handoff
            .hand_off(&record, &self.runtime.current_exe)
            .await
        {
            self.stager.discard(&staged);
            return Err((UpdateStep::Handoff, err));
        }
        self.handed_off.store(true, Ordering::Release);
        log_update_event(
            Some(context),
            "update.handoff",
            "applier launched; requesting service stop",
            UpdateEventOutcome::Success,
        );

        self.set_state(UpdateState::Stopping);
        if let Err(err) = self.service.stop(&self.service_name).await {
            renew_warn!(
                context = context,
                "service stop request failed: {err}; applier proceeds after its grace period"
            );
        }

        let retention = self.retention.clone();
        match tokio::task::spawn_blocking(move || retention.enforce()).await {
            Ok(report) => debug!(removed = report.total(), "post-handoff retention complete"),
            Err(err) => warn!(error = %err, "retention task failed"),
        }
        Ok(())
    }

    fn set_state(&self, next: UpdateState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(from = ?*state, to = ?next, "update state transition");
            *state = next;
        }
    }
}

/// Clears the in-progress flag on every exit path, including a dropped future.
struct InProgressGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InProgressGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

trait StepResultExt<T> {
    fn at(self, step: UpdateStep) -> Result<T, (UpdateStep, UpdateError)>;
}

impl<T> StepResultExt<T> for Result<T, UpdateError> {
    fn at(self, step: UpdateStep) -> Result<T, (UpdateStep, UpdateError)> {
        self.map_err(|err| (step, err))
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), UpdateError> {
    if cancel.is_cancelled() {
        Err(UpdateError::Cancelled)
    } else {
        Ok(())
    }
}

async fn blocking<T, F>(task: F) -> Result<T, UpdateError>
where
    F: FnOnce() -> Result<T, UpdateError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task).await?
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;
    use std::net::SocketAddr;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use renew_common::PathsConfig;
    use tempfile::{tempdir, TempDir};
    use url::Url;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use super::*;

    #[derive(Default)]
    struct FakeService {
        stops: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ServiceControl for FakeService {
        async fn stop(&self, service: &str) -> Result<(), UpdateError> {
            self.stops.lock().push(service.to_owned());
            Ok(())
        }

        async fn start(&self, _service: &str) -> Result<(), UpdateError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeLauncher {
        launches: Mutex<Vec<(PathBuf, PathBuf)>>,
    }

    #[async_trait]
    impl ApplierLauncher for FakeLauncher {
        async fn launch(&self, applier: &Path, record: &Path) -> Result<(), UpdateError> {
            self.launches
                .lock()
                .push((applier.to_path_buf(), record.to_path_buf()));
            Ok(())
        }
    }

    struct Harness {
        dir: TempDir,
        config: AppConfig,
        service: Arc<FakeService>,
        launcher: Arc<FakeLauncher>,
        hits: Arc<AtomicUsize>,
    }

    fn package(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    impl Harness {
        async fn new(descriptor_version: &str, minimum: &str, package_bytes: Option<Vec<u8>>) -> Self {
            let dir = tempdir().unwrap();
            let install = dir.path().join("opt/renewd");
            fs::create_dir_all(&install).unwrap();
            fs::write(install.join("renewd"), b"v1").unwrap();
            fs::write(install.join("renewd.toml"), b"cfg-v1").unwrap();
            fs::write(dir.path().join("running-renewd"), b"exe").unwrap();

            let hits = Arc::new(AtomicUsize::new(0));
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr: SocketAddr = listener.local_addr().unwrap();
            let descriptor = serde_json::json!({
                "version": descriptor_version,
                "minimumRequiredVersion": minimum,
                "downloadUrl": format!("http://{addr}/pkg.zip"),
                "releaseNotes": "fixes"
            });
            let counter = hits.clone();
            let app = Router::new()
                .route(
                    "/version.json",
                    get(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let descriptor = descriptor.clone();
                        async move { Json(descriptor) }
                    }),
                )
                .route(
                    "/pkg.zip",
                    get(move || {
                        let body = package_bytes.clone();
                        async move {
                            match body {
                                Some(body) => (StatusCode::OK, body),
                                None => (StatusCode::NOT_FOUND, Vec::new()),
                            }
                        }
                    }),
                );
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            let mut config = AppConfig::default();
            config.service.name = "renewd".to_owned();
            config.service.install_dir = install;
            config.update.endpoint = Url::parse(&format!("http://{addr}/version.json")).unwrap();
            config.update.current_version = Some("1.0.0.0".to_owned());
            config.paths = PathsConfig::rooted_at(dir.path().join("data"));
            config.paths.ensure_dirs().unwrap();
            Self {
                dir,
                config,
                service: Arc::new(FakeService::default()),
                launcher: Arc::new(FakeLauncher::default()),
                hits,
            }
        }

        fn orchestrator(&self) -> UpdateOrchestrator {
            let runtime = RuntimeContext {
                current_version: ReleaseVersion::new(1, 0, 0, 0),
                current_exe: self.dir.path().join("running-renewd"),
            };
            UpdateOrchestrator::from_config(
                &self.config,
                runtime,
                self.service.clone(),
                self.launcher.clone(),
                UpdateMetrics::detached().unwrap(),
            )
            .unwrap()
        }

        fn install_file(&self, name: &str) -> Vec<u8> {
            fs::read(self.config.service.install_dir.join(name)).unwrap()
        }

        fn count(&self, dir: PathBuf) -> usize {
            fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
        }
    }

    fn good_package() -> Vec<u8> {
        package(&[("renewd", b"v2"), ("renewd.toml", b"cfg-v2")])
    }

    #[tokio::test]
    async fn same_version_is_no_update() {
        let harness = Harness::new("1.0.0.0", "", Some(good_package())).await;
        let orchestrator = harness.orchestrator();
        let outcome = orchestrator.check_for_updates(&CancellationToken::new()).await;
        assert_eq!(outcome, CycleOutcome::NoUpdate);
        assert_eq!(orchestrator.state(), UpdateState::Idle);
        assert!(!orchestrator.is_in_progress());
        assert_eq!(harness.count(harness.config.paths.download_dir()), 0);
    }

    #[tokio::test]
    async fn newer_version_is_handed_off() {
        let harness = Harness::new("1.1.0.0", "", Some(good_package())).await;
        let orchestrator = harness.orchestrator();
        let outcome = orchestrator.check_for_updates(&CancellationToken::new()).await;
        assert_eq!(
            outcome,
            CycleOutcome::HandedOff {
                version: "1.1.0.0".to_owned()
            }
        );
        assert!(orchestrator.handed_off());
        assert_eq!(orchestrator.state(), UpdateState::Stopping);

        let record = TransferRecord::load(&harness.config.paths.transfer_record()).unwrap();
        assert_eq!(record.version, ReleaseVersion::new(1, 1, 0, 0));
        assert_eq!(record.previous_version, ReleaseVersion::new(1, 0, 0, 0));
        assert_eq!(fs::read(record.source_path.join("renewd")).unwrap(), b"v2");
        assert_eq!(fs::read(record.backup_path.join("renewd")).unwrap(), b"v1");
        // The live installation is only touched by the applier.
        assert_eq!(harness.install_file("renewd"), b"v1");

        assert_eq!(harness.launcher.launches.lock().len(), 1);
        assert_eq!(harness.service.stops.lock().as_slice(), &["renewd".to_owned()]);
        let applier = harness.launcher.launches.lock()[0].0.clone();
        assert_eq!(fs::read(applier).unwrap(), b"exe");

        let again = orchestrator.check_for_updates(&CancellationToken::new()).await;
        assert_eq!(again, CycleOutcome::Skipped);
    }

    #[tokio::test]
    async fn check_while_in_progress_is_skipped_without_network() {
        let harness = Harness::new("1.1.0.0", "", Some(good_package())).await;
        let orchestrator = harness.orchestrator();
        orchestrator.in_progress.store(true, Ordering::SeqCst);
        let outcome = orchestrator.check_for_updates(&CancellationToken::new()).await;
        assert_eq!(outcome, CycleOutcome::Skipped);
        assert_eq!(harness.hits.load(Ordering::SeqCst), 0);
        assert!(orchestrator.is_in_progress());
    }

    #[tokio::test]
    async fn minimum_version_gate_blocks_download() {
        let harness = Harness::new("2.0.0.0", "1.5.0.0", Some(good_package())).await;
        let orchestrator = harness.orchestrator();
        let outcome = orchestrator.check_for_updates(&CancellationToken::new()).await;
        assert_eq!(outcome, CycleOutcome::NoUpdate);
        assert_eq!(harness.count(harness.config.paths.download_dir()), 0);
    }

    #[tokio::test]
    async fn missing_executable_fails_verification() {
        let package = package(&[("renewd.toml", b"cfg-v2")]);
        let harness = Harness::new("1.1.0.0", "", Some(package)).await;
        let orchestrator = harness.orchestrator();
        let outcome = orchestrator.check_for_updates(&CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            CycleOutcome::Failed {
                step: UpdateStep::Verifying,
                ..
            }
        ));
        assert_eq!(orchestrator.state(), UpdateState::Idle);
        assert!(!orchestrator.is_in_progress());
        assert!(!harness.config.paths.transfer_record().exists());
        assert!(harness.launcher.launches.lock().is_empty());
        assert!(harness.service.stops.lock().is_empty());
        assert_eq!(harness.count(harness.config.paths.staging_dir()), 0);
        assert_eq!(harness.install_file("renewd"), b"v1");
    }

    #[tokio::test]
    async fn backup_failure_leaves_installation_untouched() {
        let mut harness = Harness::new("1.1.0.0", "", Some(good_package())).await;
        let blocked = harness.dir.path().join("backups-on-a-file");
        fs::write(&blocked, b"not a directory").unwrap();
        harness.config.paths.backup_dir = Some(blocked.clone());
        let orchestrator = harness.orchestrator();

        let outcome = orchestrator.check_for_updates(&CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            CycleOutcome::Failed {
                step: UpdateStep::BackingUp,
                ..
            }
        ));
        assert_eq!(orchestrator.state(), UpdateState::Idle);
        assert!(!orchestrator.handed_off());
        assert_eq!(fs::read(&blocked).unwrap(), b"not a directory");
        assert_eq!(harness.count(harness.config.paths.staging_dir()), 0);
        assert!(!harness.config.paths.transfer_record().exists());
        assert!(harness.launcher.launches.lock().is_empty());
        assert!(harness.service.stops.lock().is_empty());
        assert_eq!(harness.install_file("renewd"), b"v1");
        assert_eq!(harness.install_file("renewd.toml"), b"cfg-v1");
        assert_eq!(harness.count(harness.config.service.install_dir.clone()), 2);
    }

    #[tokio::test]
    async fn download_failure_stops_before_backup() {
        let harness = Harness::new("1.1.0.0", "", None).await;
        let orchestrator = harness.orchestrator();
        let outcome = orchestrator.check_for_updates(&CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            CycleOutcome::Failed {
                step: UpdateStep::Downloading,
                ..
            }
        ));
        assert_eq!(harness.count(harness.config.paths.backup_dir()), 0);
        assert_eq!(harness.count(harness.config.paths.download_dir()), 0);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let harness = Harness::new("1.1.0.0", "", Some(good_package())).await;
        let orchestrator = harness.orchestrator();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = orchestrator.check_for_updates(&cancel).await;
        assert_eq!(outcome, CycleOutcome::Cancelled);
        assert!(harness.launcher.launches.lock().is_empty());
    }

    #[tokio::test]
    async fn run_exits_after_handoff() {
        let mut harness = Harness::new("1.1.0.0", "", Some(good_package())).await;
        harness.config.update.initial_delay = Duration::ZERO;
        harness.config.update.poll_interval = Duration::from_millis(20);
        let orchestrator = Arc::new(harness.orchestrator());
        let cancel = CancellationToken::new();
        tokio::time::timeout(Duration::from_secs(10), orchestrator.clone().run(cancel))
            .await
            .expect("run loop finishes after handoff");
        assert!(orchestrator.handed_off());
    }
}
