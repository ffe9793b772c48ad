//! ---
//! renew_section: "01-core-functionality"
//! renew_subsection: "binary"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Binary entrypoint for the Renew daemon."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use renew_common::logging::init_tracing;
use renew_common::{AppConfig, LogFormat};
use renew_core::{
    Applier, ApplierSettings, FileOutcome, HistoryStore, ProcessLauncher, RuntimeContext,
    SystemdServiceControl, UpdateOrchestrator, UpdateResult,
};
use renew_metrics::{new_registry, spawn_http_server, DaemonMetrics, UpdateMetrics};
use renew_versioning::{ResolvedUpdate, VersionInfo, VersionResolver};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod unit;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Renew self-updating service daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", global = true, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the update service (default)")]
    Run,
    #[command(about = "Run in the foreground with console output; press Enter to stop")]
    Debug,
    #[command(about = "Register the daemon with the service manager")]
    Install(unit::InstallArgs),
    #[command(about = "Remove the daemon from the service manager")]
    Uninstall(unit::UninstallArgs),
    #[command(about = "Check the version endpoint once and print the result")]
    Check,
    #[command(name = "applyupdate", about = "Apply a handed-off update (invoked by the daemon)")]
    ApplyUpdate(ApplyUpdateArgs),
}

#[derive(Debug, Args)]
struct ApplyUpdateArgs {
    /// Transfer record written by the daemon before it stopped.
    #[arg(value_name = "TRANSFER_RECORD")]
    record: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let version = VersionInfo::current();
    if cli.version {
        println!("{}", version.extended());
        return Ok(());
    }

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("/etc/renew/renewd.toml"));
    candidates.push(PathBuf::from("configs/renewd.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_or_default(&candidates)?;
    let load_duration = load_started.elapsed();
    let config = loaded.config;
    let config_path = loaded.source;

    let command = cli.command.unwrap_or(Commands::Run);
    let mut logging = config.logging.clone();
    let log_name = match &command {
        Commands::ApplyUpdate(_) => format!("{}-applier", config.service.name),
        Commands::Debug => {
            logging.format = LogFormat::Pretty;
            config.service.name.clone()
        }
        _ => config.service.name.clone(),
    };
    config.paths.ensure_dirs()?;
    init_tracing(&log_name, &config.paths.log_dir(), &logging)?;
    match &config_path {
        Some(path) => info!(config = %path.display(), "configuration loaded"),
        None => warn!("no configuration file found; using built-in defaults"),
    }

    match command {
        Commands::Run => run_daemon(config, config_path, version, load_duration, false).await,
        Commands::Debug => run_daemon(config, config_path, version, load_duration, true).await,
        Commands::Install(args) => unit::install(&config, config_path.as_deref(), &args),
        Commands::Uninstall(args) => unit::uninstall(&config, &args),
        Commands::Check => check_once(&config).await,
        Commands::ApplyUpdate(args) => apply_update(&config, &args.record).await,
    }
}

async fn run_daemon(
    config: AppConfig,
    config_path: Option<PathBuf>,
    version: VersionInfo,
    load_duration: Duration,
    interactive: bool,
) -> Result<()> {
    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.inc_start();
    daemon_metrics.set_build_info(&version.semver, &version.git_sha, &version.profile);
    let update_metrics = UpdateMetrics::new(registry.clone())?;

    let metrics_server = if config.metrics.enabled {
        let server = spawn_http_server(registry, config.metrics.listen)?;
        info!(address = %server.addr(), "metrics exporter enabled");
        Some(server)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    report_last_result(&config.paths.result_file());

    let runtime = RuntimeContext::detect(&config)?;
    info!(banner = %version.banner(), current = %runtime.current_version, "daemon starting");
    let launcher = Arc::new(ProcessLauncher::new(
        config.update.launch,
        &config.service.name,
        config_path,
    ));
    let orchestrator = Arc::new(UpdateOrchestrator::from_config(
        &config,
        runtime,
        Arc::new(SystemdServiceControl::default()),
        launcher,
        update_metrics,
    )?);

    let cancel = CancellationToken::new();
    let mut worker = tokio::spawn(orchestrator.clone().run(cancel.clone()));
    if interactive {
        println!("{} running interactively; press Enter to stop.", version.banner());
    }

    let worker_finished = tokio::select! {
        _ = shutdown_signal(interactive) => {
            info!("shutdown requested");
            false
        }
        joined = &mut worker => {
            if let Err(err) = joined {
                error!(error = %err, "update orchestrator task failed");
            }
            true
        }
    };
    cancel.cancel();
    if !worker_finished {
        if let Err(err) = worker.await {
            error!(error = %err, "update orchestrator task failed");
        }
    }
    if orchestrator.handed_off() {
        // Exit even if the service manager never delivers the stop, so the
        // applier can take over the installation.
        info!("update handed off; exiting to release installation files");
        if interactive {
            println!("Update handed off to the applier; exiting.");
        }
    }

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    info!("daemon stopped");
    Ok(())
}

fn report_last_result(path: &Path) {
    match UpdateResult::load(path) {
        Ok(Some(result)) if result.success => info!(
            completed = %result.completion_time,
            "previous update completed successfully"
        ),
        Ok(Some(result)) => warn!(
            completed = %result.completion_time,
            error = result.error_message.as_deref().unwrap_or("unknown"),
            "previous update failed"
        ),
        Ok(None) => {}
        Err(err) => warn!(path = %path.display(), error = %err, "unable to read previous update result"),
    }
}

async fn check_once(config: &AppConfig) -> Result<()> {
    let runtime = RuntimeContext::detect(config)?;
    let resolver = VersionResolver::new(
        config.update.endpoint.clone(),
        config.update.check_timeout,
        &config.update.user_agent,
    )?;
    let descriptor = resolver
        .fetch_descriptor()
        .await
        .with_context(|| format!("version check against {} failed", resolver.endpoint()))?;
    let resolved = ResolvedUpdate::new(descriptor, runtime.current_version);
    info!(
        current = %resolved.current,
        latest = %resolved.target(),
        newer = resolved.is_newer,
        "update check complete"
    );
    println!(
        "Current: {}\nLatest: {}\nUpdate Available: {}\nApplicable: {}\nMandatory: {}",
        resolved.current,
        resolved.target(),
        resolved.is_newer,
        resolved.is_applicable(),
        resolved.descriptor.is_mandatory
    );
    if !resolved.descriptor.release_notes.is_empty() {
        println!("Release Notes:\n{}", resolved.descriptor.release_notes);
    }
    Ok(())
}

async fn apply_update(config: &AppConfig, record: &Path) -> Result<()> {
    info!(record = %record.display(), "applier starting");
    let applier = Applier::new(
        Arc::new(SystemdServiceControl::default()),
        HistoryStore::new(config.paths.history_file(), config.update.history_count),
        ApplierSettings {
            grace_period: config.update.apply_grace_period,
            result_file: config.paths.result_file(),
            fallback_service: config.service.name.clone(),
        },
    );
    let report = applier.run(record).await;
    if report.result.success {
        info!("update applied");
        return Ok(());
    }
    let message = report
        .result
        .error_message
        .unwrap_or_else(|| "unknown error".to_owned());
    match report.files {
        FileOutcome::RollbackFailed { .. } => bail!("update failed and rollback failed: {message}"),
        _ => bail!("update failed: {message}"),
    }
}

async fn shutdown_signal(interactive: bool) {
    if interactive {
        tokio::select! {
            _ = terminate_or_interrupt() => {},
            _ = enter_pressed() => {},
        }
    } else {
        terminate_or_interrupt().await;
    }
}

async fn terminate_or_interrupt() {
    #[cfg(unix)]
    {
        tokio::select! {
            _ = ctrl_c() => {},
            _ = terminate() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

async fn ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(?err, "failed to install Ctrl+C handler");
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(err) => warn!(?err, "failed to install SIGTERM handler"),
    }
}

async fn enter_pressed() {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    match lines.next_line().await {
        Ok(Some(_)) => {}
        // Closed stdin must not stop the daemon.
        Ok(None) | Err(_) => std::future::pending::<()>().await,
    }
}
