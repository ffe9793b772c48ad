//! ---
//! renew_section: "03-persistence-logging"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Prometheus registry, update-cycle counters and the /metrics exporter for renewd."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::response::{IntoResponse, Response};
use axum::Router;
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    let addr = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint. Returns `text/plain` metrics even on large registries.
async fn metrics_handler(registry: SharedRegistry) -> Response {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "renewd_starts_total",
            "Total number of times the Renew daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "renewd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "renewd_build_info",
                "Build metadata for the running daemon binary",
            ),
            &["version", "git_sha", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, git_sha: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, git_sha, profile])
            .set(1.0);
    }
}

/// Counters describing update check cycles and their outcomes.
#[derive(Clone, Debug)]
pub struct UpdateMetrics {
    registry: SharedRegistry,
    checks_total: IntCounter,
    cycle_outcomes: IntCounterVec,
    step_failures: IntCounterVec,
    downloaded_bytes: IntCounter,
    in_progress: IntGauge,
}

impl UpdateMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let checks_total = IntCounter::with_opts(Opts::new(
            "renew_update_checks_total",
            "Number of timer ticks that reached the update check",
        ))?;
        registry.register(Box::new(checks_total.clone()))?;

        let cycle_outcomes = IntCounterVec::new(
            Opts::new(
                "renew_update_cycles_total",
                "Completed update cycles by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(cycle_outcomes.clone()))?;

        let step_failures = IntCounterVec::new(
            Opts::new(
                "renew_update_step_failures_total",
                "Failed update attempts by the step that failed",
            ),
            &["step"],
        )?;
        registry.register(Box::new(step_failures.clone()))?;

        let downloaded_bytes = IntCounter::with_opts(Opts::new(
            "renew_update_downloaded_bytes_total",
            "Bytes written to update artifacts",
        ))?;
        registry.register(Box::new(downloaded_bytes.clone()))?;

        let in_progress = IntGauge::with_opts(Opts::new(
            "renew_update_in_progress",
            "Indicator (0/1) whether an update attempt is active",
        ))?;
        registry.register(Box::new(in_progress.clone()))?;

        Ok(Self {
            registry,
            checks_total,
            cycle_outcomes,
            step_failures,
            downloaded_bytes,
            in_progress,
        })
    }

    /// Metrics bound to a private registry, for callers that export nothing.
    pub fn detached() -> Result<Self> {
        Self::new(new_registry())
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_check(&self) {
        self.checks_total.inc();
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.cycle_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn record_step_failure(&self, step: &str) {
        self.step_failures.with_label_values(&[step]).inc();
    }

    pub fn add_downloaded_bytes(&self, bytes: u64) {
        self.downloaded_bytes.inc_by(bytes);
    }

    pub fn set_in_progress(&self, active: bool) {
        self.in_progress.set(if active { 1 } else { 0 });
    }

    pub fn outcome_count(&self, outcome: &str) -> u64 {
        self.cycle_outcomes.with_label_values(&[outcome]).get()
    }
}

pub use prometheus;
