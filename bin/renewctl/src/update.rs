//! ---
//! renew_section: "05-networking-external-interfaces"
//! renew_subsection: "binary"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "renewctl update subcommands: check, history and last-result rendering."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use renew_common::AppConfig;
use renew_core::{HistoryRecord, HistoryStore, RuntimeContext, UpdateResult};
use renew_versioning::{ResolvedUpdate, VersionResolver};
use tokio::runtime::Runtime;

/// Top-level update commands.
#[derive(Debug, Subcommand)]
pub enum UpdateCommand {
    /// Perform a read-only version check against the configured endpoint.
    Check(UpdateOptions),
    /// Print the recorded update attempts, oldest first.
    History(HistoryOptions),
    /// Print the result left by the most recent applier run.
    LastResult(UpdateOptions),
}

/// Shared options for update operations.
#[derive(Debug, Args)]
pub struct UpdateOptions {
    /// Path to the configuration file to use for update settings.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct HistoryOptions {
    #[command(flatten)]
    pub options: UpdateOptions,
    /// Emit the raw history records as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Execute the supplied update command.
pub fn run(command: UpdateCommand) -> Result<()> {
    match command {
        UpdateCommand::Check(options) => {
            let config = load_config(&options)?;
            check(&config)
        }
        UpdateCommand::History(history) => {
            let config = load_config(&history.options)?;
            let store = HistoryStore::new(config.paths.history_file(), config.update.history_count);
            let records = store.load();
            if history.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print!("{}", render_history(&records));
            }
            Ok(())
        }
        UpdateCommand::LastResult(options) => {
            let config = load_config(&options)?;
            let path = config.paths.result_file();
            let result = UpdateResult::load(&path)
                .with_context(|| format!("unable to read {}", path.display()))?;
            println!("{}", render_last_result(result.as_ref()));
            Ok(())
        }
    }
}

fn check(config: &AppConfig) -> Result<()> {
    let runtime_context = RuntimeContext::detect(config)?;
    let resolver = VersionResolver::new(
        config.update.endpoint.clone(),
        config.update.check_timeout,
        &config.update.user_agent,
    )?;
    let runtime = Runtime::new()?;
    let descriptor = runtime
        .block_on(resolver.fetch_descriptor())
        .with_context(|| format!("version check against {} failed", resolver.endpoint()))?;
    let resolved = ResolvedUpdate::new(descriptor, runtime_context.current_version);
    println!("{}", render_update_result(&resolved));
    Ok(())
}

fn load_config(options: &UpdateOptions) -> Result<AppConfig> {
    let mut candidates = Vec::new();
    if let Some(path) = &options.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("/etc/renew/renewd.toml"));
    candidates.push(PathBuf::from("configs/renewd.toml"));
    Ok(AppConfig::load_or_default(&candidates)?.config)
}

fn render_update_result(resolved: &ResolvedUpdate) -> String {
    let mut out = format!(
        "Current: {}\nLatest: {}\nUpdate Available: {}",
        resolved.current,
        resolved.target(),
        resolved.is_newer
    );
    if resolved.is_newer && !resolved.meets_minimum() {
        if let Some(minimum) = resolved.descriptor.minimum_required_version {
            out.push_str(&format!("\nBlocked: requires at least {minimum}"));
        }
    }
    if resolved.descriptor.is_mandatory {
        out.push_str("\nMandatory: true");
    }
    out
}

fn render_history(records: &[HistoryRecord]) -> String {
    if records.is_empty() {
        return "No update history recorded\n".to_owned();
    }
    let mut out = String::new();
    for record in records {
        let status = if record.was_successful { "ok" } else { "failed" };
        out.push_str(&format!(
            "{}  {} -> {}  {}",
            record.update_date.format("%Y-%m-%d %H:%M:%S"),
            record.previous_version,
            record.version,
            status
        ));
        if let Some(error) = &record.error_message {
            out.push_str(&format!("  ({error})"));
        }
        out.push('\n');
    }
    out
}

fn render_last_result(result: Option<&UpdateResult>) -> String {
    match result {
        None => "No update has been applied".to_owned(),
        Some(result) if result.success => {
            format!("Last update succeeded at {}", result.completion_time)
        }
        Some(result) => format!(
            "Last update failed at {}: {}",
            result.completion_time,
            result.error_message.as_deref().unwrap_or("unknown error")
        ),
    }
}
