//! ---
//! renew_section: "01-core-functionality"
//! renew_subsection: "binary"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Service manager registration for the Renew daemon."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::Args;
use renew_common::AppConfig;
use tracing::{info, warn};

const DEFAULT_UNIT_DIR: &str = "/etc/systemd/system";

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// Directory the unit file is written to.
    #[arg(long = "unit-dir", value_name = "DIR", default_value = DEFAULT_UNIT_DIR)]
    unit_dir: PathBuf,

    /// Write the unit without enabling or starting it.
    #[arg(long = "no-enable")]
    no_enable: bool,
}

#[derive(Debug, Args)]
pub struct UninstallArgs {
    #[arg(long = "unit-dir", value_name = "DIR", default_value = DEFAULT_UNIT_DIR)]
    unit_dir: PathBuf,
}

fn unit_file(unit_dir: &Path, service_name: &str) -> PathBuf {
    unit_dir.join(format!("{service_name}.service"))
}

/// Unit text for the daemon.
///
/// `KillMode=process` keeps a detached applier alive when the unit stops.
pub fn render_unit(config: &AppConfig, executable: &Path, config_path: Option<&Path>) -> String {
    let mut exec_start = executable.display().to_string();
    if let Some(path) = config_path {
        exec_start.push_str(&format!(" --config {}", path.display()));
    }
    exec_start.push_str(" run");

    format!(
        "[Unit]\n\
         Description={name} self-updating service\n\
         After=network-online.target\n\
         Wants=network-online.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         WorkingDirectory={workdir}\n\
         ExecStart={exec_start}\n\
         Restart=on-failure\n\
         RestartSec=10\n\
         KillMode=process\n\
         StandardOutput=journal\n\
         StandardError=journal\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        name = config.service.name,
        workdir = config.service.install_dir.display(),
    )
}

pub fn install(config: &AppConfig, config_path: Option<&Path>, args: &InstallArgs) -> Result<()> {
    let executable = config.service.install_dir.join(&config.service.executable);
    if !executable.exists() {
        warn!(
            executable = %executable.display(),
            "installed executable not found; unit will fail until it is deployed"
        );
    }
    let config_path = config_path
        .map(|path| {
            path.canonicalize()
                .with_context(|| format!("unable to resolve {}", path.display()))
        })
        .transpose()?;

    fs::create_dir_all(&args.unit_dir)
        .with_context(|| format!("unable to create {}", args.unit_dir.display()))?;
    let path = unit_file(&args.unit_dir, &config.service.name);
    fs::write(&path, render_unit(config, &executable, config_path.as_deref()))
        .with_context(|| format!("failed to write unit {}", path.display()))?;
    info!(unit = %path.display(), "service unit written");
    println!("Installed {}", path.display());

    if args.no_enable {
        return Ok(());
    }
    systemctl(&["daemon-reload"])?;
    systemctl(&["enable", "--now", &config.service.name])?;
    println!("Service {} enabled and started.", config.service.name);
    Ok(())
}

pub fn uninstall(config: &AppConfig, args: &UninstallArgs) -> Result<()> {
    let name = &config.service.name;
    if let Err(err) = systemctl(&["disable", "--now", name]) {
        warn!(service = %name, error = %err, "unable to disable service; continuing");
    }
    let path = unit_file(&args.unit_dir, name);
    match fs::remove_file(&path) {
        Ok(()) => info!(unit = %path.display(), "service unit removed"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(unit = %path.display(), "service unit already absent")
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to remove {}", path.display()))
        }
    }
    systemctl(&["daemon-reload"])?;
    println!("Service {name} uninstalled.");
    Ok(())
}

fn systemctl(args: &[&str]) -> Result<()> {
    let status = Command::new("systemctl")
        .args(args)
        .status()
        .with_context(|| format!("failed to run systemctl {}", args.join(" ")))?;
    if !status.success() {
        bail!("systemctl {} exited with {status}", args.join(" "));
    }
    Ok(())
}
