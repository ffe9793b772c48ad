//! ---
//! renew_section: "01-core-functionality"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Host service manager control."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::UpdateError;

/// Stops and starts the managed service through the host service manager.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    /// Ask the manager to stop `service`. May return before it has exited.
    async fn stop(&self, service: &str) -> Result<(), UpdateError>;
    /// Start `service` and wait for the manager to accept the request.
    async fn start(&self, service: &str) -> Result<(), UpdateError>;
}

/// [`ServiceControl`] backed by `systemctl`.
#[derive(Debug, Clone)]
pub struct SystemdServiceControl {
    systemctl: PathBuf,
}

impl Default for SystemdServiceControl {
    fn default() -> Self {
        Self {
            systemctl: PathBuf::from("systemctl"),
        }
    }
}

impl SystemdServiceControl {
    pub fn with_binary(systemctl: impl Into<PathBuf>) -> Self {
        Self {
            systemctl: systemctl.into(),
        }
    }

    async fn run(&self, service: &str, action: &'static str, args: &[&str]) -> Result<(), UpdateError> {
        debug!(binary = %self.systemctl.display(), ?args, service, "invoking service manager");
        let output = Command::new(&self.systemctl)
            .args(args)
            .arg(service)
            .output()
            .await
            .map_err(|err| UpdateError::ServiceControl {
                service: service.to_owned(),
                action,
                reason: err.to_string(),
            })?;
        if output.status.success() {
            info!(service, action, "service manager accepted request");
            Ok(())
        } else {
            Err(UpdateError::ServiceControl {
                service: service.to_owned(),
                action,
                reason: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            })
        }
    }
}

#[async_trait]
impl ServiceControl for SystemdServiceControl {
    async fn stop(&self, service: &str) -> Result<(), UpdateError> {
        // Non-blocking: the caller is the unit being stopped.
        self.run(service, "stop", &["stop", "--no-block"]).await
    }

    async fn start(&self, service: &str) -> Result<(), UpdateError> {
        self.run(service, "start", &["start"]).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_exit_is_success() {
        let control = SystemdServiceControl::with_binary("true");
        control.stop("renewd").await.unwrap();
        control.start("renewd").await.unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported() {
        let control = SystemdServiceControl::with_binary("false");
        let err = control.start("renewd").await.unwrap_err();
        assert!(matches!(
            err,
            UpdateError::ServiceControl { action: "start", .. }
        ));
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let control = SystemdServiceControl::with_binary("/nonexistent/systemctl");
        assert!(control.stop("renewd").await.is_err());
    }
}
