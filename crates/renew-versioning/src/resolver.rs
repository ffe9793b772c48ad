//! ---
//! renew_section: "14-versioning"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Fetches and validates the remote version descriptor over HTTP."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::descriptor::{ResolvedUpdate, VersionDescriptor};
use crate::version::ReleaseVersion;

/// Failure to obtain a usable descriptor from the endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The HTTP client could not be constructed.
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    /// Connection, TLS, timeout, or body read failure.
    #[error("version request to {url} failed: {source}")]
    Request {
        /// Endpoint queried.
        url: Url,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },
    /// The endpoint answered with a non-success status.
    #[error("version endpoint {url} returned {status}")]
    Status {
        /// Endpoint queried.
        url: Url,
        /// Status received.
        status: StatusCode,
    },
    /// The body was not a valid descriptor.
    #[error("malformed version descriptor: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Result of one version check. Only `Resolved` can lead to an update.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    Resolved(ResolvedUpdate),
    /// Network, status, or parse failure; retried on the next tick.
    Unavailable,
    Cancelled,
}

impl ResolveOutcome {
    pub fn resolved(&self) -> Option<&ResolvedUpdate> {
        match self {
            ResolveOutcome::Resolved(update) => Some(update),
            _ => None,
        }
    }
}

/// Queries the remote version endpoint and compares against the running version.
#[derive(Debug, Clone)]
pub struct VersionResolver {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl VersionResolver {
    /// Construct a resolver with its own HTTP client.
    pub fn new(endpoint: Url, timeout: Duration, user_agent: &str) -> Result<Self, ResolveError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(ResolveError::Client)?;
        Ok(Self::with_client(client, endpoint, timeout))
    }

    /// Construct a resolver sharing an existing client.
    pub fn with_client(client: Client, endpoint: Url, timeout: Duration) -> Self {
        Self {
            client,
            endpoint,
            timeout,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Fetch and parse the descriptor, surfacing every failure.
    pub async fn fetch_descriptor(&self) -> Result<VersionDescriptor, ResolveError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| ResolveError::Request {
                url: self.endpoint.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Status {
                url: self.endpoint.clone(),
                status,
            });
        }
        let body = response
            .bytes()
            .await
            .map_err(|source| ResolveError::Request {
                url: self.endpoint.clone(),
                source,
            })?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Resolve the published version against `current`.
    ///
    /// Never fails: errors are logged and reported as [`ResolveOutcome::Unavailable`].
    pub async fn resolve(
        &self,
        current: ReleaseVersion,
        cancel: &CancellationToken,
    ) -> ResolveOutcome {
        debug!(endpoint = %self.endpoint, current = %current, "checking for a newer version");
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(endpoint = %self.endpoint, "version check cancelled");
                return ResolveOutcome::Cancelled;
            }
            fetched = self.fetch_descriptor() => fetched,
        };
        match fetched {
            Ok(descriptor) => {
                let resolved = ResolvedUpdate::new(descriptor, current);
                info!(
                    current = %resolved.current,
                    latest = %resolved.descriptor.version,
                    newer = resolved.is_newer,
                    mandatory = resolved.descriptor.is_mandatory,
                    "version check complete"
                );
                ResolveOutcome::Resolved(resolved)
            }
            Err(err) => {
                warn!(endpoint = %self.endpoint, error = %err, "version check failed; treating as no update");
                ResolveOutcome::Unavailable
            }
        }
    }
}
