//! ---
//! renew_section: "01-core-functionality"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Error types raised by the update pipeline."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::fsutil::TreeStats;

/// Errors raised by the steps of an update attempt.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("update attempt cancelled")]
    Cancelled,
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("download of {url} failed: {source}")]
    Download {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("download of {url} returned {status}")]
    DownloadStatus { url: Url, status: reqwest::StatusCode },
    #[error("download of {url} did not finish within {timeout:?}")]
    DownloadTimeout { url: Url, timeout: Duration },
    #[error("downloaded artifact {0} is empty")]
    EmptyArtifact(PathBuf),
    #[error("checksum mismatch for {path}: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("installation directory {0} does not exist")]
    MissingInstallation(PathBuf),
    #[error("backup at {path} is incomplete: expected {expected}, found {actual}")]
    IncompleteBackup {
        path: PathBuf,
        expected: TreeStats,
        actual: TreeStats,
    },
    #[error("archive {path} could not be read: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("archive entry '{entry}' escapes the staging directory")]
    UnsafeEntry { entry: String },
    #[error("staged package {dir} is missing required entries: {}", missing.join(", "))]
    MissingEntries { dir: PathBuf, missing: Vec<String> },
    #[error("failed to launch applier {path}: {reason}")]
    Launch { path: PathBuf, reason: String },
    #[error("service {service} could not {action}: {reason}")]
    ServiceControl {
        service: String,
        action: &'static str,
        reason: String,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode {context}: {source}")]
    Encode {
        context: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Attach a human readable context to an [`io::Error`].
pub(crate) trait IoResultExt<T> {
    fn io_context<F>(self, context: F) -> Result<T, UpdateError>
    where
        F: FnOnce() -> String;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn io_context<F>(self, context: F) -> Result<T, UpdateError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| UpdateError::Io {
            context: context(),
            source,
        })
    }
}
